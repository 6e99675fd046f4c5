// Core modules, re-exported so hosts only need this crate
pub use chatcore::{cache, message_stream, session_merge, sync_version};

// Core types are re-exported; events (with EventBus) live here since they need tokio
pub mod types {
    pub use chatcore::types::*;
    pub mod events;
}

pub mod config;
pub mod decrypt_queue;
pub mod error;
pub mod media;
pub mod mirror;
pub mod store;

pub use config::MirrorConfig;
pub use decrypt_queue::DecryptQueue;
pub use media::{CancelToken, MediaResolver, Resolution};
pub use mirror::{Applied, Mirror, SessionsUpdate};
