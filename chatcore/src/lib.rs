pub mod cache;
pub mod message_stream;
pub mod session_merge;
pub mod store;
pub mod sync_version;
pub mod types;

pub use cache::{KeyedCache, Lookup, Presence, TtlCache};
pub use message_stream::{MessageStream, PrependOutcome, StreamUpdate};
pub use sync_version::{RetryGate, SyncVersionCounter};
