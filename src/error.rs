use thiserror::Error;

pub use chatcore::store::StoreError;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("no active session")]
    NoActiveSession,
    #[error("mirror has been shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, MirrorError>;
