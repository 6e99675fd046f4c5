//! Boundary to the external decryption/storage service.
//!
//! Everything behind these traits is I/O: database decryption, media
//! decoding, network fetches. The engine only schedules calls and caches
//! their answers.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::store::error::Result;
use crate::types::{MediaRef, MessagePage, Session, VideoInfo};

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Full authoritative session list
    async fn fetch_sessions(&self) -> Result<Vec<Session>>;

    /// Page of `session_id` counted back from the newest message: `offset`
    /// messages are skipped, then up to `limit` are returned ascending.
    async fn fetch_messages(&self, session_id: &str, offset: usize, limit: usize)
    -> Result<MessagePage>;

    /// Tell the store which session's push events matter. `None` clears it.
    async fn set_active_session(&self, session_id: Option<&str>) -> Result<()>;
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Fast lookup of an already decrypted file; never decrypts.
    async fn resolve_cached(&self, media: &MediaRef) -> Result<Option<PathBuf>>;

    /// Decrypt (and fetch if needed) the media, returning a local path.
    /// `force` re-decrypts even when a local copy exists.
    async fn decrypt(&self, media: &MediaRef, force: bool) -> Result<PathBuf>;

    async fn video_info(&self, media_id: &str) -> Result<VideoInfo>;
}
