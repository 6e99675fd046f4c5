//! In-memory implementation of the collaborator traits.
//!
//! Stands in for the external decryption/storage service in tests and in the
//! demo binary. Media is modelled as three tables: files already decrypted
//! locally, files that can be decrypted on request, and files whose decrypt
//! fails. Call counters make the engine's scheduling observable.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use chatcore::store::error::{Result, StoreError};
use chatcore::store::traits::{MediaBackend, MessageSource};
use chatcore::types::{MediaKey, MediaRef, Message, MessagePage, Session, VideoInfo};

use crate::store::table::Table;

/// JSON snapshot accepted by [`MemoryStore::from_snapshot`]
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub sessions: Vec<Session>,
    pub messages: HashMap<String, Vec<Message>>,
    pub media: Vec<SnapshotMedia>,
    pub videos: HashMap<String, VideoInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMedia {
    pub media: MediaRef,
    pub path: PathBuf,
    /// Already decrypted, served by the fast lookup
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub session_fetches: AtomicUsize,
    pub message_fetches: AtomicUsize,
    pub cache_lookups: AtomicUsize,
    pub decrypts: AtomicUsize,
    pub video_lookups: AtomicUsize,
    /// Decrypts that bypassed the local copy
    pub forced_decrypts: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<Vec<Session>>,
    messages: Table<String, Vec<Message>>,
    decrypted: Table<MediaKey, PathBuf>,
    encrypted: Table<MediaKey, PathBuf>,
    failing: Table<MediaKey, String>,
    videos: Table<String, VideoInfo>,
    active_session: Mutex<Option<String>>,
    decrypt_delay: Duration,
    pub calls: CallCounts,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every decrypt take at least `delay`
    pub fn with_decrypt_delay(mut self, delay: Duration) -> Self {
        self.decrypt_delay = delay;
        self
    }

    pub async fn from_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        Ok(Self::from_parts(snapshot).await)
    }

    pub async fn from_parts(snapshot: Snapshot) -> Self {
        let store = Self::new();
        store.set_sessions(snapshot.sessions).await;
        for (session_id, messages) in snapshot.messages {
            store.push_messages(&session_id, messages).await;
        }
        for entry in snapshot.media {
            if entry.cached {
                store.add_decrypted(&entry.media, entry.path).await;
            } else {
                store.add_encrypted(&entry.media, entry.path).await;
            }
        }
        for (id, info) in snapshot.videos {
            store.set_video(&id, info).await;
        }
        store
    }

    /// Replace the authoritative session list
    pub async fn set_sessions(&self, sessions: Vec<Session>) {
        *self.sessions.lock().await = sessions;
    }

    /// Append messages to a session, keeping it sorted by display order.
    pub async fn push_messages(&self, session_id: &str, messages: Vec<Message>) {
        self.messages
            .edit(session_id.to_string(), |list| {
                list.extend(messages);
                list.sort_by_key(Message::order);
            })
            .await;
    }

    /// Media that resolves through the fast lookup, without decrypting
    pub async fn add_decrypted(&self, media: &MediaRef, path: impl Into<PathBuf>) {
        self.decrypted.insert(media.cache_key(), path.into()).await;
    }

    /// Media that only resolves through a decrypt call
    pub async fn add_encrypted(&self, media: &MediaRef, path: impl Into<PathBuf>) {
        self.encrypted.insert(media.cache_key(), path.into()).await;
    }

    /// Make decrypting `media` fail with `reason`
    pub async fn fail_decrypt(&self, media: &MediaRef, reason: &str) {
        self.failing.insert(media.cache_key(), reason.to_string()).await;
    }

    pub async fn clear_failure(&self, media: &MediaRef) {
        self.failing.remove(&media.cache_key()).await;
    }

    pub async fn set_video(&self, media_id: &str, info: VideoInfo) {
        self.videos.insert(media_id.to_string(), info).await;
    }

    pub async fn active_session(&self) -> Option<String> {
        self.active_session.lock().await.clone()
    }

    pub fn decrypt_calls(&self) -> usize {
        self.calls.decrypts.load(Ordering::SeqCst)
    }

    pub fn forced_decrypt_calls(&self) -> usize {
        self.calls.forced_decrypts.load(Ordering::SeqCst)
    }

    pub fn cache_lookup_calls(&self) -> usize {
        self.calls.cache_lookups.load(Ordering::SeqCst)
    }

    pub fn video_calls(&self) -> usize {
        self.calls.video_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for MemoryStore {
    async fn fetch_sessions(&self) -> Result<Vec<Session>> {
        self.calls.session_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.sessions.lock().await.clone())
    }

    async fn fetch_messages(
        &self,
        session_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<MessagePage> {
        self.calls.message_fetches.fetch_add(1, Ordering::SeqCst);
        let all = self
            .messages
            .get(session_id)
            .await
            .ok_or_else(|| StoreError::NotFound(format!("session {session_id}")))?;

        let end = all.len().saturating_sub(offset);
        let start = end.saturating_sub(limit);
        Ok(MessagePage {
            messages: all[start..end].to_vec(),
            has_more: start > 0,
        })
    }

    async fn set_active_session(&self, session_id: Option<&str>) -> Result<()> {
        *self.active_session.lock().await = session_id.map(str::to_string);
        Ok(())
    }
}

#[async_trait]
impl MediaBackend for MemoryStore {
    async fn resolve_cached(&self, media: &MediaRef) -> Result<Option<PathBuf>> {
        self.calls.cache_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.decrypted.get(&media.cache_key()).await)
    }

    async fn decrypt(&self, media: &MediaRef, force: bool) -> Result<PathBuf> {
        self.calls.decrypts.fetch_add(1, Ordering::SeqCst);
        if force {
            self.calls.forced_decrypts.fetch_add(1, Ordering::SeqCst);
        }
        if !self.decrypt_delay.is_zero() {
            tokio::time::sleep(self.decrypt_delay).await;
        }

        let key = media.cache_key();
        if let Some(reason) = self.failing.get(&key).await {
            return Err(StoreError::Backend(reason));
        }
        if !force {
            if let Some(path) = self.decrypted.get(&key).await {
                return Ok(path);
            }
        }
        match self.encrypted.get(&key).await {
            Some(path) => {
                self.decrypted.insert(key, path.clone()).await;
                Ok(path)
            }
            None => Err(StoreError::NotFound(format!("{} {}", media.class, key.short()))),
        }
    }

    async fn video_info(&self, media_id: &str) -> Result<VideoInfo> {
        self.calls.video_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .videos
            .get(media_id)
            .await
            .unwrap_or_default())
    }
}
