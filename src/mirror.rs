//! The mirror engine: keeps a displayable view of the external store.
//!
//! All state mutation goes through `&mut self`, so a host drives the engine
//! from one task: it calls the fetch operations on user action and feeds
//! push events from [`Mirror::next_event`] into [`Mirror::apply`].
//! Concurrency only exists inside the media resolver, whose decrypt work
//! runs on its own queue.

use futures_util::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;

use chatcore::message_stream::{MessageStream, PrependOutcome, StreamUpdate};
use chatcore::session_merge;
use chatcore::store::{MediaBackend, MessageSource};
use chatcore::sync_version::SyncVersionCounter;
use chatcore::types::{MediaRef, Message, MessageKey, Session};

use crate::config::MirrorConfig;
use crate::decrypt_queue::DecryptQueue;
use crate::error::{MirrorError, Result};
use crate::media::{MediaResolver, Resolution};
use crate::types::events::{EventBus, PushEvent, Subscriptions};

/// Result of applying an authoritative session list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionsUpdate {
    /// Rows that are new or changed (not pointer-identical to the previous list)
    pub changed: usize,
    pub total: usize,
    pub sync_version: u64,
}

/// What [`Mirror::apply`] did with a push event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Messages(StreamUpdate),
    Sessions(SessionsUpdate),
    /// Messages for a session that is not open
    Ignored,
}

pub struct Mirror {
    source: Arc<dyn MessageSource>,
    bus: Arc<EventBus>,
    sync_version: Arc<SyncVersionCounter>,
    resolver: Arc<MediaResolver>,
    sessions: Vec<Arc<Session>>,
    active: Option<String>,
    stream: MessageStream,
    subscriptions: Option<Subscriptions>,
    page_size: usize,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror")
            .field("sessions", &self.sessions.len())
            .field("active", &self.active)
            .field("messages", &self.stream.len())
            .field("sync_version", &self.sync_version.current())
            .finish_non_exhaustive()
    }
}

impl Mirror {
    /// Build an engine and subscribe to the bus.
    pub fn new(
        source: Arc<dyn MessageSource>,
        backend: Arc<dyn MediaBackend>,
        bus: Arc<EventBus>,
        config: &MirrorConfig,
    ) -> Self {
        let sync_version = Arc::new(SyncVersionCounter::new());
        let queue = Arc::new(DecryptQueue::new(config.max_concurrent_decrypts));
        let resolver = Arc::new(MediaResolver::new(
            backend,
            queue,
            Arc::clone(&sync_version),
            config,
        ));
        let subscriptions = Some(bus.subscribe());

        Self {
            source,
            bus,
            sync_version,
            resolver,
            sessions: Vec::new(),
            active: None,
            stream: MessageStream::new(),
            subscriptions,
            page_size: config.page_size.max(1),
        }
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn messages(&self) -> Arc<Vec<Message>> {
        self.stream.snapshot()
    }

    pub fn stream(&self) -> &MessageStream {
        &self.stream
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn resolver(&self) -> &Arc<MediaResolver> {
        &self.resolver
    }

    pub fn sync_version(&self) -> &Arc<SyncVersionCounter> {
        &self.sync_version
    }

    pub fn is_shut_down(&self) -> bool {
        self.subscriptions.is_none()
    }

    /// Fetch the authoritative session list and merge it into the view.
    pub async fn refresh_sessions(&mut self) -> Result<SessionsUpdate> {
        self.ensure_running()?;
        let incoming = self.source.fetch_sessions().await?;
        Ok(self.merge_sessions(incoming))
    }

    /// Switch to `session_id`: point the store at it, renew the push
    /// subscription and load the newest page.
    ///
    /// If the first page cannot be loaded the store is pointed back at the
    /// previously open session and the view is left as it was.
    pub async fn open_session(&mut self, session_id: &str) -> Result<Arc<Vec<Message>>> {
        self.ensure_running()?;
        self.source.set_active_session(Some(session_id)).await?;
        self.resubscribe();

        let page = match self
            .source
            .fetch_messages(session_id, 0, self.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to open session {}: {}", session_id, e);
                if let Err(restore) = self.source.set_active_session(self.active.as_deref()).await {
                    warn!("Failed to restore active session {:?}: {}", self.active, restore);
                }
                return Err(e.into());
            }
        };
        self.stream.replace(page.messages);
        self.stream.set_has_more(page.has_more);
        self.active = Some(session_id.to_string());

        info!(
            "Opened session {} with {} messages (more: {})",
            session_id,
            self.stream.len(),
            page.has_more
        );
        Ok(self.stream.snapshot())
    }

    /// Load the next page of history above the oldest loaded message.
    ///
    /// `anchor` is the first visible message; its new index is reported so the
    /// host can keep it in place.
    pub async fn load_older(&mut self, anchor: Option<&MessageKey>) -> Result<PrependOutcome> {
        let session_id = self.require_active()?.to_string();
        if !self.stream.has_more() {
            return Ok(self.stream.append_older(Vec::new(), anchor));
        }

        let page = self
            .source
            .fetch_messages(&session_id, self.stream.len(), self.page_size)
            .await?;
        let outcome = self.stream.append_older(page.messages, anchor);
        self.stream.set_has_more(page.has_more);
        debug!(
            "Loaded {} older messages for {}",
            outcome.inserted, session_id
        );
        Ok(outcome)
    }

    /// On-demand incremental refresh of the open session.
    pub async fn poll_newer(&mut self) -> Result<StreamUpdate> {
        let session_id = self.require_active()?.to_string();
        let page = self
            .source
            .fetch_messages(&session_id, 0, self.page_size)
            .await?;
        Ok(self.stream.append_newer(page.messages, true))
    }

    /// Wait for the next push event. `None` once shut down or the bus is gone.
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        self.subscriptions.as_mut()?.recv().await
    }

    /// Apply one push event to the view.
    pub fn apply(&mut self, event: PushEvent) -> Applied {
        match event {
            PushEvent::NewMessages(ev) => {
                if self.active.as_deref() != Some(ev.session_id.as_str()) {
                    debug!("Ignoring {} pushed messages for {}", ev.messages.len(), ev.session_id);
                    return Applied::Ignored;
                }
                // The live push path delivers each message once
                Applied::Messages(self.stream.append_newer(ev.messages.clone(), false))
            }
            PushEvent::SessionDeltas(ev) => Applied::Sessions(self.merge_sessions(ev.sessions.clone())),
        }
    }

    /// Wait for and apply the next push event.
    pub async fn process_next(&mut self) -> Option<Applied> {
        let event = self.next_event().await?;
        Some(self.apply(event))
    }

    /// Resolve every media reference in the loaded messages concurrently.
    pub async fn resolve_loaded_media(&self) -> Vec<(MediaRef, Resolution)> {
        let snapshot = self.stream.snapshot();
        let refs: Vec<MediaRef> = snapshot
            .iter()
            .flat_map(Message::media_refs)
            .cloned()
            .collect();

        let resolver = &self.resolver;
        let outcomes = join_all(refs.iter().map(|media| resolver.resolve(media))).await;
        refs.into_iter().zip(outcomes).collect()
    }

    /// Leave the open session. Push events for it are ignored from now on.
    pub async fn close_session(&mut self) -> Result<()> {
        if self.active.take().is_some() {
            self.source.set_active_session(None).await?;
            self.stream.clear();
        }
        Ok(())
    }

    /// Release every subscription and detach from the store.
    pub async fn shutdown(&mut self) -> Result<()> {
        if let Some(mut subs) = self.subscriptions.take() {
            subs.unsubscribe();
        }
        self.close_session().await?;
        info!("Mirror shut down at sync version {}", self.sync_version.current());
        Ok(())
    }

    fn merge_sessions(&mut self, incoming: Vec<Session>) -> SessionsUpdate {
        let merged = session_merge::merge_owned(&self.sessions, incoming);
        let changed = session_merge::changed_count(&self.sessions, &merged);
        self.sessions = merged;
        let sync_version = self.sync_version.bump();

        debug!(
            "Session list merged: {} rows, {} changed",
            self.sessions.len(),
            changed
        );
        SessionsUpdate {
            changed,
            total: self.sessions.len(),
            sync_version,
        }
    }

    fn resubscribe(&mut self) {
        if let Some(mut old) = self.subscriptions.take() {
            old.unsubscribe();
        }
        self.subscriptions = Some(self.bus.subscribe());
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            Err(MirrorError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn require_active(&self) -> Result<&str> {
        self.ensure_running()?;
        self.active.as_deref().ok_or(MirrorError::NoActiveSession)
    }
}
