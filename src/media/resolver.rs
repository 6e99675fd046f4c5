//! Per-class media resolution on top of the decrypt queue.
//!
//! Lookup order for a reference:
//! 1. the class's LRU of resolved paths;
//! 2. an in-flight resolution for the same key (joined, never duplicated);
//! 3. the backend's fast local-cache lookup;
//! 4. a decrypt job on the [`DecryptQueue`].
//!
//! Negative outcomes are remembered per sync version, so an unresolved
//! reference is re-attempted once after each authoritative refresh instead
//! of on every render.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use chatcore::cache::{KeyedCache, Lookup, Presence, TtlCache};
use chatcore::store::{MediaBackend, StoreError};
use chatcore::sync_version::{RetryGate, SyncVersionCounter};
use chatcore::types::{MediaClass, MediaKey, MediaRef, VideoInfo};

use super::{CancelToken, Resolution};
use crate::config::MirrorConfig;
use crate::decrypt_queue::DecryptQueue;

type PathCache = KeyedCache<MediaKey, PathBuf>;

/// Callers still waiting on an in-flight resolution. When it drops to zero
/// every caller cancelled and the job must not write to the caches.
#[derive(Debug)]
struct Interest(AtomicUsize);

impl Interest {
    fn new() -> Arc<Self> {
        Arc::new(Self(AtomicUsize::new(1)))
    }

    fn join(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn release(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn abandoned(&self) -> bool {
        self.0.load(Ordering::Acquire) == 0
    }
}

#[derive(Debug, Clone)]
struct InFlight {
    rx: watch::Receiver<Option<Resolution>>,
    interest: Arc<Interest>,
    /// Started by a manual retry; bypasses the backend's local copy
    forced: bool,
}

impl InFlight {
    fn settled(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

/// Number of cached paths per media class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub per_class: HashMap<MediaClass, usize>,
    pub in_flight: usize,
    pub gated: usize,
}

pub struct MediaResolver {
    backend: Arc<dyn MediaBackend>,
    queue: Arc<DecryptQueue>,
    sync_version: Arc<SyncVersionCounter>,
    caches: Mutex<HashMap<MediaClass, PathCache>>,
    in_flight: DashMap<MediaKey, InFlight>,
    /// Negative outcomes (`Unavailable` or `Failed`) per key and sync version
    failures: Mutex<RetryGate<MediaKey, Resolution>>,
    videos: Mutex<TtlCache<String, VideoInfo>>,
    timeout: Duration,
}

impl std::fmt::Debug for MediaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResolver")
            .field("queue", &self.queue)
            .field("in_flight", &self.in_flight.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MediaResolver {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        queue: Arc<DecryptQueue>,
        sync_version: Arc<SyncVersionCounter>,
        config: &MirrorConfig,
    ) -> Self {
        let caches = MediaClass::ALL
            .into_iter()
            .map(|class| (class, PathCache::new(config.cache.for_class(class))))
            .collect();
        let videos = match config.negative_max_age() {
            Some(max_age) => TtlCache::with_max_age(max_age),
            None => TtlCache::new(),
        };

        Self {
            backend,
            queue,
            sync_version,
            caches: Mutex::new(caches),
            in_flight: DashMap::new(),
            failures: Mutex::new(RetryGate::new()),
            videos: Mutex::new(videos),
            timeout: config.resolve_timeout(),
        }
    }

    pub fn sync_version(&self) -> &Arc<SyncVersionCounter> {
        &self.sync_version
    }

    /// Render-path lookup: the cached path, without scheduling any work.
    pub fn cached(&self, media: &MediaRef) -> Option<PathBuf> {
        self.cache_get(media.class, &media.cache_key())
    }

    pub async fn resolve(self: &Arc<Self>, media: &MediaRef) -> Resolution {
        self.resolve_with(media, &CancelToken::new()).await
    }

    /// Resolve `media`, giving up waiting after the configured timeout or
    /// when `cancel` fires.
    pub async fn resolve_with(self: &Arc<Self>, media: &MediaRef, cancel: &CancelToken) -> Resolution {
        if cancel.is_cancelled() {
            return Resolution::Cancelled;
        }

        let key = media.cache_key();
        if let Some(path) = self.cache_get(media.class, &key) {
            return Resolution::Ready(path);
        }

        if let Some(existing) = self.join_existing(&key) {
            debug!("Joining in-flight resolution for {} {}", media.class, key.short());
            return self.wait(existing, cancel).await;
        }

        let version = self.sync_version.current();
        let gated = {
            let mut failures = self.lock_failures();
            let pruned = failures.prune(version);
            if pruned > 0 {
                debug!("Released {} failure records older than sync version {}", pruned, version);
            }
            failures.blocked(&key, version).cloned()
        };
        if let Some(outcome) = gated {
            return outcome;
        }

        let flight = self.start(media.clone(), key, false);
        self.wait(flight, cancel).await
    }

    /// Drop any cached result and decrypt again, bypassing the backend's
    /// local copy. Backs the host's manual retry.
    ///
    /// A plain attempt already running for the key is allowed to settle
    /// first (bounded by the resolve timeout) so its cache write cannot land
    /// after the forced one. A forced attempt already running is joined.
    pub async fn force_redecrypt(self: &Arc<Self>, media: &MediaRef) -> Resolution {
        let key = media.cache_key();

        let running = self
            .in_flight
            .get(&key)
            .filter(|flight| !flight.forced && !flight.settled())
            .map(|flight| flight.rx.clone());
        if let Some(mut rx) = running {
            debug!("Letting plain attempt for {} settle before forcing", key.short());
            let _ = tokio::time::timeout(self.timeout, rx.wait_for(Option::is_some)).await;
        }

        self.cache_delete(media.class, &key);
        self.lock_failures().clear(&key);
        let flight = self.start(media.clone(), key, true);
        self.wait(flight, &CancelToken::new()).await
    }

    /// Video metadata, with "exists" answers cached for good and "missing"
    /// answers cached until the next sync bump.
    pub async fn video_info(&self, media_id: &str) -> Result<VideoInfo, StoreError> {
        let version = self.sync_version.current();
        let lookup = self.lock_videos().get(&media_id.to_string(), version);
        match lookup {
            Lookup::Fresh(Presence::Exists(info)) => return Ok(info),
            Lookup::Fresh(Presence::Missing) => {
                return Ok(VideoInfo {
                    exists: false,
                    ..Default::default()
                });
            }
            Lookup::Stale => debug!("Re-checking video {} after sync", media_id),
            Lookup::Absent => {}
        }

        let info = self.backend.video_info(media_id).await?;
        let mut videos = self.lock_videos();
        if info.exists {
            videos.set_exists(media_id.to_string(), info.clone(), version);
        } else {
            videos.set_missing(media_id.to_string(), version);
        }
        Ok(info)
    }

    pub fn invalidate(&self, media: &MediaRef) {
        let key = media.cache_key();
        self.cache_delete(media.class, &key);
        self.lock_failures().clear(&key);
    }

    /// Forget every cached path and failure. In-flight work is unaffected.
    pub fn clear(&self) {
        for cache in self.lock_caches().values_mut() {
            cache.clear();
        }
        self.lock_failures().clear_all();
        self.lock_videos().clear();
        info!("Media caches cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            per_class: self
                .lock_caches()
                .iter()
                .map(|(class, cache)| (*class, cache.len()))
                .collect(),
            in_flight: self.in_flight.len(),
            gated: self.lock_failures().len(),
        }
    }

    fn join_existing(&self, key: &MediaKey) -> Option<InFlight> {
        self.in_flight.get(key).map(|flight| {
            flight.interest.join();
            flight.clone()
        })
    }

    /// Register an in-flight resolution for `key` and kick it off, or join the
    /// one another caller registered first.
    ///
    /// A forced start never joins a plain attempt: it takes over the key and
    /// the plain attempt finishes on its own.
    fn start(self: &Arc<Self>, media: MediaRef, key: MediaKey, force: bool) -> InFlight {
        let (tx, rx) = watch::channel(None);
        let flight = InFlight {
            rx,
            interest: Interest::new(),
            forced: force,
        };

        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().forced || !force {
                    existing.get().interest.join();
                    return existing.get().clone();
                }
                existing.insert(flight.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(flight.clone());
            }
        }

        let resolver = Arc::clone(self);
        let interest = Arc::clone(&flight.interest);
        tokio::spawn(async move { resolver.run(media, key, tx, interest, force).await });
        flight
    }

    async fn run(
        self: Arc<Self>,
        media: MediaRef,
        key: MediaKey,
        tx: watch::Sender<Option<Resolution>>,
        interest: Arc<Interest>,
        force: bool,
    ) {
        let version = self.sync_version.current();

        // Whatever happens to this resolution, the key stops being in flight,
        // unless a forced attempt has taken the key over in the meantime.
        let resolver = Arc::clone(&self);
        let ours = Arc::clone(&interest);
        let in_flight = scopeguard::guard(key, move |key| {
            resolver
                .in_flight
                .remove_if(&key, |_, flight| Arc::ptr_eq(&flight.interest, &ours));
        });

        if !force {
            match self.backend.resolve_cached(&media).await {
                Ok(Some(path)) => {
                    let outcome = self.settle(&media, &in_flight, &interest, version, Ok(path));
                    let _ = tx.send(Some(outcome));
                    return;
                }
                Ok(None) => {}
                Err(e) => debug!("Local cache lookup failed for {}: {}", in_flight.short(), e),
            }
        }

        if interest.abandoned() {
            let _ = tx.send(Some(Resolution::Cancelled));
            return;
        }

        let resolver = Arc::clone(&self);
        self.queue
            .enqueue_fn(move || async move {
                let key = in_flight;
                if interest.abandoned() {
                    let _ = tx.send(Some(Resolution::Cancelled));
                    return Ok(());
                }

                let result = resolver.backend.decrypt(&media, force).await;
                let error = result.as_ref().err().map(|e| e.to_string());
                let outcome = resolver.settle(&media, &key, &interest, version, result);
                let _ = tx.send(Some(outcome));

                match error {
                    Some(e) => Err(anyhow::anyhow!("decrypt {} {}: {}", media.class, key.short(), e)),
                    None => Ok(()),
                }
            })
            .await;
    }

    /// Apply a finished attempt to the caches and turn it into a `Resolution`.
    fn settle(
        &self,
        media: &MediaRef,
        key: &MediaKey,
        interest: &Interest,
        version: u64,
        result: Result<PathBuf, StoreError>,
    ) -> Resolution {
        if interest.abandoned() {
            debug!("Discarding result for {}: every caller cancelled", key.short());
            return Resolution::Cancelled;
        }

        match result {
            Ok(path) => {
                self.cache_set(media.class, key.clone(), path.clone());
                self.lock_failures().clear(key);
                Resolution::Ready(path)
            }
            Err(StoreError::NotFound(_)) => {
                self.lock_failures()
                    .record_failure(key.clone(), version, Resolution::Unavailable);
                Resolution::Unavailable
            }
            Err(e) => {
                warn!("Failed to resolve {} {}: {}", media.class, key.short(), e);
                let outcome = Resolution::Failed(e.to_string());
                self.lock_failures()
                    .record_failure(key.clone(), version, outcome.clone());
                outcome
            }
        }
    }

    async fn wait(&self, flight: InFlight, cancel: &CancelToken) -> Resolution {
        let InFlight { mut rx, interest, .. } = flight;

        let waited = tokio::time::timeout(self.timeout, async {
            tokio::select! {
                res = rx.wait_for(Option::is_some) => match res {
                    Ok(outcome) => outcome.clone().unwrap_or(Resolution::Cancelled),
                    Err(_) => Resolution::Failed("resolution abandoned".to_string()),
                },
                _ = cancel.cancelled() => {
                    interest.release();
                    Resolution::Cancelled
                }
            }
        })
        .await;

        waited.unwrap_or_else(|_| {
            debug!("Resolution wait timed out after {:?}", self.timeout);
            Resolution::TimedOut
        })
    }

    fn lock_caches(&self) -> std::sync::MutexGuard<'_, HashMap<MediaClass, PathCache>> {
        self.caches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, RetryGate<MediaKey, Resolution>> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_videos(&self) -> std::sync::MutexGuard<'_, TtlCache<String, VideoInfo>> {
        self.videos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache_get(&self, class: MediaClass, key: &MediaKey) -> Option<PathBuf> {
        self.lock_caches()
            .get_mut(&class)
            .and_then(|cache| cache.get(key).cloned())
    }

    fn cache_set(&self, class: MediaClass, key: MediaKey, path: PathBuf) {
        let evicted = self
            .lock_caches()
            .get_mut(&class)
            .and_then(|cache| cache.set(key, path));
        if let Some((evicted, _)) = evicted {
            debug!("Evicted {} {} from cache", class, evicted.short());
        }
    }

    fn cache_delete(&self, class: MediaClass, key: &MediaKey) {
        if let Some(cache) = self.lock_caches().get_mut(&class) {
            cache.delete(key);
        }
    }
}
