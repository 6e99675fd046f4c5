use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chatcore::sync_version::SyncVersionCounter;
use chatcore::types::{MediaClass, MediaRef, VideoInfo};
use chatmirror::store::MemoryStore;
use chatmirror::{CancelToken, DecryptQueue, MediaResolver, MirrorConfig, Resolution};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn image(local_id: i64) -> MediaRef {
    MediaRef::new(MediaClass::Image, "s1", local_id, 1_700_000_000 + local_id, format!("md5-{local_id}"))
}

fn resolver_with(store: &Arc<MemoryStore>, config: &MirrorConfig) -> Arc<MediaResolver> {
    Arc::new(MediaResolver::new(
        store.clone(),
        Arc::new(DecryptQueue::new(config.max_concurrent_decrypts)),
        Arc::new(SyncVersionCounter::new()),
        config,
    ))
}

fn resolver(store: &Arc<MemoryStore>) -> Arc<MediaResolver> {
    resolver_with(store, &MirrorConfig::default())
}

async fn wait_for_cached(resolver: &MediaResolver, media: &MediaRef) -> Option<PathBuf> {
    for _ in 0..100 {
        if let Some(path) = resolver.cached(media) {
            return Some(path);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_concurrent_requests_share_one_decrypt() {
    init_logging();
    let store = Arc::new(MemoryStore::new().with_decrypt_delay(Duration::from_millis(30)));
    let media = image(1);
    store.add_encrypted(&media, "/cache/img1.jpg").await;
    let resolver = resolver(&store);

    let (a, b) = tokio::join!(resolver.resolve(&media), resolver.resolve(&media));

    assert_eq!(a, Resolution::Ready(PathBuf::from("/cache/img1.jpg")));
    assert_eq!(a, b);
    assert_eq!(store.decrypt_calls(), 1, "second request must join the first");
    assert_eq!(store.cache_lookup_calls(), 1);
    assert_eq!(resolver.stats().in_flight, 0);
}

#[tokio::test]
async fn test_cache_hit_skips_backend() {
    let store = Arc::new(MemoryStore::new());
    let media = image(2);
    store.add_encrypted(&media, "/cache/img2.jpg").await;
    let resolver = resolver(&store);

    assert!(resolver.resolve(&media).await.is_ready());
    assert!(resolver.resolve(&media).await.is_ready());

    assert_eq!(store.decrypt_calls(), 1);
    assert_eq!(store.cache_lookup_calls(), 1);
    assert_eq!(resolver.cached(&media), Some(PathBuf::from("/cache/img2.jpg")));
}

#[tokio::test]
async fn test_local_copy_resolves_without_decrypt() {
    let store = Arc::new(MemoryStore::new());
    let media = image(3);
    store.add_decrypted(&media, "/cache/img3.jpg").await;
    let resolver = resolver(&store);

    assert_eq!(
        resolver.resolve(&media).await,
        Resolution::Ready(PathBuf::from("/cache/img3.jpg"))
    );
    assert_eq!(store.decrypt_calls(), 0);
}

#[tokio::test]
async fn test_unavailable_is_retried_once_per_sync_version() {
    let store = Arc::new(MemoryStore::new());
    let media = image(4);
    let resolver = resolver(&store);

    assert_eq!(resolver.resolve(&media).await, Resolution::Unavailable);
    assert_eq!(store.decrypt_calls(), 1);

    // Same version: answered from memory, no backend traffic
    store.add_encrypted(&media, "/cache/img4.jpg").await;
    assert_eq!(resolver.resolve(&media).await, Resolution::Unavailable);
    assert_eq!(store.decrypt_calls(), 1);
    assert_eq!(store.cache_lookup_calls(), 1);
    assert_eq!(resolver.stats().gated, 1);

    resolver.sync_version().bump();
    assert_eq!(
        resolver.resolve(&media).await,
        Resolution::Ready(PathBuf::from("/cache/img4.jpg"))
    );
    assert_eq!(store.decrypt_calls(), 2);
    assert_eq!(resolver.stats().gated, 0);
}

#[tokio::test]
async fn test_failed_decrypt_is_retryable_after_invalidate() {
    let store = Arc::new(MemoryStore::new());
    let media = MediaRef::new(MediaClass::Voice, "s1", 5, 100, "voice-5");
    store.add_encrypted(&media, "/cache/v5.mp3").await;
    store.fail_decrypt(&media, "silk decoder crashed").await;
    let resolver = resolver(&store);

    let outcome = resolver.resolve(&media).await;
    assert!(outcome.is_retryable(), "got {outcome:?}");

    // Gated until the next sync, but still reported as the failure it was
    let gated = resolver.resolve(&media).await;
    assert_eq!(gated, outcome);
    assert!(gated.is_retryable());
    assert_eq!(store.decrypt_calls(), 1);

    store.clear_failure(&media).await;
    resolver.invalidate(&media);
    assert!(resolver.resolve(&media).await.is_ready());
    assert_eq!(store.decrypt_calls(), 2);
}

#[tokio::test]
async fn test_timeout_then_late_result_lands_in_cache() {
    init_logging();
    let store = Arc::new(MemoryStore::new().with_decrypt_delay(Duration::from_millis(150)));
    let media = MediaRef::new(MediaClass::Video, "s1", 6, 100, "video-6");
    store.add_encrypted(&media, "/cache/v6.mp4").await;
    let config = MirrorConfig {
        resolve_timeout_ms: 20,
        ..Default::default()
    };
    let resolver = resolver_with(&store, &config);

    assert_eq!(resolver.resolve(&media).await, Resolution::TimedOut);
    assert_eq!(resolver.cached(&media), None);

    assert_eq!(
        wait_for_cached(&resolver, &media).await,
        Some(PathBuf::from("/cache/v6.mp4"))
    );
    assert_eq!(store.decrypt_calls(), 1);
}

#[tokio::test]
async fn test_cancelled_request_writes_nothing() {
    let store = Arc::new(MemoryStore::new().with_decrypt_delay(Duration::from_millis(50)));
    let media = image(7);
    store.add_encrypted(&media, "/cache/img7.jpg").await;
    let resolver = resolver(&store);
    let token = CancelToken::new();

    let (outcome, _) = tokio::join!(resolver.resolve_with(&media, &token), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
    });
    assert_eq!(outcome, Resolution::Cancelled);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(resolver.cached(&media), None);
    assert_eq!(resolver.stats().in_flight, 0);

    // Already-cancelled tokens short-circuit
    assert_eq!(resolver.resolve_with(&media, &token).await, Resolution::Cancelled);
}

#[tokio::test]
async fn test_cancel_by_one_caller_keeps_result_for_others() {
    let store = Arc::new(MemoryStore::new().with_decrypt_delay(Duration::from_millis(40)));
    let media = image(8);
    store.add_encrypted(&media, "/cache/img8.jpg").await;
    let resolver = resolver(&store);
    let token = CancelToken::new();

    let (cancelled, kept, _) = tokio::join!(
        resolver.resolve_with(&media, &token),
        resolver.resolve(&media),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token.cancel();
        }
    );

    assert_eq!(cancelled, Resolution::Cancelled);
    assert!(kept.is_ready());
    assert_eq!(resolver.cached(&media), Some(PathBuf::from("/cache/img8.jpg")));
    assert_eq!(store.decrypt_calls(), 1);
}

#[tokio::test]
async fn test_force_redecrypt_replaces_cached_path() {
    let store = Arc::new(MemoryStore::new());
    let media = image(9);
    store.add_encrypted(&media, "/cache/img9-old.jpg").await;
    let resolver = resolver(&store);
    assert!(resolver.resolve(&media).await.is_ready());

    store.add_encrypted(&media, "/cache/img9-new.jpg").await;
    assert_eq!(
        resolver.force_redecrypt(&media).await,
        Resolution::Ready(PathBuf::from("/cache/img9-new.jpg"))
    );
    assert_eq!(resolver.cached(&media), Some(PathBuf::from("/cache/img9-new.jpg")));
}

#[tokio::test]
async fn test_failure_record_is_released_by_sync_bump() {
    let store = Arc::new(MemoryStore::new());
    let media = MediaRef::new(MediaClass::Voice, "s1", 15, 100, "voice-15");
    store.add_encrypted(&media, "/cache/v15.mp3").await;
    store.fail_decrypt(&media, "bad key").await;
    let resolver = resolver(&store);

    assert!(matches!(resolver.resolve(&media).await, Resolution::Failed(_)));
    assert!(matches!(resolver.resolve(&media).await, Resolution::Failed(_)));
    assert_eq!(resolver.stats().gated, 1);

    // A different key resolving after the bump sweeps the stale record away
    resolver.sync_version().bump();
    let other = image(16);
    store.add_decrypted(&other, "/cache/img16.jpg").await;
    assert!(resolver.resolve(&other).await.is_ready());
    assert_eq!(resolver.stats().gated, 0);
    assert_eq!(store.decrypt_calls(), 1);
}

#[tokio::test]
async fn test_force_during_plain_attempt_decrypts_again() {
    init_logging();
    let store = Arc::new(MemoryStore::new().with_decrypt_delay(Duration::from_millis(50)));
    let media = image(14);
    store.add_encrypted(&media, "/cache/img14.jpg").await;
    let resolver = resolver(&store);

    let (plain, forced) = tokio::join!(resolver.resolve(&media), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        resolver.force_redecrypt(&media).await
    });

    assert_eq!(plain, Resolution::Ready(PathBuf::from("/cache/img14.jpg")));
    assert_eq!(forced, Resolution::Ready(PathBuf::from("/cache/img14.jpg")));
    assert_eq!(store.decrypt_calls(), 2, "the retry must not ride on the plain attempt");
    assert_eq!(store.forced_decrypt_calls(), 1);
    assert_eq!(resolver.cached(&media), Some(PathBuf::from("/cache/img14.jpg")));
    assert_eq!(resolver.stats().in_flight, 0);
}

#[tokio::test]
async fn test_each_class_has_its_own_capacity() {
    let store = Arc::new(MemoryStore::new());
    let mut config = MirrorConfig::default();
    config.cache.image = 2;
    let resolver = resolver_with(&store, &config);

    let images: Vec<MediaRef> = (10..13).map(image).collect();
    for (i, media) in images.iter().enumerate() {
        store.add_decrypted(media, format!("/cache/img{i}.jpg")).await;
        assert!(resolver.resolve(media).await.is_ready());
    }
    let sticker = MediaRef::new(MediaClass::Emoji, "s1", 1, 1, "sticker");
    store.add_decrypted(&sticker, "/cache/sticker.gif").await;
    assert!(resolver.resolve(&sticker).await.is_ready());

    assert_eq!(resolver.cached(&images[0]), None);
    assert!(resolver.cached(&images[2]).is_some());
    let stats = resolver.stats();
    assert_eq!(stats.per_class[&MediaClass::Image], 2);
    assert_eq!(stats.per_class[&MediaClass::Emoji], 1);

    resolver.clear();
    assert_eq!(resolver.stats().per_class[&MediaClass::Image], 0);
}

#[tokio::test]
async fn test_video_missing_is_rechecked_only_after_sync() {
    let store = Arc::new(MemoryStore::new());
    let resolver = resolver(&store);

    assert!(!resolver.video_info("vid").await.unwrap().exists);
    assert!(!resolver.video_info("vid").await.unwrap().exists);
    assert_eq!(store.video_calls(), 1);

    store
        .set_video(
            "vid",
            VideoInfo {
                exists: true,
                video_url: Some("/cache/vid.mp4".into()),
                thumb_url: None,
            },
        )
        .await;
    assert!(!resolver.video_info("vid").await.unwrap().exists);

    resolver.sync_version().bump();
    let info = resolver.video_info("vid").await.unwrap();
    assert!(info.exists);
    assert_eq!(info.video_url.as_deref(), Some("/cache/vid.mp4"));
    assert_eq!(store.video_calls(), 2);

    // Positive answers are never re-checked
    resolver.sync_version().bump();
    assert!(resolver.video_info("vid").await.unwrap().exists);
    assert_eq!(store.video_calls(), 2);
}
