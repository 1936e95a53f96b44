//! Integration tests for the stampede-safe fetcher
//!
//! Several fetchers with their own client ids share one backend, the way
//! separate processes share one memcached cluster. These tests verify:
//! - Stampede protection with fill locks
//! - Lock waits ending in a hit or a timeout
//! - Deletes winning over fills in flight
//! - Degradation to source reads during a backend outage

use futures::future::join_all;
use ouroboros_cache::cache::{
    CacheBackend, CacheConfig, CacheContext, CacheEntry, CacheFetcher, FetchOptions, FillLock, MemoryBackend,
};
use ouroboros_cache::CacheError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn fetcher(backend: &MemoryBackend, client: &str, fill_lock: Option<Duration>, limit: u32) -> CacheFetcher {
    let mut builder = CacheConfig::builder().client_id(client).lock_wait_limit(limit);
    if let Some(duration) = fill_lock {
        builder = builder.fill_lock_duration(duration);
    }
    CacheFetcher::new(Arc::new(backend.clone()), builder.build()).unwrap()
}

#[tokio::test]
async fn test_stampede_computes_once() {
    let backend = MemoryBackend::new();
    let fetchers: Vec<_> = (0..8)
        .map(|i| fetcher(&backend, &format!("client-{}", i), Some(Duration::from_millis(20)), 10))
        .collect();
    let computes = AtomicUsize::new(0);
    let ctx = CacheContext::default();

    let results = join_all(fetchers.iter().map(|f| {
        let computes = &computes;
        let ctx = &ctx;
        async move {
            f.fetch(ctx, "IDC:1:blob:Post:v1:1", move || async move {
                computes.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok("post-1".to_string())
            })
            .await
        }
    }))
    .await;

    for result in results {
        assert_eq!(assert_ok!(result), "post-1");
    }
    assert_eq!(computes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_waiter_receives_lock_owners_value() {
    let backend = MemoryBackend::new();
    let a = fetcher(&backend, "a", Some(Duration::from_millis(20)), 5);
    let b = fetcher(&backend, "b", Some(Duration::from_millis(20)), 5);
    let ctx = CacheContext::default();
    let key = "IDC:1:blob:User:v1:9";

    let owner = a.fetch(&ctx, key, || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok("from-a".to_string())
    });
    let waiter = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        b.fetch(&ctx, key, || async { Ok("from-b".to_string()) }).await
    };

    let (owner, waiter) = tokio::join!(owner, waiter);
    assert_eq!(assert_ok!(owner), "from-a");
    assert_eq!(assert_ok!(waiter), "from-a");
}

#[tokio::test]
async fn test_lock_wait_is_bounded() {
    let backend = MemoryBackend::new();
    let key = "IDC:1:blob:User:v1:3";
    backend
        .add(key, CacheEntry::FillLock(FillLock::new("stuck")), Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let b = fetcher(&backend, "b", None, 2);
    let options = FetchOptions::with_fill_lock(Duration::from_millis(10), 3);
    let started = std::time::Instant::now();
    let err = assert_err!(
        b.fetch_with_options(&CacheContext::default(), key, &options, || async { Ok("never".to_string()) })
            .await
    );

    assert!(matches!(err, CacheError::LockWaitTimeout { waits: 3, .. }));
    assert!(err.is_lock_wait_timeout());
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_delete_wins_over_fill_in_flight() {
    let backend = MemoryBackend::new();
    let writer = fetcher(&backend, "writer", None, 2);
    let reader = fetcher(&backend, "reader", Some(Duration::from_millis(10)), 2);
    let ctx = CacheContext::default();
    let key = "IDC:1:blob:Post:v1:5";

    let stale = reader
        .fetch(&ctx, key, || async {
            writer.delete(&ctx, key).await;
            Ok("stale".to_string())
        })
        .await;
    assert_eq!(assert_ok!(stale), "stale");
    assert_eq!(backend.peek(key).await, Some(CacheEntry::Deleted));

    let fresh = reader.fetch(&ctx, key, || async { Ok("fresh".to_string()) }).await;
    assert_eq!(assert_ok!(fresh), "fresh");
    assert_eq!(backend.peek(key).await, Some(CacheEntry::Value("fresh".to_string())));
}

#[tokio::test]
async fn test_failed_fill_does_not_stall_waiters() {
    let backend = MemoryBackend::new();
    let a = fetcher(&backend, "a", Some(Duration::from_secs(5)), 2);
    let b = fetcher(&backend, "b", Some(Duration::from_secs(5)), 2);
    let ctx = CacheContext::default();
    let key = "IDC:1:attr:User:email:id:v1:4";

    let failed = a
        .fetch(&ctx, key, || async { Err(CacheError::Other("source down".to_string())) })
        .await;
    assert!(matches!(failed, Err(CacheError::Other(_))));

    let started = std::time::Instant::now();
    let value = b.fetch(&ctx, key, || async { Ok("recovered".to_string()) }).await;
    assert_eq!(assert_ok!(value), "recovered");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_outage_degrades_to_source_reads() {
    let backend = MemoryBackend::new();
    let f = fetcher(&backend, "a", Some(Duration::from_millis(10)), 2);
    let ctx = CacheContext::default();
    let computes = AtomicUsize::new(0);
    backend.set_available(false);

    for _ in 0..2 {
        let computes = &computes;
        let value = f
            .fetch(&ctx, "IDC:1:blob:Post:v1:1", move || async move {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok("from-source".to_string())
            })
            .await;
        assert_eq!(assert_ok!(value), "from-source");
    }
    assert_eq!(computes.load(Ordering::SeqCst), 2);
    assert!(!f.delete(&ctx, "IDC:1:blob:Post:v1:1").await);

    backend.set_available(true);
    let value = f
        .fetch(&ctx, "IDC:1:blob:Post:v1:1", || async { Ok("cached".to_string()) })
        .await;
    assert_eq!(assert_ok!(value), "cached");
    assert_eq!(
        backend.peek("IDC:1:blob:Post:v1:1").await,
        Some(CacheEntry::Value("cached".to_string()))
    );
}

#[tokio::test]
async fn test_fetch_multi_skips_foreign_locks() {
    let backend = MemoryBackend::new();
    let locked = "IDC:1:blob:Post:v1:2".to_string();
    backend
        .add(&locked, CacheEntry::FillLock(FillLock::new("other")), Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let f = fetcher(&backend, "a", None, 2);
    let keys = vec!["IDC:1:blob:Post:v1:1".to_string(), locked.clone()];
    let values = f
        .fetch_multi(&CacheContext::default(), &keys, |misses| async move {
            Ok(misses.into_iter().map(|k| (k.clone(), format!("v-{}", k))).collect())
        })
        .await;

    let values = assert_ok!(values);
    assert_eq!(values.len(), 2);
    // the other client's lock is left alone
    assert!(backend.peek(&locked).await.and_then(|e| e.fill_lock().cloned()).is_some());
}

#[tokio::test]
async fn test_fetch_multi_delete_wins_over_batched_fill() {
    let backend = MemoryBackend::new();
    let writer = fetcher(&backend, "writer", None, 2);
    let reader = fetcher(&backend, "reader", None, 2);
    let ctx = CacheContext::default();
    let keys: Vec<String> = ["IDC:1:blob:Post:v1:1", "IDC:1:blob:Post:v1:2", "IDC:1:blob:Post:v1:3"]
        .map(String::from)
        .to_vec();

    // Post 2 starts out deleted, so its fill rides on the delete marker's token
    writer.delete(&ctx, &keys[1]).await;

    let values = {
        let writer = &writer;
        let ctx = &ctx;
        let keys = &keys;
        reader
            .fetch_multi(ctx, keys, move |misses| async move {
                // Both deletes land after the reader has claimed or read its slots
                writer.delete(ctx, &keys[0]).await;
                writer.delete(ctx, &keys[1]).await;
                Ok(misses.into_iter().map(|k| (k.clone(), format!("stale-{}", k))).collect())
            })
            .await
    };

    let values = assert_ok!(values);
    assert_eq!(values.len(), 3);
    assert_eq!(backend.peek(&keys[0]).await, Some(CacheEntry::Deleted));
    assert_eq!(backend.peek(&keys[1]).await, Some(CacheEntry::Deleted));
    assert_eq!(
        backend.peek(&keys[2]).await,
        Some(CacheEntry::Value(format!("stale-{}", keys[2])))
    );

    // The next batch refills the deleted slots
    let fresh = reader
        .fetch_multi(&ctx, &keys, |misses| async move {
            Ok(misses.into_iter().map(|k| (k.clone(), "fresh".to_string())).collect())
        })
        .await;
    let fresh = assert_ok!(fresh);
    assert_eq!(fresh[&keys[0]], "fresh");
    assert_eq!(backend.peek(&keys[1]).await, Some(CacheEntry::Value("fresh".to_string())));
}
