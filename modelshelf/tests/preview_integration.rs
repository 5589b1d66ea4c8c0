//! Integration tests for the preview cache under scroll-like churn.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::{advance, sleep};

use modelshelf::preview::{
    FetchError, FetchFuture, PreviewCache, PreviewCacheConfig, PreviewFetcher,
};

const GRACE: Duration = Duration::from_secs(5);

struct SlowFetcher {
    calls: AtomicU32,
}

impl SlowFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl PreviewFetcher for SlowFetcher {
    fn fetch(&self, key: &str) -> FetchFuture<'_> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let key = key.to_string();
        Box::pin(async move {
            sleep(Duration::from_millis(25)).await;
            Ok(Bytes::from(format!("bytes:{key}")))
        })
    }
}

fn preview_cache(fetcher: Arc<SlowFetcher>) -> PreviewCache {
    PreviewCache::new(
        fetcher,
        PreviewCacheConfig::default().with_grace_period(GRACE),
    )
}

#[tokio::test(start_paused = true)]
async fn burst_of_acquires_results_in_one_fetch() {
    let fetcher = SlowFetcher::new();
    let cache = preview_cache(fetcher.clone());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.acquire("k").await }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.bytes(), Bytes::from("bytes:k"));
    }

    assert_eq!(fetcher.calls(), 1, "burst must share one fetch");
    assert_eq!(cache.ref_count("k"), Some(10));
}

#[tokio::test(start_paused = true)]
async fn scroll_churn_never_refetches_within_grace() {
    let fetcher = SlowFetcher::new();
    let cache = preview_cache(fetcher.clone());
    let keys = ["p1", "p2", "p3", "p4", "p5"];

    // Two scroll passes over the same previews, separated by less than
    // the grace window
    for pass in 0..2 {
        for key in keys {
            let handle = cache.acquire(key).await.unwrap();
            assert_eq!(handle.bytes(), Bytes::from(format!("bytes:{key}")));
            cache.release(key);
        }
        if pass == 0 {
            advance(GRACE / 2).await;
        }
    }

    assert_eq!(fetcher.calls(), keys.len() as u32, "one fetch per key");

    // Once the catalog view moves on for good, everything is reclaimed
    tokio::task::yield_now().await;
    advance(GRACE * 2).await;
    tokio::task::yield_now().await;
    let stats = cache.stats();
    assert_eq!(stats.items, 0);
    assert_eq!(stats.disposals, keys.len() as u64);
}

#[tokio::test(start_paused = true)]
async fn interleaved_holders_keep_the_handle_alive() {
    let fetcher = SlowFetcher::new();
    let cache = preview_cache(fetcher.clone());

    // Tile A mounts, tile B mounts the same preview, A unmounts
    cache.acquire("shared").await.unwrap();
    cache.acquire("shared").await.unwrap();
    cache.release("shared");

    advance(GRACE * 3).await;

    // B still holds it; nothing may have been disposed
    assert_eq!(cache.ref_count("shared"), Some(1));
    assert_eq!(cache.stats().disposals, 0);

    // B unmounts; now the grace window applies
    cache.release("shared");
    tokio::task::yield_now().await;
    advance(GRACE * 2).await;
    tokio::task::yield_now().await;
    assert_eq!(cache.ref_count("shared"), None);
    assert_eq!(cache.stats().disposals, 1);
    assert_eq!(fetcher.calls(), 1);
}
