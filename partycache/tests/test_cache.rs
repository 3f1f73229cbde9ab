use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use partycache::{
    CacheEvent, CacheSettings, CacheStatus, DownloadRequest, DownloadTarget, Fetcher, MediaCache,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Fetcher de test : écrit `size` octets par URL, échoue pour les URL inconnues
#[derive(Debug, Default)]
struct FakeFetcher {
    sizes: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    fn with(entries: &[(&str, usize)]) -> Arc<Self> {
        let fetcher = Self::default();
        for (url, size) in entries {
            fetcher.sizes.lock().insert(url.to_string(), *size);
        }
        Arc::new(fetcher)
    }
}

#[async_trait::async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, target: &DownloadTarget, dest: &Path) -> anyhow::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let size = self
            .sizes
            .lock()
            .get(&target.url)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("upstream refused {}", target.url))?;
        tokio::fs::write(dest, vec![1u8; size]).await?;
        Ok(size as u64)
    }
}

fn create_test_cache(max_bytes: u64, fetcher: Arc<FakeFetcher>) -> (TempDir, Arc<MediaCache>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings::new(temp_dir.path(), max_bytes).with_cooldown(Duration::ZERO);
    let cache = MediaCache::new(settings, fetcher).unwrap();
    (temp_dir, cache)
}

async fn wait_for(cache: &MediaCache, id: &str, expected: CacheStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if cache.status(id) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} never reached {:?}", id, expected));
}

#[tokio::test]
async fn test_download_reaches_ready() {
    let fetcher = FakeFetcher::with(&[("http://up/a", 100)]);
    let (dir, cache) = create_test_cache(10_000, fetcher);
    let mut events = cache.subscribe();
    cache.spawn_worker(CancellationToken::new());

    assert_eq!(
        cache.submit(DownloadRequest::from_url("a", "mp3", "http://up/a")),
        CacheStatus::Pending
    );
    wait_for(&cache, "a", CacheStatus::Ready).await;

    assert_eq!(cache.total_size(), 100);
    assert!(dir.path().join("a.mp3").exists());
    assert_eq!(cache.local_url("a").as_deref(), Some("/media/a.mp3"));

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CacheEvent::Status { status, .. } = event {
            seen.push(status);
        }
    }
    assert_eq!(
        seen,
        vec![CacheStatus::Pending, CacheStatus::Downloading, CacheStatus::Ready]
    );
}

#[tokio::test]
async fn test_resubmitting_is_deduplicated() {
    let fetcher = FakeFetcher::with(&[("http://up/a", 10)]);
    let (_dir, cache) = create_test_cache(10_000, fetcher.clone());

    // worker pas encore démarré : la demande reste PENDING
    cache.submit(DownloadRequest::from_url("a", "mp3", "http://up/a"));
    assert_eq!(
        cache.submit(DownloadRequest::from_url("a", "mp3", "http://up/a")),
        CacheStatus::Pending
    );

    cache.spawn_worker(CancellationToken::new());
    wait_for(&cache, "a", CacheStatus::Ready).await;

    assert_eq!(
        cache.submit(DownloadRequest::from_url("a", "mp3", "http://up/a")),
        CacheStatus::Ready
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_download_is_not_retried_or_evicted() {
    let fetcher = FakeFetcher::with(&[("http://up/big", 80)]);
    let (_dir, cache) = create_test_cache(100, fetcher.clone());
    cache.spawn_worker(CancellationToken::new());

    cache.submit(DownloadRequest::from_url("broken", "mp3", "http://up/404"));
    wait_for(&cache, "broken", CacheStatus::Failed).await;

    cache.submit(DownloadRequest::from_url("big", "mp3", "http://up/big"));
    wait_for(&cache, "big", CacheStatus::Ready).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.status("broken"), Some(CacheStatus::Failed));
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_deferred_url_failure_marks_failed() {
    let (_dir, cache) = create_test_cache(100, FakeFetcher::with(&[]));
    cache.spawn_worker(CancellationToken::new());

    cache.submit(DownloadRequest::new("lazy", "m4a", async {
        Err(anyhow::anyhow!("signature expired"))
    }));
    wait_for(&cache, "lazy", CacheStatus::Failed).await;
}

#[tokio::test]
async fn test_lru_eviction_keeps_total_under_cap() {
    // 1100 octets pour une limite de 1000 : les plus anciens partent
    let fetcher = FakeFetcher::with(&[
        ("http://up/1", 300),
        ("http://up/2", 300),
        ("http://up/3", 300),
        ("http://up/4", 200),
    ]);
    let (dir, cache) = create_test_cache(1000, fetcher);
    cache.spawn_worker(CancellationToken::new());

    for i in 1..=3 {
        cache.submit(DownloadRequest::from_url(format!("t{i}"), "mp3", format!("http://up/{i}")));
        wait_for(&cache, &format!("t{i}"), CacheStatus::Ready).await;
    }
    assert_eq!(cache.total_size(), 900);

    // t1 redevient le plus récent
    assert!(cache.touch("t1"));

    cache.submit(DownloadRequest::from_url("t4", "mp3", "http://up/4"));
    wait_for(&cache, "t4", CacheStatus::Ready).await;

    assert!(cache.total_size() <= 1000);
    assert_eq!(cache.status("t2"), None);
    assert!(!dir.path().join("t2.mp3").exists());
    assert_eq!(cache.status("t1"), Some(CacheStatus::Ready));
    assert_eq!(cache.status("t3"), Some(CacheStatus::Ready));
    assert_eq!(cache.total_size(), 800);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_between_downloads() {
    let fetcher = FakeFetcher::with(&[("http://up/a", 1), ("http://up/b", 1)]);
    let temp_dir = tempfile::tempdir().unwrap();
    let settings = CacheSettings::new(temp_dir.path(), 1000).with_cooldown(Duration::from_secs(3));
    let cache = MediaCache::new(settings, fetcher).unwrap();
    cache.spawn_worker(CancellationToken::new());

    cache.submit(DownloadRequest::from_url("a", "mp3", "http://up/a"));
    cache.submit(DownloadRequest::from_url("b", "mp3", "http://up/b"));

    let start = tokio::time::Instant::now();
    wait_for(&cache, "a", CacheStatus::Ready).await;
    wait_for(&cache, "b", CacheStatus::Ready).await;

    assert!(start.elapsed() >= Duration::from_secs(3));
}

#[tokio::test]
async fn test_remove_and_clear() {
    let fetcher = FakeFetcher::with(&[("http://up/a", 10), ("http://up/b", 20)]);
    let (dir, cache) = create_test_cache(1000, fetcher);
    cache.spawn_worker(CancellationToken::new());

    cache.submit(DownloadRequest::from_url("a", "mp3", "http://up/a"));
    cache.submit(DownloadRequest::from_url("b", "mp3", "http://up/b"));
    wait_for(&cache, "b", CacheStatus::Ready).await;
    wait_for(&cache, "a", CacheStatus::Ready).await;

    assert!(cache.remove("a"));
    assert!(!dir.path().join("a.mp3").exists());
    assert_eq!(cache.total_size(), 20);

    cache.clear();
    assert_eq!(cache.total_size(), 0);
    assert!(cache.records().is_empty());
    assert!(!dir.path().join("b.mp3").exists());
}

#[tokio::test]
async fn test_worker_starts_once() {
    let (_dir, cache) = create_test_cache(1000, FakeFetcher::with(&[]));
    let token = CancellationToken::new();
    let handle = cache.spawn_worker(token.clone()).unwrap();
    assert!(cache.spawn_worker(token.clone()).is_none());

    token.cancel();
    handle.await.unwrap();
}
