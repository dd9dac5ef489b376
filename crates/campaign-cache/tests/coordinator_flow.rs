//! End-to-end coordinator tests against a real hub and on-disk cache.
//!
//! The network is replaced by an in-memory fetcher so these tests exercise
//! dedup, fan-out and eviction without touching sockets.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use campaign_cache::{
    ActiveCampaignSet, AssetFetcher, CacheError, CacheManifest, Campaign, CampaignOutcome,
    DownloadCoordinator, DownloadHub, FileCache, HubConfig, RetryPolicy,
};
use reqwest::StatusCode;

/// Serves every URL with a small body unless it is listed as missing.
struct MemoryFetcher {
    missing: HashSet<String>,
    delay: Duration,
    calls: AtomicU32,
}

impl MemoryFetcher {
    fn new(delay: Duration) -> Self {
        Self {
            missing: HashSet::new(),
            delay,
            calls: AtomicU32::new(0),
        }
    }

    fn with_missing(mut self, url: &str) -> Self {
        self.missing.insert(url.to_owned());
        self
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str, partial: &Path, dest: &Path) -> Result<u64, CacheError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.missing.contains(url) {
            return Err(CacheError::http_status(StatusCode::NOT_FOUND, url));
        }
        tokio::fs::write(partial, url.as_bytes())
            .await
            .map_err(|e| CacheError::io("writing", partial, e))?;
        tokio::fs::rename(partial, dest)
            .await
            .map_err(|e| CacheError::io("renaming", dest, e))?;
        Ok(url.len() as u64)
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    hub: Arc<DownloadHub>,
    fetcher: Arc<MemoryFetcher>,
    active: Arc<ActiveCampaignSet>,
    manifest: Arc<CacheManifest>,
}

impl Harness {
    fn new(fetcher: MemoryFetcher) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = Arc::new(FileCache::new(dir.path()).expect("cache"));
        let fetcher = Arc::new(fetcher);
        let hub = Arc::new(DownloadHub::new(
            cache,
            fetcher.clone(),
            HubConfig {
                retry: RetryPolicy::none(),
                ..HubConfig::default()
            },
        ));
        let manifest = Arc::new(CacheManifest::load(dir.path()));
        Self {
            _dir: dir,
            hub,
            fetcher,
            active: Arc::new(ActiveCampaignSet::new()),
            manifest,
        }
    }

    async fn handle(&self, campaign: Campaign) -> CampaignOutcome {
        let campaign = Arc::new(campaign);
        self.active.add(campaign.clone());
        let (coordinator, rx) = DownloadCoordinator::new(
            campaign.clone(),
            self.active.clone(),
            self.manifest.clone(),
            self.hub.clone(),
        );
        coordinator.start();
        let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("coordinator resolved")
            .expect("outcome delivered");
        if outcome == CampaignOutcome::Ready {
            self.manifest.record(&campaign);
        }
        outcome
    }
}

#[tokio::test]
async fn campaign_with_assets_becomes_ready() {
    let harness = Harness::new(MemoryFetcher::new(Duration::from_millis(5)));
    let campaign = Campaign::new("c1", "https://cdn.example.com/v1.mp4")
        .with_auxiliary("https://cdn.example.com/end.png");

    assert_eq!(harness.handle(campaign).await, CampaignOutcome::Ready);
    let cache = harness.hub.cache();
    assert!(cache.is_cached("https://cdn.example.com/v1.mp4"));
    assert!(cache.is_cached("https://cdn.example.com/end.png"));
    assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 2);
    assert_eq!(harness.hub.listener_count(), 0);
}

#[tokio::test]
async fn shared_url_is_fetched_once_for_two_campaigns() {
    let harness = Harness::new(MemoryFetcher::new(Duration::from_millis(30)));
    let shared = "https://cdn.example.com/shared.mp4";

    let mut receivers = Vec::new();
    for id in ["c1", "c2"] {
        let campaign = Arc::new(Campaign::new(id, shared));
        harness.active.add(campaign.clone());
        let (coordinator, rx) = DownloadCoordinator::new(
            campaign,
            harness.active.clone(),
            harness.manifest.clone(),
            harness.hub.clone(),
        );
        coordinator.start();
        receivers.push(rx);
    }

    for rx in receivers {
        assert_eq!(rx.await.unwrap(), CampaignOutcome::Ready);
    }
    assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn second_pass_uses_cache() {
    let harness = Harness::new(MemoryFetcher::new(Duration::ZERO));
    let campaign = Campaign::new("c1", "https://cdn.example.com/v1.mp4");
    assert_eq!(harness.handle(campaign.clone()).await, CampaignOutcome::Ready);
    assert_eq!(harness.handle(campaign).await, CampaignOutcome::Ready);
    assert_eq!(harness.fetcher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_creative_replaces_old_one_on_disk() {
    let harness = Harness::new(MemoryFetcher::new(Duration::ZERO));
    let old = Campaign::new("c1", "https://cdn.example.com/v1.mp4");
    assert_eq!(harness.handle(old.clone()).await, CampaignOutcome::Ready);
    harness.active.remove(&old);

    let new = Campaign::new("c1", "https://cdn.example.com/v2.mp4");
    assert_eq!(harness.handle(new).await, CampaignOutcome::Ready);

    let cache = harness.hub.cache();
    assert!(!cache.is_cached("https://cdn.example.com/v1.mp4"));
    assert!(cache.is_cached("https://cdn.example.com/v2.mp4"));
    assert_eq!(
        harness.manifest.get_by_id("c1").unwrap().video_url,
        "https://cdn.example.com/v2.mp4"
    );
}

#[tokio::test]
async fn old_creative_survives_while_another_campaign_uses_it() {
    let harness = Harness::new(MemoryFetcher::new(Duration::ZERO));
    let old = Campaign::new("c1", "https://cdn.example.com/v1.mp4");
    assert_eq!(harness.handle(old.clone()).await, CampaignOutcome::Ready);
    harness.active.remove(&old);
    harness
        .active
        .add(Arc::new(Campaign::new("c9", "https://cdn.example.com/v1.mp4")));

    let new = Campaign::new("c1", "https://cdn.example.com/v2.mp4");
    assert_eq!(harness.handle(new).await, CampaignOutcome::Ready);
    assert!(harness.hub.cache().is_cached("https://cdn.example.com/v1.mp4"));
}

#[tokio::test]
async fn missing_asset_fails_campaign() {
    let missing = "https://cdn.example.com/gone.png";
    let harness = Harness::new(MemoryFetcher::new(Duration::ZERO).with_missing(missing));
    let campaign = Campaign::new("c1", "https://cdn.example.com/v1.mp4").with_auxiliary(missing);

    assert_eq!(
        harness.handle(campaign).await,
        CampaignOutcome::Failed {
            url: missing.to_owned()
        }
    );
    assert!(!harness.hub.cache().partial_path_for(missing).exists());
    assert_eq!(harness.hub.listener_count(), 0);
}

#[tokio::test]
async fn hub_shutdown_fails_waiting_campaigns() {
    let harness = Harness::new(MemoryFetcher::new(Duration::from_secs(60)));
    let campaign = Arc::new(Campaign::new("c1", "https://cdn.example.com/v1.mp4"));
    let (coordinator, rx) = DownloadCoordinator::new(
        campaign,
        harness.active.clone(),
        harness.manifest.clone(),
        harness.hub.clone(),
    );
    coordinator.start();
    harness.hub.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, CampaignOutcome::Failed { .. }));
}

#[tokio::test]
async fn unreferenced_files_are_reclaimed() {
    let harness = Harness::new(MemoryFetcher::new(Duration::ZERO));
    let keep = Campaign::new("c1", "https://cdn.example.com/keep.mp4");
    let drop = Campaign::new("c2", "https://cdn.example.com/drop.mp4");
    assert_eq!(harness.handle(keep).await, CampaignOutcome::Ready);
    assert_eq!(harness.handle(drop.clone()).await, CampaignOutcome::Ready);
    harness.manifest.save().unwrap();

    harness.active.remove(&drop);
    let removed = harness.hub.cache().retain_referenced(&harness.active);
    assert_eq!(removed, 1);
    assert!(harness.hub.cache().is_cached("https://cdn.example.com/keep.mp4"));
    assert!(!harness.hub.cache().is_cached("https://cdn.example.com/drop.mp4"));
    assert!(
        harness
            .hub
            .cache()
            .cache_directory()
            .join("manifest.json")
            .exists()
    );
}
