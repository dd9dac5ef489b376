//! Process-wide SDK state, passed explicitly instead of living in globals.

use std::sync::Arc;
use std::time::Duration;

use campaign_cache::{
    ActiveCampaignSet, AssetFetcher, CacheManifest, DownloadHub, FileCache, HttpFetcher,
};
use playback_monitor::{InstrumentationSink, RenderQueue, UiDispatcher};
use tracing::{info, warn};

use crate::config::SdkOptions;
use crate::error::Result;

/// Request timeout for the HTTP fetcher when no per-attempt limit is configured.
const UNBOUNDED_FETCH_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct AdContext {
    options: SdkOptions,
    hub: Arc<DownloadHub>,
    manifest: Arc<CacheManifest>,
    active: Arc<ActiveCampaignSet>,
    ui: UiDispatcher,
    sink: Arc<dyn InstrumentationSink>,
}

impl AdContext {
    /// Build a context over `fetcher`.
    ///
    /// The returned [`RenderQueue`] belongs to the rendering task; every
    /// monitor created from this context dispatches into it.
    pub fn new(
        options: SdkOptions,
        fetcher: Arc<dyn AssetFetcher>,
        sink: Arc<dyn InstrumentationSink>,
    ) -> Result<(Arc<Self>, RenderQueue)> {
        let dir = options.cache_dir();
        let cache = Arc::new(FileCache::with_freshness(
            &dir,
            Arc::new(options.freshness()),
        )?);
        let manifest = Arc::new(CacheManifest::load(&dir));
        let hub = Arc::new(DownloadHub::new(cache, fetcher, options.hub_config()));
        let (ui, queue) = UiDispatcher::channel();

        info!(
            cache_dir = %dir.display(),
            known_campaigns = manifest.len(),
            "ad context ready"
        );

        let context = Arc::new(Self {
            options,
            hub,
            manifest,
            active: Arc::new(ActiveCampaignSet::new()),
            ui,
            sink,
        });
        Ok((context, queue))
    }

    /// Context backed by the `reqwest` fetcher.
    pub fn with_http(
        options: SdkOptions,
        sink: Arc<dyn InstrumentationSink>,
    ) -> Result<(Arc<Self>, RenderQueue)> {
        let timeout = options.fetch_timeout().unwrap_or(UNBOUNDED_FETCH_TIMEOUT);
        let fetcher = Arc::new(HttpFetcher::with_timeout(timeout)?);
        Self::new(options, fetcher, sink)
    }

    pub fn options(&self) -> &SdkOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        self.hub.cache()
    }

    pub fn hub(&self) -> &Arc<DownloadHub> {
        &self.hub
    }

    pub fn manifest(&self) -> &Arc<CacheManifest> {
        &self.manifest
    }

    pub fn active(&self) -> &Arc<ActiveCampaignSet> {
        &self.active
    }

    pub fn ui(&self) -> &UiDispatcher {
        &self.ui
    }

    pub fn sink(&self) -> &Arc<dyn InstrumentationSink> {
        &self.sink
    }

    /// Cancel outstanding downloads and persist the manifest.
    pub fn shutdown(&self) -> Result<()> {
        self.hub.shutdown();
        if let Err(e) = self.manifest.save() {
            warn!(error = %e, "failed to persist cache manifest on shutdown");
            return Err(e.into());
        }
        info!(campaigns = self.manifest.len(), "ad context shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AdContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdContext")
            .field("cache_dir", &self.cache().cache_directory())
            .field("active", &self.active.len())
            .field("in_flight", &self.hub.in_flight_count())
            .finish_non_exhaustive()
    }
}
