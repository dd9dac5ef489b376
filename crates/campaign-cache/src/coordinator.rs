//! Per-campaign download coordination.
//!
//! A coordinator decides which of its campaign's assets need fetching, asks
//! the shared [`DownloadHub`] for them, and resolves exactly once: `Ready`
//! when every asset is on disk, or `Failed` as soon as one required asset is
//! permanently cancelled.
//!
//! ```text
//! Idle --start()--> AwaitingAssets --last asset ready--> Done(Ready)
//!   |                     |
//!   |                     +--asset cancelled----------> Done(Failed)
//!   +--nothing to fetch-----------------------------> Done(Ready)
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::active_set::ActiveCampaignSet;
use crate::campaign::Campaign;
use crate::download::{DownloadHub, DownloadListener, ListenerId};
use crate::file_cache::cache_file_name;
use crate::manifest::CacheManifest;

/// Terminal result of a coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignOutcome {
    /// Every required asset is cached.
    Ready,
    /// A required asset was cancelled or failed for good.
    Failed { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitingAssets,
    Done,
}

struct CoordinatorState {
    phase: Phase,
    pending: HashSet<String>,
    listener_id: Option<ListenerId>,
    outcome_tx: Option<oneshot::Sender<CampaignOutcome>>,
    outcome: Option<CampaignOutcome>,
}

pub struct DownloadCoordinator {
    campaign: Arc<Campaign>,
    active: Arc<ActiveCampaignSet>,
    manifest: Arc<CacheManifest>,
    hub: Arc<DownloadHub>,
    state: Mutex<CoordinatorState>,
}

impl DownloadCoordinator {
    /// Create a coordinator and the receiver its outcome is delivered on.
    pub fn new(
        campaign: Arc<Campaign>,
        active: Arc<ActiveCampaignSet>,
        manifest: Arc<CacheManifest>,
        hub: Arc<DownloadHub>,
    ) -> (Arc<Self>, oneshot::Receiver<CampaignOutcome>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let coordinator = Arc::new(Self {
            campaign,
            active,
            manifest,
            hub,
            state: Mutex::new(CoordinatorState {
                phase: Phase::Idle,
                pending: HashSet::new(),
                listener_id: None,
                outcome_tx: Some(outcome_tx),
                outcome: None,
            }),
        });
        (coordinator, outcome_rx)
    }

    pub fn campaign(&self) -> &Arc<Campaign> {
        &self.campaign
    }

    /// Assets still being waited for.
    pub fn pending_urls(&self) -> Vec<String> {
        self.state.lock().pending.iter().cloned().collect()
    }

    pub fn has_downloads(&self) -> bool {
        !self.state.lock().pending.is_empty()
    }

    pub fn outcome(&self) -> Option<CampaignOutcome> {
        self.state.lock().outcome.clone()
    }

    /// Evaluate the campaign's assets and request whatever is missing or stale.
    ///
    /// When nothing needs fetching the outcome is `Ready` before this returns.
    /// Calling `start` more than once has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            warn!(campaign_id = %self.campaign.id, "coordinator already started");
            return;
        }

        let cache = self.hub.cache();

        // Reclaim the creative this campaign id used before, unless someone
        // still needs its file. Runs before the cached check so that check
        // sees what is left on disk.
        if let Some(previous) = self.manifest.get_by_id(&self.campaign.id)
            && previous.video_url != self.campaign.video_url
        {
            let file = cache_file_name(&previous.video_url);
            if !self.campaign.requires_file(&file)
                && !self.active.is_file_required_by_any(&file)
            {
                info!(
                    campaign_id = %self.campaign.id,
                    url = %previous.video_url,
                    "evicting replaced creative"
                );
                cache.evict(&previous.video_url);
            }
        }

        for url in self.campaign.required_urls() {
            if !cache.is_cached(url) {
                state.pending.insert(url.to_owned());
            } else if !cache.is_fresh(url) {
                debug!(campaign_id = %self.campaign.id, url = %url, "cached asset is stale");
                cache.evict(url);
                state.pending.insert(url.to_owned());
            }
        }

        if state.pending.is_empty() {
            debug!(campaign_id = %self.campaign.id, "all assets already cached");
            self.finish(&mut state, CampaignOutcome::Ready);
            return;
        }

        state.phase = Phase::AwaitingAssets;
        let listener: Arc<dyn DownloadListener> = Arc::clone(self) as Arc<dyn DownloadListener>;
        state.listener_id = Some(self.hub.add_listener(listener));
        let urls: Vec<String> = state.pending.iter().cloned().collect();
        debug!(campaign_id = %self.campaign.id, count = urls.len(), "requesting assets");
        drop(state);

        // The hub may answer synchronously, so the state lock must be released.
        for url in urls {
            self.hub.add_download(&url);
        }
    }

    /// Called when `url` is on disk. Resolves `Ready` once nothing is pending.
    pub fn on_asset_ready(&self, url: &str) {
        let mut state = self.state.lock();
        if state.phase != Phase::AwaitingAssets || !state.pending.remove(url) {
            return;
        }
        debug!(
            campaign_id = %self.campaign.id,
            url = %url,
            remaining = state.pending.len(),
            "asset ready"
        );
        if state.pending.is_empty() {
            self.finish(&mut state, CampaignOutcome::Ready);
        }
    }

    /// Called when `url` will never arrive. Resolves `Failed` for a pending asset.
    pub fn on_asset_cancelled(&self, url: &str) {
        let mut state = self.state.lock();
        if state.phase != Phase::AwaitingAssets || !state.pending.contains(url) {
            return;
        }
        warn!(campaign_id = %self.campaign.id, url = %url, "required asset cancelled");
        self.finish(
            &mut state,
            CampaignOutcome::Failed {
                url: url.to_owned(),
            },
        );
    }

    /// Stop waiting without resolving. The outcome receiver observes a closed channel.
    pub fn abandon(&self) {
        let mut state = self.state.lock();
        if state.phase == Phase::Done {
            return;
        }
        state.phase = Phase::Done;
        state.pending.clear();
        state.outcome_tx = None;
        if let Some(id) = state.listener_id.take() {
            self.hub.remove_listener(id);
        }
        debug!(campaign_id = %self.campaign.id, "coordinator abandoned");
    }

    fn finish(&self, state: &mut CoordinatorState, outcome: CampaignOutcome) {
        state.phase = Phase::Done;
        if let Some(id) = state.listener_id.take() {
            self.hub.remove_listener(id);
        }
        info!(campaign_id = %self.campaign.id, outcome = ?outcome, "campaign handled");
        state.outcome = Some(outcome.clone());
        if let Some(tx) = state.outcome_tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl DownloadListener for DownloadCoordinator {
    fn on_download_completed(&self, url: &str) {
        self.on_asset_ready(url);
    }

    fn on_download_cancelled(&self, url: &str) {
        self.on_asset_cancelled(url);
    }
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DownloadCoordinator")
            .field("campaign_id", &self.campaign.id)
            .field("phase", &state.phase)
            .field("pending", &state.pending.len())
            .finish()
    }
}
