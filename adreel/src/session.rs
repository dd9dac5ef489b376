//! Campaign sessions: pre-caching assets and building playback monitors.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use campaign_cache::{Campaign, CampaignOutcome, DownloadCoordinator};
use futures::future::join_all;
use parking_lot::Mutex;
use playback_monitor::{Device, MediaSource, PlaybackMonitor};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::AdContext;
use crate::error::{Error, Result};

/// Drives campaigns from "received" to "playable" and back out of the cache.
pub struct SessionController {
    context: Arc<AdContext>,
    /// Coordinators still waiting on assets, by campaign id.
    pending: Mutex<HashMap<String, Arc<DownloadCoordinator>>>,
}

impl SessionController {
    pub fn new(context: Arc<AdContext>) -> Self {
        Self {
            context,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Arc<AdContext> {
        &self.context
    }

    /// Cache every asset `campaign` needs.
    ///
    /// The campaign joins the active set for as long as it is usable. A campaign
    /// that cannot be cached is removed again and reported as [`Error::NotReady`].
    pub async fn prepare(&self, campaign: Campaign) -> Result<Arc<Campaign>> {
        let campaign = Arc::new(campaign);
        let span = info_span!("prepare", campaign_id = %campaign.id);

        async {
            let context = &self.context;
            context.active().add(campaign.clone());

            let (coordinator, outcome) = DownloadCoordinator::new(
                campaign.clone(),
                context.active().clone(),
                context.manifest().clone(),
                context.hub().clone(),
            );
            self.pending
                .lock()
                .insert(campaign.id.clone(), coordinator.clone());
            coordinator.start();

            let outcome = outcome.await;
            self.forget_coordinator(&campaign.id, &coordinator);

            match outcome {
                Ok(CampaignOutcome::Ready) => {
                    context.manifest().record(&campaign);
                    info!(video_url = %campaign.video_url, "campaign ready");
                    Ok(campaign)
                }
                Ok(CampaignOutcome::Failed { url }) => {
                    warn!(url = %url, "campaign asset could not be cached");
                    context.active().remove(&campaign);
                    Err(Error::not_ready(
                        campaign.id.clone(),
                        format!("asset {url} could not be cached"),
                    ))
                }
                Err(_) => {
                    debug!("coordinator dropped before resolving");
                    Err(Error::Abandoned {
                        campaign_id: campaign.id.clone(),
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Prepare several campaigns concurrently. Results keep the input order.
    pub async fn prepare_all(
        &self,
        campaigns: impl IntoIterator<Item = Campaign>,
    ) -> Vec<Result<Arc<Campaign>>> {
        join_all(campaigns.into_iter().map(|campaign| self.prepare(campaign))).await
    }

    /// Drop `campaign` after it was shown or expired.
    ///
    /// An unresolved coordinator for it is abandoned; its files stay on disk
    /// until the next [`sweep`](Self::sweep).
    pub fn complete(&self, campaign: &Campaign) {
        if let Some(coordinator) = self.pending.lock().remove(&campaign.id) {
            coordinator.abandon();
        }
        if self.context.active().remove(campaign) {
            debug!(campaign_id = %campaign.id, "campaign completed");
        }
    }

    /// On-disk location of the campaign's video, if it is cached.
    pub fn video_path(&self, campaign: &Campaign) -> Option<PathBuf> {
        let cache = self.context.cache();
        cache
            .is_cached(&campaign.video_url)
            .then(|| cache.path_for(&campaign.video_url))
    }

    /// Monitor for a cached campaign, bound to the context's UI queue and sink.
    ///
    /// Returns the monitor together with the file to hand to
    /// [`PlaybackMonitor::play`].
    pub fn create_monitor(
        &self,
        campaign: &Campaign,
        media: Arc<dyn MediaSource>,
        device: Arc<dyn Device>,
    ) -> Result<(Arc<PlaybackMonitor>, PathBuf)> {
        let path = self
            .video_path(campaign)
            .ok_or_else(|| Error::not_ready(campaign.id.clone(), "video is not cached"))?;

        let monitor = PlaybackMonitor::new(
            campaign.id.clone(),
            self.context.options().playback_config(),
            media,
            device,
            self.context.ui().clone(),
            self.context.sink().clone(),
        );
        debug!(campaign_id = %campaign.id, path = %path.display(), "created playback monitor");
        Ok((monitor, path))
    }

    /// Delete cached files no active campaign needs.
    pub fn sweep(&self) -> usize {
        let removed = self.context.cache().retain_referenced(self.context.active());
        if removed > 0 {
            info!(removed, "swept unreferenced cache files");
        }
        removed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn forget_coordinator(&self, id: &str, coordinator: &Arc<DownloadCoordinator>) {
        let mut pending = self.pending.lock();
        if pending
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, coordinator))
        {
            pending.remove(id);
        }
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("context", &self.context)
            .field("pending", &self.pending_count())
            .finish()
    }
}
