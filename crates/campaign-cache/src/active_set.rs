//! Registry of campaigns the current session still cares about.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::campaign::Campaign;

/// Ordered set of campaigns still relevant to the session.
///
/// Mutated by the session controller only; download coordinators read it to
/// decide whether a cached file can be reclaimed.
#[derive(Debug, Default)]
pub struct ActiveCampaignSet {
    campaigns: RwLock<Vec<Arc<Campaign>>>,
}

impl ActiveCampaignSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a campaign. An identical campaign already present is not duplicated.
    pub fn add(&self, campaign: Arc<Campaign>) {
        let mut campaigns = self.campaigns.write();
        if campaigns.iter().any(|existing| **existing == *campaign) {
            return;
        }
        debug!(campaign_id = %campaign.id, "campaign became active");
        campaigns.push(campaign);
    }

    /// Remove every entry equal to `campaign`. Returns whether anything was removed.
    pub fn remove(&self, campaign: &Campaign) -> bool {
        let mut campaigns = self.campaigns.write();
        let before = campaigns.len();
        campaigns.retain(|existing| **existing != *campaign);
        let removed = campaigns.len() != before;
        if removed {
            debug!(campaign_id = %campaign.id, "campaign no longer active");
        }
        removed
    }

    /// True as soon as any active campaign lists `url` among its required assets.
    pub fn is_url_required_by_any(&self, url: &str) -> bool {
        self.campaigns
            .read()
            .iter()
            .any(|campaign| campaign.requires(url))
    }

    /// True when any active campaign stores an asset under cache file `name`.
    ///
    /// Distinct URLs sharing a basename map to the same file, so this is the
    /// check to make before deleting anything from the cache.
    pub fn is_file_required_by_any(&self, name: &str) -> bool {
        self.campaigns
            .read()
            .iter()
            .any(|campaign| campaign.requires_file(name))
    }

    /// First active campaign with the given id.
    pub fn find_by_id(&self, id: &str) -> Option<Arc<Campaign>> {
        self.campaigns
            .read()
            .iter()
            .find(|campaign| campaign.id == id)
            .cloned()
    }

    pub fn snapshot(&self) -> Vec<Arc<Campaign>> {
        self.campaigns.read().clone()
    }

    pub fn len(&self) -> usize {
        self.campaigns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.read().is_empty()
    }
}
