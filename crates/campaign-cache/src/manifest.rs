//! Record of campaigns whose assets were cached in earlier sessions.
//!
//! The manifest only answers "which creative did campaign X use last time";
//! whether that creative's file still exists is always checked on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::campaign::Campaign;
use crate::error::CacheError;

pub const MANIFEST_FILE_NAME: &str = "manifest.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    campaigns: Vec<Campaign>,
}

#[derive(Debug, Default)]
pub struct CacheManifest {
    path: Option<PathBuf>,
    campaigns: RwLock<BTreeMap<String, Campaign>>,
}

impl CacheManifest {
    /// Manifest that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `manifest.json` from `cache_dir`. A missing or unreadable manifest
    /// yields an empty one.
    pub fn load(cache_dir: &Path) -> Self {
        let path = cache_dir.join(MANIFEST_FILE_NAME);
        let campaigns = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<ManifestFile>(&bytes) {
                Ok(file) => file
                    .campaigns
                    .into_iter()
                    .map(|campaign| (campaign.id.clone(), campaign))
                    .collect(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ignoring corrupt cache manifest");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cache manifest");
                BTreeMap::new()
            }
        };

        debug!(path = %path.display(), entries = campaigns.len(), "loaded cache manifest");
        Self {
            path: Some(path),
            campaigns: RwLock::new(campaigns),
        }
    }

    /// The last recorded campaign with this id.
    pub fn get_by_id(&self, id: &str) -> Option<Campaign> {
        self.campaigns.read().get(id).cloned()
    }

    /// Remember `campaign` as the current creative for its id.
    pub fn record(&self, campaign: &Campaign) {
        self.campaigns
            .write()
            .insert(campaign.id.clone(), campaign.clone());
    }

    pub fn forget(&self, id: &str) -> Option<Campaign> {
        self.campaigns.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.campaigns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.read().is_empty()
    }

    /// Write the manifest back to disk (no-op for in-memory manifests).
    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let file = ManifestFile {
            campaigns: self.campaigns.read().values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| CacheError::manifest(format!("failed to serialize: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| CacheError::io("writing", &tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| CacheError::io("renaming", path, e))?;
        debug!(path = %path.display(), entries = file.campaigns.len(), "saved cache manifest");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_replaces_previous_creative() {
        let manifest = CacheManifest::in_memory();
        manifest.record(&Campaign::new("c1", "https://cdn/v1.mp4"));
        manifest.record(&Campaign::new("c1", "https://cdn/v2.mp4"));
        assert_eq!(manifest.len(), 1);
        assert_eq!(
            manifest.get_by_id("c1").unwrap().video_url,
            "https://cdn/v2.mp4"
        );
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = CacheManifest::load(dir.path());
        assert!(manifest.is_empty());
        manifest.record(&Campaign::new("c1", "https://cdn/v1.mp4"));
        manifest.save().unwrap();

        let reloaded = CacheManifest::load(dir.path());
        assert_eq!(
            reloaded.get_by_id("c1").unwrap().video_url,
            "https://cdn/v1.mp4"
        );
    }

    #[test]
    fn corrupt_manifest_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), b"not json").unwrap();
        assert!(CacheManifest::load(dir.path()).is_empty());
    }

    #[test]
    fn in_memory_save_is_noop() {
        let manifest = CacheManifest::in_memory();
        manifest.record(&Campaign::new("c1", "https://cdn/v1.mp4"));
        assert!(manifest.save().is_ok());
        assert!(manifest.forget("c1").is_some());
    }
}
