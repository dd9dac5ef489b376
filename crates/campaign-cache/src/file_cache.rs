//! Filesystem-backed asset cache.
//!
//! Files are named after the final path segment of their source URL. Presence
//! on disk is the only source of truth for "is cached"; nothing else is
//! consulted once the file has been looked at directly.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::active_set::ActiveCampaignSet;
use crate::error::CacheError;
use crate::freshness::{FileAgePolicy, FreshnessPolicy};
use crate::manifest::MANIFEST_FILE_NAME;

/// Suffix of files still being written by the downloader.
pub const PARTIAL_SUFFIX: &str = ".part";
const PARTIAL_DIGEST_LEN: usize = 16;

/// Derive the cache file name for `url`.
///
/// Uses the URL's last non-empty path segment. URLs without a usable segment
/// fall back to the hex SHA-256 of the whole URL so the mapping stays
/// deterministic.
pub fn cache_file_name(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(str::to_owned),
        Err(_) => {
            let end = url.find(['?', '#']).unwrap_or(url.len());
            url[..end]
                .rsplit(['/', '\\'])
                .find(|s| !s.is_empty())
                .map(str::to_owned)
        }
    };

    match segment {
        Some(name) if name != "." && name != ".." => name,
        _ => hex::encode(Sha256::digest(url.as_bytes())),
    }
}

/// Cache directory plus the staleness policy applied to its files.
pub struct FileCache {
    dir: PathBuf,
    freshness: Arc<dyn FreshnessPolicy>,
}

impl FileCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        Self::with_freshness(dir, Arc::new(FileAgePolicy::default()))
    }

    pub fn with_freshness(
        dir: impl Into<PathBuf>,
        freshness: Arc<dyn FreshnessPolicy>,
    ) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CacheError::io("creating cache directory", &dir, e))?;
        debug!(dir = %dir.display(), "opened asset cache");
        Ok(Self { dir, freshness })
    }

    /// Stable cache location for the lifetime of the process.
    pub fn cache_directory(&self) -> &Path {
        &self.dir
    }

    /// Final on-disk location for `url`.
    pub fn path_for(&self, url: &str) -> PathBuf {
        self.dir.join(cache_file_name(url))
    }

    /// Location the downloader writes to before moving the file into place.
    ///
    /// Keyed by the full URL, so two URLs sharing a basename never write to
    /// the same partial file.
    pub fn partial_path_for(&self, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        self.dir.join(format!(
            "{}.{}{}",
            cache_file_name(url),
            &digest[..PARTIAL_DIGEST_LEN],
            PARTIAL_SUFFIX
        ))
    }

    /// True iff a file named from `url`'s basename exists in the cache directory.
    pub fn is_cached(&self, url: &str) -> bool {
        self.path_for(url).is_file()
    }

    /// Whether the cached copy of `url` passes the freshness policy.
    pub fn is_fresh(&self, url: &str) -> bool {
        self.freshness.is_fresh(&self.path_for(url))
    }

    /// Delete the cached file for `url`. Missing files and I/O failures are not errors.
    pub fn evict(&self, url: &str) {
        let path = self.path_for(url);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(url = %url, path = %path.display(), "evicted cached asset"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(url = %url, error = %e, "failed to evict cached asset"),
        }
    }

    /// Delete every cached asset not required by a campaign in `active`.
    ///
    /// Partial downloads and the manifest are left alone. Returns the number of
    /// files removed.
    pub fn retain_referenced(&self, active: &ActiveCampaignSet) -> usize {
        let referenced: HashSet<String> = active
            .snapshot()
            .iter()
            .flat_map(|campaign| campaign.required_urls().map(cache_file_name).collect::<Vec<_>>())
            .collect();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to list cache directory");
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == MANIFEST_FILE_NAME
                || name.ends_with(PARTIAL_SUFFIX)
                || referenced.contains(&name)
                || !entry.file_type().is_ok_and(|t| t.is_file())
            {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(file = %name, "removed unreferenced cached asset");
                    removed += 1;
                }
                Err(e) => warn!(file = %name, error = %e, "failed to remove unreferenced asset"),
            }
        }
        removed
    }
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache").field("dir", &self.dir).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Campaign;

    #[test]
    fn file_name_is_last_path_segment() {
        assert_eq!(
            cache_file_name("https://cdn.example.com/creatives/abc/video.mp4?sig=1#t"),
            "video.mp4"
        );
        assert_eq!(
            cache_file_name("https://cdn.example.com/creatives/abc/"),
            "abc"
        );
        assert_eq!(cache_file_name("/local/path/clip.mp4"), "clip.mp4");
    }

    #[test]
    fn file_name_falls_back_to_hash() {
        let name = cache_file_name("https://cdn.example.com/");
        assert_eq!(name.len(), 64);
        assert_eq!(name, cache_file_name("https://cdn.example.com/"));
    }

    #[test]
    fn same_basename_urls_share_final_path_but_not_partial() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let a = "https://cdn.example.com/creative-a/video.mp4";
        let b = "https://cdn.example.com/creative-b/video.mp4";
        assert_eq!(cache.path_for(a), cache.path_for(b));
        assert_ne!(cache.partial_path_for(a), cache.partial_path_for(b));
        assert!(
            cache
                .partial_path_for(a)
                .to_string_lossy()
                .ends_with(PARTIAL_SUFFIX)
        );
    }

    #[test]
    fn is_cached_reflects_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let url = "https://cdn.example.com/a.mp4";
        assert!(!cache.is_cached(url));
        std::fs::write(cache.path_for(url), b"x").unwrap();
        assert!(cache.is_cached(url));
    }

    #[test]
    fn evict_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let url = "https://cdn.example.com/a.mp4";
        std::fs::write(cache.path_for(url), b"x").unwrap();
        cache.evict(url);
        assert!(!cache.is_cached(url));
        cache.evict(url);
        assert!(!cache.is_cached(url));
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let cache = FileCache::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(cache.cache_directory(), nested.as_path());
    }

    #[test]
    fn retain_referenced_keeps_active_assets_and_partials() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path()).unwrap();
        let active = ActiveCampaignSet::new();
        active.add(std::sync::Arc::new(Campaign::new(
            "c1",
            "https://cdn.example.com/keep.mp4",
        )));

        std::fs::write(cache.path_for("https://cdn.example.com/keep.mp4"), b"x").unwrap();
        std::fs::write(cache.path_for("https://cdn.example.com/old.mp4"), b"x").unwrap();
        std::fs::write(
            cache.partial_path_for("https://cdn.example.com/new.mp4"),
            b"x",
        )
        .unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE_NAME), b"{}").unwrap();

        assert_eq!(cache.retain_referenced(&active), 1);
        assert!(cache.is_cached("https://cdn.example.com/keep.mp4"));
        assert!(!cache.is_cached("https://cdn.example.com/old.mp4"));
        assert!(
            cache
                .partial_path_for("https://cdn.example.com/new.mp4")
                .exists()
        );
        assert!(dir.path().join(MANIFEST_FILE_NAME).exists());
    }
}
