//! Staleness checks for cached asset files.

use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::trace;

/// Decides whether a cached file may be played as-is or must be fetched again.
pub trait FreshnessPolicy: Send + Sync + 'static {
    fn is_fresh(&self, path: &Path) -> bool;
}

/// Treats empty files as stale, and optionally files older than `max_age`.
///
/// Interrupted downloads never leave partial files under the final name, so an
/// empty file means the server sent nothing useful and must be retried.
#[derive(Debug, Clone, Default)]
pub struct FileAgePolicy {
    pub max_age: Option<Duration>,
}

impl FileAgePolicy {
    pub fn new(max_age: Option<Duration>) -> Self {
        Self { max_age }
    }
}

impl FreshnessPolicy for FileAgePolicy {
    fn is_fresh(&self, path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else {
            return false;
        };

        if metadata.len() == 0 {
            trace!(path = %path.display(), "cached file is empty");
            return false;
        }

        let Some(max_age) = self.max_age else {
            return true;
        };

        match metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        {
            Some(age) => age <= max_age,
            // Clock skew or no mtime support: trust the file.
            None => true,
        }
    }
}
