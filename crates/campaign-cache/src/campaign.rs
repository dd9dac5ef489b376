//! Campaign model.

use serde::{Deserialize, Serialize};

use crate::file_cache::cache_file_name;

/// One ad creative unit with the media assets it needs before it can play.
///
/// A campaign is immutable once constructed for an impression; components that
/// only observe it hold `Arc<Campaign>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    /// Server-side campaign identifier. Several creatives may share one id over time.
    pub id: String,
    /// URL of the video creative.
    pub video_url: String,
    /// Additional assets (end cards, icons) that must be cached with the video.
    #[serde(default)]
    pub auxiliary_urls: Vec<String>,
}

impl Campaign {
    /// Create a campaign with only a video asset.
    pub fn new(id: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            video_url: video_url.into(),
            auxiliary_urls: Vec::new(),
        }
    }

    /// Add an auxiliary asset URL.
    pub fn with_auxiliary(mut self, url: impl Into<String>) -> Self {
        self.auxiliary_urls.push(url.into());
        self
    }

    /// Every asset URL this campaign needs, video first. Empty URLs are skipped.
    pub fn required_urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.video_url.as_str())
            .chain(self.auxiliary_urls.iter().map(String::as_str))
            .filter(|url| !url.is_empty())
    }

    /// Whether `url` is one of this campaign's required assets.
    pub fn requires(&self, url: &str) -> bool {
        self.required_urls().any(|required| required == url)
    }

    /// Whether one of this campaign's assets is stored under cache file `name`.
    pub fn requires_file(&self, name: &str) -> bool {
        self.required_urls()
            .any(|required| cache_file_name(required) == name)
    }
}
