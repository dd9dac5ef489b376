//! SDK options.
//!
//! Options are resolved in three layers: built-in defaults, an optional JSON
//! file (camelCase keys, every key optional), then `ADREEL_*` environment
//! variables. A `.env` file in the working directory is honoured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use campaign_cache::{FileAgePolicy, HubConfig, RetryPolicy};
use playback_monitor::PlaybackConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

pub const ENV_ALLOW_VIDEO_SKIP: &str = "ADREEL_ALLOW_VIDEO_SKIP";
pub const ENV_ALLOW_BACK_BUTTON_SKIP: &str = "ADREEL_ALLOW_BACK_BUTTON_SKIP";
pub const ENV_MAX_BUFFERING_WAIT_SECONDS: &str = "ADREEL_MAX_BUFFERING_WAIT_SECONDS";
pub const ENV_MUTE_VIDEO_SOUNDS: &str = "ADREEL_MUTE_VIDEO_SOUNDS";
pub const ENV_CACHE_DIR: &str = "ADREEL_CACHE_DIR";

/// Name of the cache directory under the system temp dir when none is configured.
const DEFAULT_CACHE_DIR_NAME: &str = "adreel-cache";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkOptions {
    /// Seconds before the skip action unlocks; 0 disables skipping.
    pub allow_video_skip: u64,
    /// Seconds after playback start before back navigation works; 0 disables the gate.
    pub allow_back_button_skip: u64,
    pub max_buffering_wait_seconds: u64,
    pub mute_video_sounds: bool,
    pub cache_directory: Option<PathBuf>,
    /// Cached files older than this are fetched again.
    pub cache_max_age_seconds: Option<u64>,
    pub download: DownloadOptions,
}

impl Default for SdkOptions {
    fn default() -> Self {
        Self {
            allow_video_skip: 0,
            allow_back_button_skip: 0,
            max_buffering_wait_seconds: 20,
            mute_video_sounds: false,
            cache_directory: None,
            cache_max_age_seconds: None,
            download: DownloadOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadOptions {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-attempt limit; 0 means unbounded.
    pub fetch_timeout_seconds: u64,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            fetch_timeout_seconds: 120,
        }
    }
}

impl SdkOptions {
    /// Defaults, then `path` (if any), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut options = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        options.apply_env(|key| std::env::var(key).ok())?;
        options.validate()?;
        debug!(options = ?options, "resolved SDK options");
        Ok(options)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("invalid options file {}: {e}", path.display())))
    }

    /// Overlay values found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ALLOW_VIDEO_SKIP) {
            self.allow_video_skip = parse_number(ENV_ALLOW_VIDEO_SKIP, &value)?;
        }
        if let Some(value) = lookup(ENV_ALLOW_BACK_BUTTON_SKIP) {
            self.allow_back_button_skip = parse_number(ENV_ALLOW_BACK_BUTTON_SKIP, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BUFFERING_WAIT_SECONDS) {
            self.max_buffering_wait_seconds =
                parse_number(ENV_MAX_BUFFERING_WAIT_SECONDS, &value)?;
        }
        if let Some(value) = lookup(ENV_MUTE_VIDEO_SOUNDS) {
            self.mute_video_sounds = parse_bool(ENV_MUTE_VIDEO_SOUNDS, &value)?;
        }
        if let Some(value) = lookup(ENV_CACHE_DIR)
            && !value.trim().is_empty()
        {
            self.cache_directory = Some(PathBuf::from(value.trim()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_buffering_wait_seconds == 0 {
            return Err(Error::config("maxBufferingWaitSeconds must be positive"));
        }
        if self.download.base_delay_ms > self.download.max_delay_ms {
            return Err(Error::config(
                "download.baseDelayMs must not exceed download.maxDelayMs",
            ));
        }
        Ok(())
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_CACHE_DIR_NAME))
    }

    pub fn freshness(&self) -> FileAgePolicy {
        FileAgePolicy::new(self.cache_max_age_seconds.map(Duration::from_secs))
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        match self.download.fetch_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            skip_after_secs: self.allow_video_skip,
            back_button_grace_secs: self.allow_back_button_skip,
            max_buffering_wait: Duration::from_secs(self.max_buffering_wait_seconds),
            mute: self.mute_video_sounds,
            ..PlaybackConfig::default()
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            retry: RetryPolicy {
                max_retries: self.download.max_retries,
                base_delay: Duration::from_millis(self.download.base_delay_ms),
                max_delay: Duration::from_millis(self.download.max_delay_ms),
                jitter: true,
            },
            fetch_timeout: self.fetch_timeout(),
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("{key} must be a whole number of seconds, got `{value}`")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("{key} must be a boolean, got `{value}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let options = SdkOptions::default();
        assert_eq!(options.max_buffering_wait_seconds, 20);
        assert!(!options.mute_video_sounds);
        assert!(options.cache_dir().ends_with("adreel-cache"));
        let playback = options.playback_config();
        assert_eq!(playback.poll_interval, Duration::from_millis(500));
        assert_eq!(playback.buffer_threshold_percent, 15);
        assert!(!playback.skip_enabled());
    }

    #[test]
    fn file_overlays_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(
            &path,
            r#"{"allowVideoSkip": 5, "muteVideoSounds": true, "download": {"maxRetries": 1}}"#,
        )
        .unwrap();

        let options = SdkOptions::from_file(&path).unwrap();
        assert_eq!(options.allow_video_skip, 5);
        assert!(options.mute_video_sounds);
        assert_eq!(options.max_buffering_wait_seconds, 20);
        assert_eq!(options.download.max_retries, 1);
        assert_eq!(options.download.base_delay_ms, 500);
    }

    #[test]
    fn malformed_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            SdkOptions::from_file(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn environment_overrides() {
        let mut options = SdkOptions::default();
        options
            .apply_env(env(&[
                (ENV_ALLOW_VIDEO_SKIP, "10"),
                (ENV_ALLOW_BACK_BUTTON_SKIP, " 5 "),
                (ENV_MUTE_VIDEO_SOUNDS, "yes"),
                (ENV_CACHE_DIR, "/var/cache/ads"),
            ]))
            .unwrap();
        assert_eq!(options.allow_video_skip, 10);
        assert_eq!(options.allow_back_button_skip, 5);
        assert!(options.mute_video_sounds);
        assert_eq!(options.cache_dir(), PathBuf::from("/var/cache/ads"));

        let playback = options.playback_config();
        assert_eq!(playback.skip_after_secs, 10);
        assert_eq!(playback.back_button_grace_secs, 5);
        assert!(playback.mute);
    }

    #[test]
    fn invalid_environment_value_is_rejected() {
        let mut options = SdkOptions::default();
        let err = options
            .apply_env(env(&[(ENV_MAX_BUFFERING_WAIT_SECONDS, "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_BUFFERING_WAIT_SECONDS));
    }

    #[test]
    fn zero_buffering_wait_is_invalid() {
        let options = SdkOptions {
            max_buffering_wait_seconds: 0,
            ..SdkOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn hub_config_from_download_options() {
        let options = SdkOptions {
            download: DownloadOptions {
                fetch_timeout_seconds: 0,
                ..DownloadOptions::default()
            },
            ..SdkOptions::default()
        };
        let hub = options.hub_config();
        assert_eq!(hub.retry.max_retries, 3);
        assert_eq!(hub.fetch_timeout, None);
    }
}
