//! Application-wide error types.

use campaign_cache::CacheError;
use playback_monitor::PlaybackError;
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Campaign {campaign_id} is not ready: {reason}")]
    NotReady { campaign_id: String, reason: String },

    #[error("Campaign {campaign_id} was abandoned before its assets resolved")]
    Abandoned { campaign_id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn not_ready(campaign_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotReady {
            campaign_id: campaign_id.into(),
            reason: reason.into(),
        }
    }
}
