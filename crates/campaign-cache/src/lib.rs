//! Campaign asset cache.
//!
//! Keeps the files an ad campaign needs (the video creative plus auxiliary
//! assets) in a local directory and makes sure each distinct URL is fetched
//! at most once, however many campaigns ask for it.
//!
//! - [`FileCache`] maps URLs to files and answers cached/fresh queries.
//! - [`DownloadHub`] deduplicates fetches and broadcasts per-URL outcomes.
//! - [`DownloadCoordinator`] tracks one campaign's pending assets and resolves
//!   to a single [`CampaignOutcome`].
//! - [`ActiveCampaignSet`] protects files still referenced by live campaigns.

pub mod active_set;
pub mod campaign;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod file_cache;
pub mod freshness;
pub mod manifest;

pub use active_set::ActiveCampaignSet;
pub use campaign::Campaign;
pub use coordinator::{CampaignOutcome, DownloadCoordinator};
pub use download::{
    AssetFetcher, DownloadHub, DownloadListener, HttpFetcher, HubConfig, ListenerId, RetryPolicy,
};
pub use error::CacheError;
pub use file_cache::{FileCache, cache_file_name};
pub use freshness::{FileAgePolicy, FreshnessPolicy};
pub use manifest::CacheManifest;

pub type Result<T> = std::result::Result<T, CacheError>;
