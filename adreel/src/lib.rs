//! In-app video ad player core.
//!
//! Ties the campaign asset cache and the playback monitor together behind an
//! explicit [`AdContext`]. A [`SessionController`] pre-caches campaigns and
//! hands out [`PlaybackMonitor`](playback_monitor::PlaybackMonitor)s for the
//! ones that are ready.

pub mod config;
pub mod context;
pub mod error;
pub mod instrumentation;
pub mod logging;
pub mod session;

pub use config::{DownloadOptions, SdkOptions};
pub use context::AdContext;
pub use error::{Error, Result};
pub use instrumentation::{BroadcastSink, TelemetryRecord, TracingSink};
pub use session::SessionController;

pub use campaign_cache::{Campaign, CampaignOutcome};
pub use playback_monitor::{PlaybackEvent, PlaybackMonitor, RenderIntent, VideoPosition};
