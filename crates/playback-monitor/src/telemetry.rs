//! Fire-and-forget instrumentation records.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Attribute key for buffering time in milliseconds.
pub const ATTR_BUFFERING_DURATION: &str = "bufferingDuration";
/// Attribute key for a [`VideoPosition`](crate::VideoPosition) marker.
pub const ATTR_POSITION: &str = "position";
/// Attribute key for why a video was abandoned or failed.
pub const ATTR_REASON: &str = "reason";

pub const ABORT_REASON_BACK: &str = "back";
pub const ABORT_REASON_SKIP: &str = "skip";

pub type Attributes = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    VideoPlay,
    VideoPosition,
    VideoError,
    VideoAbort,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VideoPlay => "video_play",
            Self::VideoPosition => "video_position",
            Self::VideoError => "video_error",
            Self::VideoAbort => "video_abort",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives telemetry. Implementations must not block.
pub trait InstrumentationSink: Send + Sync + 'static {
    fn record(&self, kind: EventKind, campaign_id: &str, attributes: Attributes);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl InstrumentationSink for NullSink {
    fn record(&self, _kind: EventKind, _campaign_id: &str, _attributes: Attributes) {}
}
