//! Instrumentation sinks for playback telemetry.

use chrono::{DateTime, Utc};
use playback_monitor::{Attributes, EventKind, InstrumentationSink};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, trace};

/// Writes every record to the log under the `adreel::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl InstrumentationSink for TracingSink {
    fn record(&self, kind: EventKind, campaign_id: &str, attributes: Attributes) {
        let attributes = serde_json::Value::Object(attributes.into_iter().collect());
        info!(
            target: "adreel::telemetry",
            kind = %kind,
            campaign_id,
            attributes = %attributes,
            "telemetry"
        );
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub kind: EventKind,
    pub campaign_id: String,
    pub attributes: Attributes,
    pub timestamp: DateTime<Utc>,
}

/// Fans records out to any number of subscribers.
///
/// Records are dropped when nobody listens; slow subscribers see `Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<TelemetryRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryRecord> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InstrumentationSink for BroadcastSink {
    fn record(&self, kind: EventKind, campaign_id: &str, attributes: Attributes) {
        let record = TelemetryRecord {
            kind,
            campaign_id: campaign_id.to_owned(),
            attributes,
            timestamp: Utc::now(),
        };
        if self.sender.send(record).is_err() {
            trace!(%kind, campaign_id, "no telemetry subscribers");
        }
    }
}
