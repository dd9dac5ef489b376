//! Playback events delivered to the session.
//!
//! Every event kind is one-shot per monitor: it is published at most once.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::PlaybackError;

/// Progress markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoPosition {
    Start,
    FirstQuartile,
    MidPoint,
    ThirdQuartile,
    End,
}

impl VideoPosition {
    /// Ratio-triggered markers and the ratio each one must exceed.
    pub const QUARTILES: [(VideoPosition, f64); 3] = [
        (VideoPosition::FirstQuartile, 0.25),
        (VideoPosition::MidPoint, 0.50),
        (VideoPosition::ThirdQuartile, 0.75),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::FirstQuartile => "first_quartile",
            Self::MidPoint => "mid_point",
            Self::ThirdQuartile => "third_quartile",
            Self::End => "end",
        }
    }
}

impl fmt::Display for VideoPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Decoder primed and the playhead moved for the first time.
    Started,
    PositionReached(VideoPosition),
    /// Terminal failure; polling has stopped.
    Error(PlaybackError),
    Completed,
    Skipped,
    /// Back was pressed; `allowed` tells whether the player was dismissed.
    BackButtonPressed { allowed: bool },
}

impl PlaybackEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PlaybackEvent::Error(_) | PlaybackEvent::Completed | PlaybackEvent::Skipped
        )
    }
}

/// Fan-out of [`PlaybackEvent`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct PlaybackEventBroadcaster {
    sender: broadcast::Sender<PlaybackEvent>,
}

impl PlaybackEventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.sender.subscribe()
    }

    /// Publish to current subscribers; returns how many received it.
    pub fn publish(&self, event: PlaybackEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PlaybackEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
