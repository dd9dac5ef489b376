//! Per-session playback state and the pure per-tick transition.
//!
//! The monitor reads the media source, then applies one [`Sample`] under its
//! lock. Everything the tick wants to happen outside the lock (render intents,
//! events, telemetry) is collected into [`Effects`] and flushed afterwards, so
//! no view or listener code ever runs while state is borrowed.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::PlaybackConfig;
use crate::error::{MediaError, PlaybackError};
use crate::events::{PlaybackEvent, VideoPosition};
use crate::render::RenderIntent;
use crate::telemetry::{ATTR_BUFFERING_DURATION, ATTR_POSITION, ATTR_REASON, Attributes, EventKind};

/// Position used when no reading has ever succeeded (ms). Never zero.
pub(crate) const POSITION_EPSILON_MS: f64 = 0.01;
/// Duration assumed until the decoder reports one (ms). Never zero.
pub(crate) const INITIAL_DURATION_MS: u64 = 1;

/// Monitor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Created,
    Polling,
    /// Screen went off or the host paused; resumable.
    Paused,
    /// Torn down by the host.
    Stopped,
    StoppedOnError,
    StoppedOnCompletion,
}

impl MonitorState {
    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::StoppedOnError | Self::StoppedOnCompletion
        )
    }
}

/// Where the skip affordance currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipState {
    /// Skipping is not configured.
    Disabled,
    Counting,
    Enabled,
    /// Clip is no longer than the skip threshold.
    Hidden,
}

/// Back navigation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackButtonGate {
    Allowed,
    /// Seconds left, rounded up.
    Wait(u64),
    /// A grace period is configured but playback has not started yet.
    NotStarted,
}

/// One poll's worth of media readings.
#[derive(Debug)]
pub(crate) struct Sample {
    pub position: Result<f64, MediaError>,
    pub duration: Result<u64, MediaError>,
    pub buffer_percentage: Result<u8, MediaError>,
}

#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub intents: Vec<RenderIntent>,
    pub events: Vec<PlaybackEvent>,
    pub telemetry: Vec<(EventKind, Attributes)>,
    pub stop_decoder: bool,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
            && self.events.is_empty()
            && self.telemetry.is_empty()
            && !self.stop_decoder
    }

    pub fn record(&mut self, kind: EventKind, attributes: Attributes) {
        self.telemetry.push((kind, attributes));
    }
}

pub(crate) fn attrs<const N: usize>(pairs: [(&str, serde_json::Value); N]) -> Attributes {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value))
        .collect()
}

#[derive(Debug)]
pub(crate) struct PlaybackState {
    pub lifecycle: MonitorState,
    pub torn_down: bool,

    pub duration_ms: u64,
    /// Whether `duration_ms` came from the decoder rather than the placeholder.
    pub duration_known: bool,
    pub position_ms: f64,
    pub previous_position_ms: f64,
    pub buffer_percent: u8,

    pub stalled: bool,
    pub moved_once: bool,
    pub prepared: bool,
    pub started: bool,

    pub buffering_indicator: bool,
    pub overlay_attached: bool,
    pub paused_overlay: bool,

    pub emitted: BTreeSet<VideoPosition>,
    pub skip: SkipState,
    pub skip_time_left_ms: f64,

    pub muted: bool,
    pub stored_volume: Option<f32>,

    pub buffering_started_at: Option<Instant>,
    pub buffering_completed_at: Option<Instant>,
    pub video_started_at: Option<Instant>,

    /// Cancels the running poll task. `None` while no timer runs.
    ///
    /// Lives under the state lock so a lifecycle change and the timer it
    /// implies can never be observed apart.
    pub timer: Option<CancellationToken>,
}

impl PlaybackState {
    pub fn new(config: &PlaybackConfig) -> Self {
        Self {
            lifecycle: MonitorState::Created,
            torn_down: false,
            duration_ms: INITIAL_DURATION_MS,
            duration_known: false,
            position_ms: 0.0,
            previous_position_ms: 0.0,
            buffer_percent: 0,
            stalled: false,
            moved_once: false,
            prepared: false,
            started: false,
            buffering_indicator: false,
            overlay_attached: false,
            paused_overlay: false,
            emitted: BTreeSet::new(),
            skip: if config.skip_enabled() {
                SkipState::Counting
            } else {
                SkipState::Disabled
            },
            skip_time_left_ms: config.skip_threshold_ms(),
            muted: config.mute,
            stored_volume: None,
            buffering_started_at: None,
            buffering_completed_at: None,
            video_started_at: None,
            timer: None,
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        ((self.duration_ms as f64 - self.position_ms).max(0.0) / 1000.0).ceil() as u64
    }

    /// Cancel the poll task, if any. No further tick runs once this returns.
    pub fn halt_timer(&mut self) {
        if let Some(token) = self.timer.take() {
            token.cancel();
        }
    }

    /// Apply one poll. Does nothing unless the monitor is polling.
    pub fn advance(&mut self, sample: Sample, now: Instant, config: &PlaybackConfig) -> Effects {
        let mut fx = Effects::default();
        if self.lifecycle != MonitorState::Polling {
            return fx;
        }

        // Position, falling back to the previous reading.
        self.previous_position_ms = self.position_ms;
        let fresh_position = match sample.position {
            Ok(position) => {
                self.position_ms = position;
                true
            }
            Err(e) => {
                trace!(error = %e, "position unavailable, reusing previous");
                self.position_ms = if self.previous_position_ms > 0.0 {
                    self.previous_position_ms
                } else {
                    POSITION_EPSILON_MS
                };
                false
            }
        };

        match sample.duration {
            Ok(duration) if duration > 0 => {
                self.duration_ms = duration;
                self.duration_known = true;
            }
            Ok(_) => trace!("decoder reported zero duration, keeping last known"),
            Err(e) => trace!(error = %e, "duration unavailable, keeping last known"),
        }

        let progress = self.position_ms / self.duration_ms as f64;

        // Movement. A substituted position never counts as progress.
        let moved = fresh_position && self.position_ms > self.previous_position_ms;
        if moved {
            self.moved_once = true;
            self.stalled = false;
            if self.buffering_indicator {
                self.buffering_indicator = false;
                fx.intents.push(RenderIntent::SetBufferingIndicator(false));
            }
        } else {
            self.stalled = true;
            if !self.buffering_indicator {
                self.buffering_indicator = true;
                fx.intents.push(RenderIntent::SetBufferingIndicator(true));
            }
        }

        fx.intents
            .push(RenderIntent::SetTimeRemaining(self.remaining_secs()));

        self.gate_skip(config, &mut fx);

        if let Ok(percent) = sample.buffer_percentage {
            self.buffer_percent = percent.min(100);
        }
        // Once playing, the overlay only comes back while the playhead is stuck.
        let playing = self.prepared && self.moved_once;
        let wants_overlay =
            self.buffer_percent < config.buffer_threshold_percent && (!playing || self.stalled);
        if wants_overlay && !self.overlay_attached {
            self.overlay_attached = true;
            fx.intents.push(RenderIntent::AttachBufferingOverlay);
        } else if playing && !wants_overlay && self.overlay_attached {
            self.overlay_attached = false;
            fx.intents.push(RenderIntent::DetachBufferingOverlay);
        }

        if playing && !self.started {
            self.mark_started(now, &mut fx);
        }

        if self.duration_known {
            for (marker, threshold) in VideoPosition::QUARTILES {
                if progress > threshold {
                    self.emit_position(marker, &mut fx);
                }
            }
        }

        if !self.moved_once
            && let Some(started_at) = self.buffering_started_at
            && now.saturating_duration_since(started_at) > config.max_buffering_wait
        {
            warn!(
                waited_ms = now.saturating_duration_since(started_at).as_millis() as u64,
                "playhead never moved, giving up"
            );
            let buffering = self.buffering_duration(now);
            fx.record(
                EventKind::VideoAbort,
                attrs([
                    (ATTR_BUFFERING_DURATION, json!(buffering.as_millis() as u64)),
                    (ATTR_REASON, json!("buffering_timeout")),
                ]),
            );
            self.fail(
                PlaybackError::BufferingTimeout {
                    waited_secs: config.max_buffering_wait.as_secs(),
                },
                &mut fx,
            );
        }

        fx
    }

    fn gate_skip(&mut self, config: &PlaybackConfig, fx: &mut Effects) {
        if self.skip != SkipState::Counting || !self.duration_known {
            return;
        }
        let threshold_ms = config.skip_threshold_ms();
        if self.duration_ms as f64 > threshold_ms {
            self.skip_time_left_ms = (threshold_ms - self.position_ms).max(0.0);
            if self.skip_time_left_ms <= 0.0 {
                debug!(position_ms = self.position_ms, "skip unlocked");
                self.skip = SkipState::Enabled;
                fx.intents.push(RenderIntent::EnableSkip);
            } else if !self.stalled {
                let secs = (self.skip_time_left_ms / 1000.0).ceil() as u64;
                fx.intents.push(RenderIntent::SkipCountdown(secs));
            }
        } else if self.moved_once {
            debug!(duration_ms = self.duration_ms, "clip too short to skip");
            self.skip = SkipState::Hidden;
            fx.intents.push(RenderIntent::HideSkip);
        }
    }

    fn mark_started(&mut self, now: Instant, fx: &mut Effects) {
        self.started = true;
        self.buffering_completed_at = Some(now);
        self.video_started_at = Some(now);
        let buffering = self.buffering_duration(now);
        debug!(buffering_ms = buffering.as_millis() as u64, "playback started");
        fx.events.push(PlaybackEvent::Started);
        fx.record(
            EventKind::VideoPlay,
            attrs([(ATTR_BUFFERING_DURATION, json!(buffering.as_millis() as u64))]),
        );
        self.emit_position(VideoPosition::Start, fx);
    }

    /// Emit `marker` unless it already fired this session.
    pub fn emit_position(&mut self, marker: VideoPosition, fx: &mut Effects) {
        if self.emitted.insert(marker) {
            fx.events.push(PlaybackEvent::PositionReached(marker));
            fx.record(
                EventKind::VideoPosition,
                attrs([(ATTR_POSITION, json!(marker.as_str()))]),
            );
        }
    }

    /// Move to `StoppedOnError` and surface `error`. Ignored once stopped.
    pub fn fail(&mut self, error: PlaybackError, fx: &mut Effects) {
        if self.lifecycle.is_stopped() {
            return;
        }
        self.lifecycle = MonitorState::StoppedOnError;
        self.halt_timer();
        fx.record(
            EventKind::VideoError,
            attrs([
                (ATTR_REASON, json!(error.kind())),
                ("message", json!(error.to_string())),
            ]),
        );
        fx.events.push(PlaybackEvent::Error(error));
    }

    /// Completed minus started. Freezes the completion time on first call if
    /// buffering never finished.
    pub fn buffering_duration(&mut self, now: Instant) -> Duration {
        let completed = *self.buffering_completed_at.get_or_insert(now);
        match self.buffering_started_at {
            Some(started) => completed.saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }

    pub fn back_button_gate(&self, now: Instant, grace_secs: u64) -> BackButtonGate {
        if grace_secs == 0 {
            return BackButtonGate::Allowed;
        }
        let Some(started) = self.video_started_at else {
            return BackButtonGate::NotStarted;
        };
        let grace = Duration::from_secs(grace_secs);
        let elapsed = now.saturating_duration_since(started);
        match grace.checked_sub(elapsed) {
            Some(left) if !left.is_zero() => BackButtonGate::Wait(left.as_secs_f64().ceil() as u64),
            _ => BackButtonGate::Allowed,
        }
    }
}
