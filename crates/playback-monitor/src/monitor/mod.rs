//! The playback monitor.
//!
//! A [`PlaybackMonitor`] owns one ad impression's playback session. A
//! background timer polls the [`MediaSource`] every `poll_interval` and turns
//! its noisy readings into one-shot [`PlaybackEvent`]s, telemetry records and
//! [`RenderIntent`]s for the UI queue.
//!
//! ```text
//! Created --play()--> Polling <--resume()/pause()--> Paused
//!                        |
//!                        +--teardown()----------> Stopped
//!                        +--stall / decoder error-> StoppedOnError
//!                        +--on_completion()------> StoppedOnCompletion
//! ```

mod state;

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, info, trace, warn};

use crate::config::PlaybackConfig;
use crate::error::PlaybackError;
use crate::events::{PlaybackEvent, PlaybackEventBroadcaster, VideoPosition};
use crate::media::{Device, MediaSource};
use crate::render::{RenderIntent, UiDispatcher};
use crate::telemetry::{
    ABORT_REASON_BACK, ABORT_REASON_SKIP, ATTR_BUFFERING_DURATION, ATTR_REASON, EventKind,
    InstrumentationSink,
};

use state::{Effects, PlaybackState, Sample, attrs};
pub use state::{BackButtonGate, MonitorState, SkipState};

pub struct PlaybackMonitor {
    campaign_id: String,
    config: PlaybackConfig,
    media: Arc<dyn MediaSource>,
    device: Arc<dyn Device>,
    ui: UiDispatcher,
    sink: Arc<dyn InstrumentationSink>,
    events: PlaybackEventBroadcaster,
    state: Mutex<PlaybackState>,
}

impl PlaybackMonitor {
    pub fn new(
        campaign_id: impl Into<String>,
        config: PlaybackConfig,
        media: Arc<dyn MediaSource>,
        device: Arc<dyn Device>,
        ui: UiDispatcher,
        sink: Arc<dyn InstrumentationSink>,
    ) -> Arc<Self> {
        let state = PlaybackState::new(&config);
        Arc::new(Self {
            campaign_id: campaign_id.into(),
            config,
            media,
            device,
            ui,
            sink,
            events: PlaybackEventBroadcaster::new(),
            state: Mutex::new(state),
        })
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> MonitorState {
        self.state.lock().lifecycle
    }

    pub fn skip_state(&self) -> SkipState {
        self.state.lock().skip
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    pub fn is_muted(&self) -> bool {
        self.state.lock().muted
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    pub fn position_ms(&self) -> f64 {
        self.state.lock().position_ms
    }

    pub fn is_polling(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    /// Hand `path` to the decoder and start playback and polling.
    ///
    /// A decoder that refuses the file is a terminal playback error: it is
    /// published to subscribers and also returned.
    pub fn play(self: &Arc<Self>, path: &Path) -> Result<(), PlaybackError> {
        {
            let state = self.state.lock();
            if state.lifecycle != MonitorState::Created || state.torn_down {
                return Err(PlaybackError::AlreadyStarted);
            }
        }

        info!(campaign_id = %self.campaign_id, path = %path.display(), "playing video");
        if let Err(e) = self.media.set_data_source(path) {
            let error = PlaybackError::data_source(path.display().to_string(), e.to_string());
            warn!(campaign_id = %self.campaign_id, error = %error, "decoder refused video");
            let mut fx = Effects::default();
            self.state.lock().fail(error.clone(), &mut fx);
            self.apply(fx);
            return Err(error);
        }

        let duration = self.media.duration().ok().filter(|d| *d > 0);
        let fx = {
            let mut state = self.state.lock();
            if state.lifecycle != MonitorState::Created || state.torn_down {
                return Err(PlaybackError::AlreadyStarted);
            }
            if let Some(duration) = duration {
                state.duration_ms = duration;
                state.duration_known = true;
            }
            state.lifecycle = MonitorState::Polling;
            state.buffering_started_at = Some(Instant::now());
            self.start_timer(&mut state);

            let mut fx = Effects::default();
            fx.intents
                .push(RenderIntent::SetTimeRemaining(state.remaining_secs()));
            if state.muted {
                fx.intents.push(RenderIntent::SetMuted(true));
            }
            fx.intents.push(RenderIntent::KeepScreenOn(true));
            fx
        };

        self.media.start();
        self.apply(fx);
        Ok(())
    }

    /// Decoder primed callback.
    pub fn on_prepared(&self) {
        let mut state = self.state.lock();
        if state.torn_down {
            return;
        }
        debug!(campaign_id = %self.campaign_id, "decoder prepared");
        state.prepared = true;
        if state.muted {
            self.apply_volume(&mut state, true);
        }
    }

    /// One poll. Normally driven by the internal timer.
    pub fn tick(&self) {
        if self.state() != MonitorState::Polling {
            return;
        }
        if !self.device.is_screen_on() {
            debug!(campaign_id = %self.campaign_id, "screen off, pausing video");
            self.pause();
            return;
        }

        let sample = Sample {
            position: self.media.current_position(),
            duration: self.media.duration(),
            buffer_percentage: self.media.buffer_percentage(),
        };
        let fx = self
            .state
            .lock()
            .advance(sample, Instant::now(), &self.config);
        self.apply(fx);
    }

    /// Pause the decoder and polling and show the paused overlay.
    pub fn pause(&self) {
        let fx = {
            let mut state = self.state.lock();
            if state.lifecycle != MonitorState::Polling {
                return;
            }
            state.lifecycle = MonitorState::Paused;
            state.halt_timer();
            self.media.pause();
            let mut fx = Effects::default();
            fx.intents.push(RenderIntent::KeepScreenOn(false));
            if !state.paused_overlay {
                state.paused_overlay = true;
                fx.intents.push(RenderIntent::ShowPausedOverlay);
            }
            fx
        };
        self.apply(fx);
    }

    /// Resume after [`pause`](Self::pause), e.g. when the user taps the player.
    pub fn resume(self: &Arc<Self>) {
        let fx = {
            let mut state = self.state.lock();
            if state.lifecycle != MonitorState::Paused || state.torn_down {
                return;
            }
            state.lifecycle = MonitorState::Polling;
            self.media.start();
            self.start_timer(&mut state);
            let mut fx = Effects::default();
            if state.paused_overlay {
                state.paused_overlay = false;
                fx.intents.push(RenderIntent::HidePausedOverlay);
            }
            fx.intents.push(RenderIntent::KeepScreenOn(true));
            fx
        };
        debug!(campaign_id = %self.campaign_id, "resuming video");
        self.apply(fx);
    }

    /// Decoder reached the end of the video.
    pub fn on_completion(&self) {
        let fx = {
            let mut state = self.state.lock();
            if !matches!(
                state.lifecycle,
                MonitorState::Polling | MonitorState::Paused
            ) {
                return;
            }
            state.lifecycle = MonitorState::StoppedOnCompletion;
            state.halt_timer();
            let mut fx = Effects::default();
            fx.intents.push(RenderIntent::KeepScreenOn(false));
            state.emit_position(VideoPosition::End, &mut fx);
            fx.events.push(PlaybackEvent::Completed);
            fx
        };
        info!(campaign_id = %self.campaign_id, "video completed");
        self.apply(fx);
    }

    /// Decoder error callback. Terminal.
    pub fn on_media_error(&self, what: i32, extra: i32) {
        warn!(campaign_id = %self.campaign_id, what, extra, "decoder reported an error");
        let mut fx = Effects::default();
        self.state
            .lock()
            .fail(PlaybackError::Decoder { what, extra }, &mut fx);
        self.apply(fx);
    }

    /// Honour the skip action. Returns `false` until skipping is unlocked.
    pub fn skip(&self) -> bool {
        let fx = {
            let mut state = self.state.lock();
            if state.torn_down || state.skip != SkipState::Enabled {
                return false;
            }
            let buffering = state.buffering_duration(Instant::now());
            let mut fx = Self::teardown_effects(&mut state);
            fx.record(
                EventKind::VideoAbort,
                attrs([
                    (ATTR_BUFFERING_DURATION, json!(buffering.as_millis() as u64)),
                    (ATTR_REASON, json!(ABORT_REASON_SKIP)),
                ]),
            );
            fx.events.push(PlaybackEvent::Skipped);
            fx
        };
        info!(campaign_id = %self.campaign_id, "video skipped");
        self.apply(fx);
        true
    }

    /// Back navigation. Tears the player down when the grace period allows it.
    pub fn on_back_pressed(&self) -> BackButtonGate {
        let (gate, fx) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let gate = state.back_button_gate(now, self.config.back_button_grace_secs);
            let allowed = gate == BackButtonGate::Allowed;
            let mut fx = Effects::default();
            if allowed && !state.torn_down {
                let buffering = state.buffering_duration(now);
                fx = Self::teardown_effects(&mut state);
                fx.record(
                    EventKind::VideoAbort,
                    attrs([
                        (ATTR_BUFFERING_DURATION, json!(buffering.as_millis() as u64)),
                        (ATTR_REASON, json!(ABORT_REASON_BACK)),
                    ]),
                );
            }
            fx.events.push(PlaybackEvent::BackButtonPressed { allowed });
            (gate, fx)
        };
        debug!(campaign_id = %self.campaign_id, gate = ?gate, "back button pressed");
        self.apply(fx);
        gate
    }

    /// Time left before back navigation is honoured.
    pub fn seconds_until_back_allowed(&self) -> BackButtonGate {
        self.state
            .lock()
            .back_button_gate(Instant::now(), self.config.back_button_grace_secs)
    }

    /// Mute or unmute. Ignored (returns `false`) until the decoder is primed
    /// and playback has started.
    pub fn set_muted(&self, muted: bool) -> bool {
        let mut state = self.state.lock();
        if state.torn_down || !(state.prepared && state.started) {
            debug!(campaign_id = %self.campaign_id, "mute ignored before playback start");
            return false;
        }
        if state.muted != muted {
            self.apply_volume(&mut state, muted);
            state.muted = muted;
            drop(state);
            self.ui.dispatch(RenderIntent::SetMuted(muted));
        }
        true
    }

    pub fn toggle_mute(&self) -> bool {
        let muted = self.is_muted();
        self.set_muted(!muted)
    }

    /// How long the video buffered before playback started.
    pub fn buffering_duration(&self) -> Duration {
        self.state.lock().buffering_duration(Instant::now())
    }

    /// Stop everything and remove the player surface. Safe to call repeatedly.
    pub fn teardown(&self) {
        let fx = {
            let mut state = self.state.lock();
            if state.torn_down {
                return;
            }
            Self::teardown_effects(&mut state)
        };
        self.apply(fx);
    }

    fn teardown_effects(state: &mut PlaybackState) -> Effects {
        state.torn_down = true;
        if !state.lifecycle.is_stopped() {
            state.lifecycle = MonitorState::Stopped;
        }
        state.halt_timer();
        let mut fx = Effects::default();
        fx.stop_decoder = true;
        fx.intents.push(RenderIntent::Teardown);
        fx
    }

    fn apply_volume(&self, state: &mut PlaybackState, muted: bool) {
        if muted {
            if state.stored_volume.is_none() {
                state.stored_volume = Some(self.device.media_volume());
            }
            self.media.set_volume(0.0);
        } else {
            self.media.set_volume(state.stored_volume.unwrap_or(1.0));
        }
    }

    /// Spawn the poll task. Called with the state lock held, right where the
    /// lifecycle becomes `Polling`.
    fn start_timer(self: &Arc<Self>, state: &mut PlaybackState) {
        if state.timer.is_some() {
            return;
        }
        let token = CancellationToken::new();
        state.timer = Some(token.clone());

        let monitor: Weak<Self> = Arc::downgrade(self);
        let period = self.config.poll_interval;
        let span = debug_span!("playback_poll", campaign_id = %self.campaign_id);
        tokio::spawn(
            async move {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = interval.tick() => {
                            let Some(monitor) = monitor.upgrade() else { break };
                            monitor.tick();
                        }
                    }
                }
                trace!("poll timer stopped");
            }
            .instrument(span),
        );
    }

    fn apply(&self, fx: Effects) {
        if fx.is_empty() {
            return;
        }
        if fx.stop_decoder {
            self.media.stop();
        }
        for intent in fx.intents {
            self.ui.dispatch(intent);
        }
        for (kind, attributes) in fx.telemetry {
            self.sink.record(kind, &self.campaign_id, attributes);
        }
        for event in fx.events {
            self.events.publish(event);
        }
    }
}

impl Drop for PlaybackMonitor {
    fn drop(&mut self) {
        self.state.get_mut().halt_timer();
    }
}

impl std::fmt::Debug for PlaybackMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackMonitor")
            .field("campaign_id", &self.campaign_id)
            .field("state", &self.state())
            .finish()
    }
}
