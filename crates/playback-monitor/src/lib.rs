//! # Playback Monitor
//!
//! Turns a polled, occasionally failing video decoder into a clean stream of
//! one-shot playback events and UI render intents for an in-app video ad.
//!
//! - [`PlaybackMonitor`] runs the 500 ms poll loop and the player lifecycle
//!   (play, pause/resume, skip, back button, mute, teardown).
//! - [`MediaSource`] and [`Device`] are the platform contracts it drives.
//! - [`UiDispatcher`]/[`RenderQueue`] carry [`RenderIntent`]s to the single
//!   rendering task.
//! - [`InstrumentationSink`] receives fire-and-forget telemetry.

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod monitor;
pub mod render;
pub mod telemetry;
pub mod test_utils;

pub use config::PlaybackConfig;
pub use error::{MediaError, PlaybackError};
pub use events::{PlaybackEvent, PlaybackEventBroadcaster, VideoPosition};
pub use media::{Device, MediaSource};
pub use monitor::{BackButtonGate, MonitorState, PlaybackMonitor, SkipState};
pub use render::{RenderIntent, RenderQueue, RenderSurface, UiDispatcher};
pub use telemetry::{Attributes, EventKind, InstrumentationSink, NullSink};
