//! Contracts for the platform pieces the monitor drives.

use std::path::Path;

use crate::error::MediaError;

/// A video decoder.
///
/// Query methods may fail transiently; `start`, `pause` and `stop` are
/// idempotent. Positions and durations are milliseconds.
pub trait MediaSource: Send + Sync + 'static {
    fn set_data_source(&self, path: &Path) -> Result<(), MediaError>;

    fn current_position(&self) -> Result<f64, MediaError>;

    fn duration(&self) -> Result<u64, MediaError>;

    /// 0..=100
    fn buffer_percentage(&self) -> Result<u8, MediaError>;

    fn start(&self);

    fn pause(&self);

    fn stop(&self);

    /// Player volume in `0.0..=1.0`.
    fn set_volume(&self, volume: f32);
}

/// Host device state read by the monitor.
pub trait Device: Send + Sync + 'static {
    fn is_screen_on(&self) -> bool;

    /// Current media stream volume in `0.0..=1.0`.
    fn media_volume(&self) -> f32;
}
