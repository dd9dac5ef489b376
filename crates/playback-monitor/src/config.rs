use std::time::Duration;

/// Default interval between position polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Buffer fill (percent) below which the buffering overlay is shown.
pub const DEFAULT_BUFFER_THRESHOLD_PERCENT: u8 = 15;
pub const DEFAULT_MAX_BUFFERING_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    /// Seconds of playback before the skip action unlocks. 0 disables skipping.
    pub skip_after_secs: u64,
    /// Seconds after playback starts before back navigation is honoured. 0 disables the gate.
    pub back_button_grace_secs: u64,
    /// Longest wait for the first playhead movement before giving up.
    pub max_buffering_wait: Duration,
    /// Start muted.
    pub mute: bool,
    pub poll_interval: Duration,
    pub buffer_threshold_percent: u8,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            skip_after_secs: 0,
            back_button_grace_secs: 0,
            max_buffering_wait: DEFAULT_MAX_BUFFERING_WAIT,
            mute: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer_threshold_percent: DEFAULT_BUFFER_THRESHOLD_PERCENT,
        }
    }
}

impl PlaybackConfig {
    pub fn skip_enabled(&self) -> bool {
        self.skip_after_secs > 0
    }

    pub fn skip_threshold_ms(&self) -> f64 {
        (self.skip_after_secs * 1000) as f64
    }
}
