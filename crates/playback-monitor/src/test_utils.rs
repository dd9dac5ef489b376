//! Scriptable fakes for the media, device and telemetry contracts.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::MediaError;
use crate::media::{Device, MediaSource};
use crate::telemetry::{Attributes, EventKind, InstrumentationSink};

/// Decoder calls observed by [`ScriptedMedia`].
#[derive(Debug, Clone, PartialEq)]
pub enum MediaCall {
    SetDataSource(PathBuf),
    Start,
    Pause,
    Stop,
    SetVolume(f32),
}

/// Media source that replays queued readings.
///
/// Each `current_position` call pops the next scripted value; once the script
/// runs out the last successful position repeats.
#[derive(Debug)]
pub struct ScriptedMedia {
    positions: Mutex<VecDeque<Result<f64, MediaError>>>,
    last_position: Mutex<f64>,
    duration: Mutex<Result<u64, MediaError>>,
    buffer: Mutex<Result<u8, MediaError>>,
    reject_source: AtomicBool,
    calls: Mutex<Vec<MediaCall>>,
}

impl ScriptedMedia {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            positions: Mutex::new(VecDeque::new()),
            last_position: Mutex::new(0.0),
            duration: Mutex::new(Ok(duration_ms)),
            buffer: Mutex::new(Ok(100)),
            reject_source: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push_positions(&self, positions: impl IntoIterator<Item = f64>) {
        self.positions.lock().extend(positions.into_iter().map(Ok));
    }

    pub fn push_position_error(&self) {
        self.positions
            .lock()
            .push_back(Err(MediaError::query("getCurrentPosition", "scripted failure")));
    }

    pub fn set_duration(&self, duration: Result<u64, MediaError>) {
        *self.duration.lock() = duration;
    }

    pub fn set_buffer(&self, buffer: Result<u8, MediaError>) {
        *self.buffer.lock() = buffer;
    }

    pub fn reject_data_source(&self) {
        self.reject_source.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &MediaCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn last_volume(&self) -> Option<f32> {
        self.calls.lock().iter().rev().find_map(|call| match call {
            MediaCall::SetVolume(volume) => Some(*volume),
            _ => None,
        })
    }
}

impl MediaSource for ScriptedMedia {
    fn set_data_source(&self, path: &Path) -> Result<(), MediaError> {
        self.calls
            .lock()
            .push(MediaCall::SetDataSource(path.to_path_buf()));
        if self.reject_source.load(Ordering::SeqCst) {
            return Err(MediaError::DataSource {
                path: path.to_path_buf(),
                reason: "unsupported container".to_owned(),
            });
        }
        Ok(())
    }

    fn current_position(&self) -> Result<f64, MediaError> {
        match self.positions.lock().pop_front() {
            Some(Ok(position)) => {
                *self.last_position.lock() = position;
                Ok(position)
            }
            Some(Err(e)) => Err(e),
            None => Ok(*self.last_position.lock()),
        }
    }

    fn duration(&self) -> Result<u64, MediaError> {
        self.duration.lock().clone()
    }

    fn buffer_percentage(&self) -> Result<u8, MediaError> {
        self.buffer.lock().clone()
    }

    fn start(&self) {
        self.calls.lock().push(MediaCall::Start);
    }

    fn pause(&self) {
        self.calls.lock().push(MediaCall::Pause);
    }

    fn stop(&self) {
        self.calls.lock().push(MediaCall::Stop);
    }

    fn set_volume(&self, volume: f32) {
        self.calls.lock().push(MediaCall::SetVolume(volume));
    }
}

#[derive(Debug)]
pub struct FakeDevice {
    screen_on: AtomicBool,
    volume: Mutex<f32>,
}

impl FakeDevice {
    pub fn new(volume: f32) -> Self {
        Self {
            screen_on: AtomicBool::new(true),
            volume: Mutex::new(volume),
        }
    }

    pub fn set_screen_on(&self, on: bool) {
        self.screen_on.store(on, Ordering::SeqCst);
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume;
    }
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new(0.8)
    }
}

impl Device for FakeDevice {
    fn is_screen_on(&self) -> bool {
        self.screen_on.load(Ordering::SeqCst)
    }

    fn media_volume(&self) -> f32 {
        *self.volume.lock()
    }
}

/// Keeps every record for later inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<(EventKind, String, Attributes)>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<(EventKind, String, Attributes)> {
        self.records.lock().clone()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<Attributes> {
        self.records
            .lock()
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .map(|(_, _, attrs)| attrs.clone())
            .collect()
    }
}

impl InstrumentationSink for RecordingSink {
    fn record(&self, kind: EventKind, campaign_id: &str, attributes: Attributes) {
        self.records
            .lock()
            .push((kind, campaign_id.to_owned(), attributes));
    }
}
