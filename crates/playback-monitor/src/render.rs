//! Render intents and the single-consumer UI queue.
//!
//! Core logic never touches view state. It enqueues [`RenderIntent`]s through a
//! [`UiDispatcher`]; one rendering task owns the [`RenderQueue`] and applies
//! them to a [`RenderSurface`] in enqueue order.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "intent", content = "value", rename_all = "snake_case")]
pub enum RenderIntent {
    /// Status-line "buffering" indicator.
    SetBufferingIndicator(bool),
    /// Full-screen buffering spinner.
    AttachBufferingOverlay,
    DetachBufferingOverlay,
    /// Seconds left in the video.
    SetTimeRemaining(u64),
    /// Seconds until the skip action unlocks.
    SkipCountdown(u64),
    EnableSkip,
    HideSkip,
    ShowPausedOverlay,
    HidePausedOverlay,
    SetMuted(bool),
    KeepScreenOn(bool),
    /// Remove the player surface entirely.
    Teardown,
}

/// Applies intents to whatever actually draws the player.
pub trait RenderSurface {
    fn apply(&mut self, intent: RenderIntent);
}

impl RenderSurface for Vec<RenderIntent> {
    fn apply(&mut self, intent: RenderIntent) {
        self.push(intent);
    }
}

/// Cloneable producer side of the UI queue.
#[derive(Debug, Clone)]
pub struct UiDispatcher {
    sender: mpsc::UnboundedSender<RenderIntent>,
}

impl UiDispatcher {
    pub fn channel() -> (UiDispatcher, RenderQueue) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (UiDispatcher { sender }, RenderQueue { receiver })
    }

    /// Enqueue `intent` for the rendering task. Dropped if the queue is gone.
    pub fn dispatch(&self, intent: RenderIntent) {
        if let Err(e) = self.sender.send(intent) {
            trace!(intent = ?e.0, "render queue closed, dropping intent");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side of the UI queue.
#[derive(Debug)]
pub struct RenderQueue {
    receiver: mpsc::UnboundedReceiver<RenderIntent>,
}

impl RenderQueue {
    /// Apply intents until every dispatcher has been dropped.
    pub async fn run<S: RenderSurface>(mut self, surface: &mut S) {
        while let Some(intent) = self.receiver.recv().await {
            surface.apply(intent);
        }
    }

    /// Apply everything queued right now without waiting. Returns the count.
    pub fn drain_into<S: RenderSurface>(&mut self, surface: &mut S) -> usize {
        let mut applied = 0;
        while let Ok(intent) = self.receiver.try_recv() {
            surface.apply(intent);
            applied += 1;
        }
        applied
    }

    pub fn drain(&mut self) -> Vec<RenderIntent> {
        let mut intents = Vec::new();
        self.drain_into(&mut intents);
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn intents_arrive_in_enqueue_order() {
        let (ui, mut queue) = UiDispatcher::channel();
        ui.dispatch(RenderIntent::SetTimeRemaining(3));
        ui.clone().dispatch(RenderIntent::EnableSkip);
        ui.dispatch(RenderIntent::Teardown);
        assert_eq!(
            queue.drain(),
            vec![
                RenderIntent::SetTimeRemaining(3),
                RenderIntent::EnableSkip,
                RenderIntent::Teardown
            ]
        );
        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn run_stops_when_dispatchers_drop() {
        let (ui, queue) = UiDispatcher::channel();
        ui.dispatch(RenderIntent::KeepScreenOn(true));
        drop(ui);
        let mut surface = Vec::new();
        queue.run(&mut surface).await;
        assert_eq!(surface, vec![RenderIntent::KeepScreenOn(true)]);
    }

    #[test]
    fn dispatch_after_queue_dropped_is_silent() {
        let (ui, queue) = UiDispatcher::channel();
        drop(queue);
        assert!(ui.is_closed());
        ui.dispatch(RenderIntent::HideSkip);
    }

    #[test]
    fn intent_serializes_tagged() {
        let json = serde_json::to_value(RenderIntent::SkipCountdown(4)).unwrap();
        assert_eq!(json, serde_json::json!({"intent": "skip_countdown", "value": 4}));
    }
}
