//! One-shot timer slots with cancel-before-create discipline.
//!
//! A [`TimerSlot`] holds at most one pending delayed command. Arming it
//! aborts whatever was pending, so no two timers for the same logical slot
//! can ever be live concurrently.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::Command;

#[derive(Default)]
pub struct TimerSlot {
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self { task: None }
    }

    /// Arm the slot: cancel any pending timer, then schedule `command` to be
    /// sent on `tx` after `delay`.
    pub fn arm(&mut self, delay: Duration, tx: mpsc::Sender<Command>, command: Command) {
        self.cancel();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command).await;
        }));
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut slot = TimerSlot::new();
        slot.arm(Duration::from_millis(500), tx, Command::SpeechTimeout);

        advance(Duration::from_millis(499)).await;
        assert!(rx.try_recv().is_err());

        advance(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(Command::SpeechTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_cancels_previous() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut slot = TimerSlot::new();
        slot.arm(Duration::from_millis(100), tx.clone(), Command::SpeechTimeout);
        slot.arm(Duration::from_millis(300), tx, Command::EmotionDebounceElapsed);

        advance(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());

        advance(Duration::from_millis(150)).await;
        assert_eq!(rx.recv().await, Some(Command::EmotionDebounceElapsed));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_delivery() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut slot = TimerSlot::new();
        slot.arm(Duration::from_millis(100), tx, Command::SpeechTimeout);
        slot.cancel();

        advance(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
        assert!(!slot.is_armed());
    }
}
