// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cancellable confirmation countdown.
//!
//! Arming spawns a task that sleeps until the deadline and then posts a
//! message back to the controller. Cancelling (or dropping) the handle aborts
//! that task. A message that was already posted when the cancel happened is
//! recognised as stale by its generation number.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to one armed countdown.
#[derive(Debug)]
pub struct ConfirmationTimer {
    generation: u64,
    duration: Duration,
    started: Instant,
    task: JoinHandle<()>,
}

impl ConfirmationTimer {
    /// Arm a countdown that sends `message` on `tx` after `duration`.
    pub fn arm<T>(duration: Duration, generation: u64, tx: mpsc::UnboundedSender<T>, message: T) -> Self
    where
        T: Send + 'static,
    {
        let started = Instant::now();
        let deadline = started + duration;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Receiver gone means the controller stopped
            let _ = tx.send(message);
        });
        Self {
            generation,
            duration,
            started,
            task,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.duration.saturating_sub(self.elapsed())
    }

    /// Stop the countdown and return the time that was left.
    pub fn cancel(self) -> Duration {
        let remaining = self.remaining();
        self.task.abort();
        remaining
    }
}

impl Drop for ConfirmationTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = ConfirmationTimer::arm(Duration::from_secs(5), 1, tx, "fire");

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(timer.remaining(), Duration::from_secs(1));

        assert_eq!(rx.recv().await, Some("fire"));
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = ConfirmationTimer::arm(Duration::from_secs(5), 1, tx, "fire");

        tokio::time::advance(Duration::from_secs(2)).await;
        let remaining = timer.cancel();
        assert_eq!(remaining, Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(10)).await;
        // The aborted task dropped its sender, so the channel is closed and empty
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel::<&str>();
        {
            let _timer = ConfirmationTimer::arm(Duration::from_millis(100), 7, tx, "fire");
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await, None);
    }
}
