//! Single-slot terminal resize queue
//!
//! Resize events are out-of-band from terminal data. Only the most recent
//! size matters, so the queue holds at most one pending event and a push
//! that finds the slot occupied is dropped rather than blocking the client
//! reader.

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use jg_protocol::TerminalSize;

/// Feeds window-resize events to a remote exec session
pub struct TerminalSizeQueue {
    tx: mpsc::Sender<TerminalSize>,
    rx: Mutex<mpsc::Receiver<TerminalSize>>,
    stopped: CancellationToken,
}

impl TerminalSizeQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
            stopped: CancellationToken::new(),
        }
    }

    /// Offer a new size without blocking.
    ///
    /// Returns `false` when the event was dropped because the previous one
    /// has not been consumed yet, or because the queue is stopped.
    pub fn push(&self, size: TerminalSize) -> bool {
        if self.stopped.is_cancelled() {
            return false;
        }
        self.tx.try_send(size).is_ok()
    }

    /// Wait for the next size. Returns `None` once the queue is stopped.
    pub async fn next(&self) -> Option<TerminalSize> {
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.stopped.cancelled() => None,
            size = rx.recv() => size,
        }
    }

    /// Stop the queue, waking any pending `next`. Calling it again has no effect.
    pub fn stop(&self) {
        self.stopped.cancel();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }
}

impl Default for TerminalSizeQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_then_next() {
        let queue = TerminalSizeQueue::new();
        assert!(queue.push(TerminalSize::new(40, 120)));
        assert_eq!(queue.next().await, Some(TerminalSize::new(40, 120)));
    }

    #[tokio::test]
    async fn test_second_push_dropped_while_slot_full() {
        let queue = TerminalSizeQueue::new();
        assert!(queue.push(TerminalSize::new(24, 80)));
        assert!(!queue.push(TerminalSize::new(50, 200)));
        assert_eq!(queue.next().await, Some(TerminalSize::new(24, 80)));

        assert!(queue.push(TerminalSize::new(50, 200)));
        assert_eq!(queue.next().await, Some(TerminalSize::new(50, 200)));
    }

    #[tokio::test]
    async fn test_stop_wakes_pending_next() {
        let queue = Arc::new(TerminalSizeQueue::new());
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.stop();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("next did not return after stop")
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_rejects_pushes() {
        let queue = TerminalSizeQueue::new();
        queue.stop();
        queue.stop();
        assert!(queue.is_stopped());
        assert!(!queue.push(TerminalSize::default()));
        assert_eq!(queue.next().await, None);
    }
}
