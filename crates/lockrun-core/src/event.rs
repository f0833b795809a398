//! Lock acquisition events flowing from a backend to its supervisor.
//!
//! A backend reports acquisition edges through [`LockEvents`]; a single
//! consumer drains them from [`LockEventStream`]. The sender tracks whether
//! an acquisition epoch is open, so the consumer always sees `Acquired`
//! and `Lost` strictly alternating, starting with `Acquired`.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{LockError, LockResult};

/// Events are strictly alternating, so the queue never holds more than a
/// couple of entries.
const EVENT_QUEUE_CAPACITY: usize = 4;

/// An acquisition edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// The lock is now held by this process.
    Acquired,
    /// The lock previously reported as acquired is no longer held.
    Lost,
}

/// Creates a connected event sender and stream.
pub fn lock_events() -> (LockEvents, LockEventStream) {
    let (sender, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    (
        LockEvents {
            sender,
            epoch_open: false,
            epoch: 0,
        },
        LockEventStream { receiver },
    )
}

/// Backend half of the event channel.
#[derive(Debug)]
pub struct LockEvents {
    sender: mpsc::Sender<LockEvent>,
    epoch_open: bool,
    epoch: u64,
}

impl LockEvents {
    /// Reports a successful acquisition, opening a new epoch.
    ///
    /// Fails if the previous epoch was never closed.
    pub async fn acquired(&mut self) -> LockResult<()> {
        if self.epoch_open {
            return Err(LockError::backend(format!(
                "acquisition reported while epoch {} is still open",
                self.epoch
            )));
        }
        self.epoch += 1;
        self.epoch_open = true;
        debug!(epoch = self.epoch, "lock acquired");
        self.send(LockEvent::Acquired).await
    }

    /// Reports that the current epoch ended.
    ///
    /// Does nothing if no epoch is open.
    pub async fn lost(&mut self) -> LockResult<()> {
        if !self.epoch_open {
            return Ok(());
        }
        self.epoch_open = false;
        debug!(epoch = self.epoch, "lock lost");
        self.send(LockEvent::Lost).await
    }

    /// Closes the current epoch, if any, before the backend returns.
    pub async fn close_epoch(&mut self) -> LockResult<()> {
        self.lost().await
    }

    /// Returns whether an acquisition epoch is open.
    pub fn is_held(&self) -> bool {
        self.epoch_open
    }

    /// Number of epochs opened so far.
    pub fn epochs(&self) -> u64 {
        self.epoch
    }

    async fn send(&self, event: LockEvent) -> LockResult<()> {
        // A dropped consumer means nobody supervises the lock any more.
        self.sender.send(event).await.map_err(|_| LockError::Cancelled)
    }
}

/// Consumer half of the event channel.
#[derive(Debug)]
pub struct LockEventStream {
    receiver: mpsc::Receiver<LockEvent>,
}

impl LockEventStream {
    /// Receives the next event, or `None` once the backend is gone.
    pub async fn recv(&mut self) -> Option<LockEvent> {
        self.receiver.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_alternate() {
        let (mut events, mut stream) = lock_events();

        events.lost().await.unwrap();
        events.acquired().await.unwrap();
        assert!(events.acquired().await.is_err());
        events.lost().await.unwrap();
        events.lost().await.unwrap();
        events.acquired().await.unwrap();
        events.close_epoch().await.unwrap();
        assert_eq!(events.epochs(), 2);
        drop(events);

        let mut seen = Vec::new();
        while let Some(event) = stream.recv().await {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                LockEvent::Acquired,
                LockEvent::Lost,
                LockEvent::Acquired,
                LockEvent::Lost
            ]
        );
    }

    #[tokio::test]
    async fn test_dropped_stream_reports_cancelled() {
        let (mut events, stream) = lock_events();
        drop(stream);
        assert!(matches!(
            events.acquired().await,
            Err(LockError::Cancelled)
        ));
    }
}
