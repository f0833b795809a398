//! Cancellation token shared between a locking system and its callers.

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable, one-way cancellation flag.
///
/// Every clone observes the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
}

impl Cancellation {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Requests cancellation. Calling this more than once is harmless.
    pub fn cancel(&self) {
        self.sender.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    /// Returns whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so `wait_for` can only fail if it is
        // dropped, which cannot happen while we borrow it.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Returns a token cancelled when either `self` or `other` is.
    ///
    /// The returned token can also be cancelled on its own without
    /// affecting its parents.
    pub fn merged(&self, other: &Cancellation) -> Cancellation {
        let merged = Cancellation::new();
        if self.is_cancelled() || other.is_cancelled() {
            merged.cancel();
            return merged;
        }

        let child = merged.clone();
        let first = self.clone();
        let second = other.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = first.cancelled() => child.cancel(),
                _ = second.cancelled() => child.cancel(),
                _ = child.cancelled() => {}
            }
        });
        merged
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}
