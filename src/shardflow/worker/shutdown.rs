//! One-shot shutdown signalling
//!
//! Each worker carries a `ShutdownSignal` that the harness (or anything else
//! holding a clone) can trigger exactly once. Shard processors hold a
//! `ShutdownWatch` and observe the flag only at safe boundaries (a batch
//! close or an idle wait), never mid-commit.

use log::debug;
use tokio::sync::watch;

/// Trigger side of a worker's one-shot shutdown flag
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a watch that resolves once the signal is triggered
    pub fn subscribe(&self) -> ShutdownWatch {
        ShutdownWatch {
            receiver: self.sender.subscribe(),
        }
    }

    /// Set the flag. Triggering more than once is harmless.
    pub fn trigger(&self) {
        if !*self.sender.borrow() {
            debug!("Shutdown signal triggered");
        }
        let _ = self.sender.send(true);
    }

    /// Whether the signal has been triggered
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a worker's shutdown flag
#[derive(Clone)]
pub struct ShutdownWatch {
    receiver: watch::Receiver<bool>,
}

impl ShutdownWatch {
    /// Resolve once the signal is triggered; resolves immediately if it
    /// already was
    pub async fn triggered(&mut self) {
        // A dropped, never-triggered sender can never fire; wait forever
        // rather than reporting a phantom shutdown.
        if self
            .receiver
            .wait_for(|triggered| *triggered)
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }

    /// Non-blocking check of the flag
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_resolves_watchers() {
        let signal = ShutdownSignal::new();
        let mut watch = signal.subscribe();
        assert!(!watch.is_triggered());

        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        tokio::time::timeout(Duration::from_secs(1), watch.triggered())
            .await
            .expect("watch did not resolve");
        assert!(watch.is_triggered());
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        signal.trigger();
        let mut watch = signal.subscribe();
        // Already-triggered signal resolves immediately
        tokio::time::timeout(Duration::from_millis(50), watch.triggered())
            .await
            .expect("watch did not resolve");
    }
}
