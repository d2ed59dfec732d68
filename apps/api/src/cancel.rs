//! Job-scoped cancellation.
//!
//! Every suspension point of a job (aggregation, content-service calls, PDF
//! rendering, backoff sleeps) races against `Cancellation::cancelled()`, so a
//! timeout or shutdown unwinds the job instead of leaking a task.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation handle. All clones observe the same flag.
#[derive(Clone, Debug)]
pub struct Cancellation {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trips the flag. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `cancel()` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives as long as `self`; unreachable in practice.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_all_clones() {
        let token = Cancellation::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        assert!(!token.is_cancelled());
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_already_tripped() {
        let token = Cancellation::new();
        token.cancel();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(50), token.cancelled())
            .await
            .expect("already-cancelled token must resolve at once");
    }
}
