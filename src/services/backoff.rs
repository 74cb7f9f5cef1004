//! Rate-limit deadline shared by all accrual workers.
//!
//! A single instant before which no worker may call the accrual service.
//! Writers overwrite it unconditionally; the last writer wins.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

use crate::services::shutdown::wait_for_shutdown;

#[derive(Debug, Default)]
pub struct RateLimitGate {
    until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the deadline to `now + retry_after`.
    pub fn defer(&self, retry_after: Duration) -> Instant {
        let until = Instant::now() + retry_after;
        *self.until.lock().unwrap_or_else(|e| e.into_inner()) = Some(until);
        until
    }

    /// The deadline, if it is still in the future.
    pub fn deadline(&self) -> Option<Instant> {
        let until = *self.until.lock().unwrap_or_else(|e| e.into_inner());
        until.filter(|deadline| *deadline > Instant::now())
    }

    /// Waits out the deadline, including extensions made while waiting.
    /// Returns `false` if shutdown was requested first.
    pub async fn wait(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        while let Some(deadline) = self.deadline() {
            tracing::debug!(
                wait_secs = deadline.saturating_duration_since(Instant::now()).as_secs(),
                "Worker is waiting for rate limit to reset"
            );

            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => return false,
                _ = sleep_until(deadline) => {}
            }
        }

        !*shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_no_deadline_by_default() {
        let gate = RateLimitGate::new();
        assert!(gate.deadline().is_none());

        let (_tx, mut rx) = watch::channel(false);
        let start = Instant::now();
        assert!(gate.wait(&mut rx).await);
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_deadline() {
        let gate = RateLimitGate::new();
        let start = Instant::now();
        gate.defer(Duration::from_secs(5));

        let (_tx, mut rx) = watch::channel(false);
        assert!(gate.wait(&mut rx).await);
        assert!(Instant::now() - start >= Duration::from_secs(5));
        assert!(gate.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_writer_wins() {
        let gate = RateLimitGate::new();
        gate.defer(Duration::from_secs(60));
        let later = gate.defer(Duration::from_secs(5));
        assert_eq!(gate.deadline(), Some(later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_follows_extension() {
        let gate = std::sync::Arc::new(RateLimitGate::new());
        let start = Instant::now();
        gate.defer(Duration::from_secs(2));

        let extender = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            extender.defer(Duration::from_secs(5));
        });

        let (_tx, mut rx) = watch::channel(false);
        assert!(gate.wait(&mut rx).await);
        assert!(Instant::now() - start >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_interrupted_by_shutdown() {
        let gate = RateLimitGate::new();
        gate.defer(Duration::from_secs(3600));

        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let _ = tx.send(true);
        });

        let start = Instant::now();
        assert!(!gate.wait(&mut rx).await);
        assert!(Instant::now() - start < Duration::from_secs(3600));
    }
}
