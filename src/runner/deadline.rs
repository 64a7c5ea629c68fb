//! The session deadline shared by every agent and the display.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// One absolute instant plus a cancellation token.
///
/// Set once at session start; clones share the same token, so cancelling
/// any clone (e.g. on Ctrl-C) ends the session everywhere.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    token: CancellationToken,
}

impl Deadline {
    pub fn new(at: Instant) -> Self {
        Self {
            at,
            token: CancellationToken::new(),
        }
    }

    /// Deadline `duration` from now.
    pub fn after(duration: Duration) -> Self {
        Self::new(Instant::now() + duration)
    }

    pub fn with_token(at: Instant, token: CancellationToken) -> Self {
        Self { at, token }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ends the session early.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// True once the instant has passed or the session was cancelled.
    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.at
    }

    /// Time left, zero when expired.
    pub fn remaining(&self) -> Duration {
        if self.is_cancelled() {
            return Duration::ZERO;
        }
        self.at.saturating_duration_since(Instant::now())
    }

    /// Sleeps for `duration`, waking early at the deadline or on cancellation.
    ///
    /// Returns true if the full duration elapsed with the session still live.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let wake = (Instant::now() + duration).min(self.at);
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = sleep_until(wake) => Instant::now() < self.at,
        }
    }

    /// Runs `fut` until it completes, the deadline passes, or the session is
    /// cancelled. Returns `None` in the latter two cases; `fut` is dropped.
    pub async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            result = timeout_at(self.at, fut) => result.ok(),
        }
    }

    /// Waits until the session ends.
    pub async fn wait(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = sleep_until(self.at) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_bounded_by_deadline() {
        let start = Instant::now();
        let deadline = Deadline::after(Duration::from_secs(3));
        assert!(deadline.sleep(Duration::from_secs(1)).await);
        assert!(!deadline.sleep(Duration::from_secs(10)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_at_deadline() {
        let deadline = Deadline::after(Duration::from_secs(2));
        let fast = deadline.run(async { 7 }).await;
        assert_eq!(fast, Some(7));

        let slow = deadline
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(slow.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_sleepers() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let clone = deadline.clone();
        let sleeper = tokio::spawn(async move { clone.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        deadline.cancel();
        assert!(!sleeper.await.unwrap());
        assert!(deadline.is_expired());
        assert!(deadline.run(async { 1 }).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_at_deadline() {
        let start = Instant::now();
        let deadline = Deadline::after(Duration::from_millis(300));
        deadline.wait().await;
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }
}
