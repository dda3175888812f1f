//! Interval Sleeper
//!
//! Every poll loop waits through here so shutdown does not have to sit out the
//! rest of an interval.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The full interval elapsed
    Elapsed,
    /// The token fired first
    Cancelled,
}

impl Wake {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Wake::Cancelled)
    }
}

/// Sleep for `duration` unless `token` is cancelled first
pub async fn sleep(duration: Duration, token: &CancellationToken) -> Wake {
    if token.is_cancelled() {
        return Wake::Cancelled;
    }

    tokio::select! {
        _ = token.cancelled() => Wake::Cancelled,
        _ = tokio::time::sleep(duration) => Wake::Elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_sleep_elapses() {
        let token = CancellationToken::new();
        let wake = sleep(Duration::from_millis(5), &token).await;
        assert_eq!(wake, Wake::Elapsed);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_long_sleep() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let wake = sleep(Duration::from_secs(60), &token).await;
        assert!(wake.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(sleep(Duration::from_secs(60), &token).await, Wake::Cancelled);
    }
}
