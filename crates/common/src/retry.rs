//! Retry policies for remote calls.
//!
//! A [`RetryPolicy`] is a pure function from an attempt index to a
//! "keep going?" decision and a wait duration. Policies hold no state, so a
//! single policy value can drive any number of concurrent retry loops.
//! [`wait_for_next_attempt`] turns a policy decision into an actual pause that
//! honours the caller's [`CallContext`].
//!
//! # Example
//!
//! ```ignore
//! let policy = MaxRetries::new(Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 2.0), 4);
//! let mut attempt = 0;
//! loop {
//!     match call().await {
//!         Err(e) if e.is_transient() => {
//!             wait_for_next_attempt(&ctx, &policy, attempt).await?;
//!             attempt += 1;
//!         }
//!         other => break other,
//!     }
//! }
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::context::{CallContext, ContextError};

/// Decides whether to retry and how long to wait first.
pub trait RetryPolicy: Send + Sync {
    /// Decision for the given zero-based retry index
    fn retry(&self, attempt: u32) -> (bool, Duration);
}

/// Why [`wait_for_next_attempt`] did not complete the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The caller cancelled the context
    #[error("retry wait cancelled")]
    Cancelled,

    /// The context deadline passes before the wait would end
    #[error("ran out of time while waiting for retry")]
    Timeout,

    /// The policy gave up
    #[error("gave up after {attempts} retries")]
    Exhausted { attempts: u32 },
}

impl From<ContextError> for WaitError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => WaitError::Cancelled,
            ContextError::DeadlineExceeded => WaitError::Timeout,
        }
    }
}

// ============================================================================
// Exponential Backoff
// ============================================================================

/// Unbounded exponential backoff capped at a maximum wait.
///
/// `wait(attempt) = min(initial_wait * multiplier^attempt, max_wait)`. The
/// policy never stops on its own; wrap it in [`MaxRetries`] or bound the
/// loop with a context deadline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Wait before the first retry
    pub initial_wait: Duration,
    /// Upper bound for any single wait
    pub max_wait: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Backoff {
    /// Create a new backoff policy
    pub fn new(initial_wait: Duration, max_wait: Duration, multiplier: f64) -> Self {
        trace!(
            initial_wait_ms = initial_wait.as_millis() as u64,
            max_wait_ms = max_wait.as_millis() as u64,
            multiplier = multiplier,
            "Creating backoff policy"
        );
        Self {
            initial_wait,
            max_wait,
            multiplier,
        }
    }

    /// Wait duration for the given attempt, never above `max_wait`
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_wait.as_secs_f64() * self.multiplier.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(wait) => wait.min(self.max_wait),
            // Overflow or a non-finite product saturates at the cap
            Err(_) => self.max_wait,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(5), 2.0)
    }
}

impl RetryPolicy for Backoff {
    fn retry(&self, attempt: u32) -> (bool, Duration) {
        (true, self.wait_for(attempt))
    }
}

/// Stops an inner policy after a fixed number of retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaxRetries<P> {
    policy: P,
    max_retries: u32,
}

impl<P: RetryPolicy> MaxRetries<P> {
    /// Allow at most `max_retries` retries of `policy`
    pub fn new(policy: P, max_retries: u32) -> Self {
        Self {
            policy,
            max_retries,
        }
    }
}

impl<P: RetryPolicy> RetryPolicy for MaxRetries<P> {
    fn retry(&self, attempt: u32) -> (bool, Duration) {
        if attempt >= self.max_retries {
            return (false, Duration::ZERO);
        }
        self.policy.retry(attempt)
    }
}

// ============================================================================
// Waiting
// ============================================================================

/// Pause before retry number `attempt`, as directed by `policy`.
///
/// Returns `Ok(())` once the wait elapses. Returns [`WaitError::Cancelled`]
/// as soon as `ctx` is cancelled (immediately if it already is), and
/// [`WaitError::Timeout`] when the deadline passes first. When the deadline
/// is already known to fall inside the wait there is no point sleeping, so
/// `Timeout` is returned right away.
pub async fn wait_for_next_attempt(
    ctx: &CallContext,
    policy: &dyn RetryPolicy,
    attempt: u32,
) -> Result<(), WaitError> {
    if let Some(err) = ctx.err() {
        return Err(err.into());
    }

    let (keep_going, wait) = policy.retry(attempt);
    if !keep_going {
        debug!(attempt = attempt, "Retry policy exhausted");
        return Err(WaitError::Exhausted { attempts: attempt });
    }

    if let Some(remaining) = ctx.remaining() {
        if remaining < wait {
            debug!(
                attempt = attempt,
                wait_ms = wait.as_millis() as u64,
                remaining_ms = remaining.as_millis() as u64,
                "Deadline falls inside retry wait"
            );
            return Err(WaitError::Timeout);
        }
    }

    debug!(
        attempt = attempt,
        wait_ms = wait.as_millis() as u64,
        "Waiting before next attempt"
    );
    ctx.run(tokio::time::sleep(wait)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_sequence_caps_at_max() {
        let policy = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);
        let expected = [1, 2, 4, 8, 10, 10].map(Duration::from_secs);

        for (attempt, want) in expected.iter().enumerate() {
            let (keep_going, wait) = policy.retry(attempt as u32);
            assert!(keep_going, "backoff must never stop on its own");
            assert_eq!(wait, *want, "attempt {attempt}");
        }
    }

    #[test]
    fn test_backoff_saturates_on_overflow() {
        let policy = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 10.0);
        assert_eq!(policy.wait_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_max_retries_stops() {
        let policy = MaxRetries::new(
            Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 2.0),
            3,
        );

        for attempt in 0..3 {
            assert!(policy.retry(attempt).0);
        }
        assert_eq!(policy.retry(3), (false, Duration::ZERO));
        assert!(!policy.retry(100).0);
    }

    #[tokio::test]
    async fn test_wait_on_cancelled_context_returns_immediately() {
        let ctx = CallContext::background();
        ctx.cancel();
        let policy = Backoff::new(Duration::from_secs(3600), Duration::from_secs(3600), 1.0);

        let started = std::time::Instant::now();
        let result = wait_for_next_attempt(&ctx, &policy, 0).await;

        assert_eq!(result, Err(WaitError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_past_deadline_is_timeout() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(1));
        let policy = Backoff::new(Duration::from_secs(3600), Duration::from_secs(3600), 1.0);

        let result = wait_for_next_attempt(&ctx, &policy, 0).await;

        assert_eq!(result, Err(WaitError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses_normally() {
        let ctx = CallContext::background().with_timeout(Duration::from_secs(60));
        let policy = Backoff::new(Duration::from_secs(1), Duration::from_secs(10), 2.0);

        let started = tokio::time::Instant::now();
        wait_for_next_attempt(&ctx, &policy, 2).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let ctx = CallContext::background();
        let policy = Backoff::new(Duration::from_secs(3600), Duration::from_secs(3600), 1.0);

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = wait_for_next_attempt(&ctx, &policy, 0).await;

        assert_eq!(result, Err(WaitError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_wait_exhausted() {
        let ctx = CallContext::background();
        let policy = MaxRetries::new(Backoff::default(), 0);

        let result = wait_for_next_attempt(&ctx, &policy, 0).await;

        assert_eq!(result, Err(WaitError::Exhausted { attempts: 0 }));
    }

    proptest! {
        #[test]
        fn prop_backoff_never_exceeds_max(
            initial_ms in 1u64..10_000,
            max_ms in 1u64..100_000,
            multiplier in 1.0f64..8.0,
            attempt in 0u32..200,
        ) {
            let policy = Backoff::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
                multiplier,
            );
            let (keep_going, wait) = policy.retry(attempt);
            prop_assert!(keep_going);
            prop_assert!(wait <= Duration::from_millis(max_ms));
        }
    }
}
