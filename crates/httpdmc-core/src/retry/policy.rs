//! How many times a failed request is sent again, and after what pause.
//!
//! A "request" here is one ranged GET or PUT, a whole-body fallback, or one
//! metadata exchange. Every retry goes out on a fresh connection; the
//! attempt count restarts once a range completes, so a long transfer over a
//! flaky link is limited per range, not per session.

use std::time::Duration;

/// Why a request failed, as far as retrying is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connect or read timeout, or HTTP 408.
    Timeout,
    /// 429 or 503.
    Throttled,
    /// Reset, refused or broken-off connection; also a body that ended
    /// before its declared length.
    Connection,
    /// 500, 502 or 504.
    ServerError(u16),
    /// Anything the same request cannot fix: 4xx, 501, bad redirects.
    Fatal,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureKind::Fatal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    NoRetry,
    RetryAfter(Duration),
}

/// Attempt limit and pause schedule shared by every worker of a session.
///
/// With a zero `base_delay` (the default) retries go out immediately;
/// otherwise the pause doubles per attempt up to `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per request, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Pause before attempt `attempt + 1`.
    fn backoff(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(8);
        self.base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }

    /// Decision after attempt number `attempt` (1-based) failed with `kind`.
    pub fn decide(&self, attempt: u32, kind: FailureKind) -> RetryDecision {
        if attempt >= self.max_attempts || !kind.is_retryable() {
            return RetryDecision::NoRetry;
        }
        RetryDecision::RetryAfter(self.backoff(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_failures_are_final() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, FailureKind::Fatal), RetryDecision::NoRetry);
        assert!(FailureKind::ServerError(502).is_retryable());
    }

    #[test]
    fn default_resends_without_pause() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(1, FailureKind::Connection),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
        assert_eq!(
            p.decide(9, FailureKind::Timeout),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
        assert_eq!(p.decide(10, FailureKind::Timeout), RetryDecision::NoRetry);
    }

    #[test]
    fn pauses_double_up_to_the_cap() {
        let p = RetryPolicy {
            max_attempts: 20,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        };
        let pause = |a| match p.decide(a, FailureKind::Throttled) {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::NoRetry => panic!("attempt {} should be retried", a),
        };
        assert_eq!(pause(1), Duration::from_millis(250));
        assert_eq!(pause(2), Duration::from_millis(500));
        assert_eq!(pause(4), Duration::from_secs(2));
        assert_eq!(pause(12), p.max_delay);
    }

    #[test]
    fn attempt_limit_counts_the_first_attempt() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            p.decide(2, FailureKind::ServerError(500)),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(
            p.decide(3, FailureKind::ServerError(500)),
            RetryDecision::NoRetry
        );
    }
}
