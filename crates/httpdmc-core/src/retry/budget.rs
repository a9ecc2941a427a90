//! Per-operation attempt counter.

use super::policy::{FailureKind, RetryDecision, RetryPolicy};

/// Counts attempts of one logical operation against a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    attempt: u32,
}

impl RetryBudget {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 1 }
    }

    /// Records a failed attempt. Sleeps for the backoff delay and returns
    /// true when another attempt is allowed.
    pub fn retry(&mut self, kind: FailureKind) -> bool {
        match self.policy.decide(self.attempt, kind) {
            RetryDecision::NoRetry => false,
            RetryDecision::RetryAfter(delay) => {
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                self.attempt += 1;
                true
            }
        }
    }

    /// Starts counting afresh after a successful operation.
    pub fn reset(&mut self) {
        self.attempt = 1;
    }

    /// Attempts made so far, including the current one.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
