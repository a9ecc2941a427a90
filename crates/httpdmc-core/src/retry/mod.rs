//! Retry and backoff policy.
//!
//! Classifies transport failures and HTTP statuses and decides whether (and
//! after how long) a ranged operation is attempted again. Workers carry a
//! [`RetryBudget`] per logical operation.

mod budget;
mod classify;
mod policy;

pub use budget::RetryBudget;
pub use classify::{classify_status, classify_transport, is_transient_status};
pub use policy::{FailureKind, RetryDecision, RetryPolicy};
