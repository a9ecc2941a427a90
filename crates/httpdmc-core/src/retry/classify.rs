//! Classify HTTP statuses and transport failures into retry error kinds.

use crate::retry::policy::FailureKind;
use crate::wire::TransportError;

/// Classify an HTTP status code for retry decisions.
pub fn classify_status(code: u16) -> FailureKind {
    match code {
        408 => FailureKind::Timeout,
        429 | 503 => FailureKind::Throttled,
        500 | 502 | 504 => FailureKind::ServerError(code),
        _ => FailureKind::Fatal,
    }
}

/// Statuses worth repeating the same request for.
pub fn is_transient_status(code: u16) -> bool {
    classify_status(code) != FailureKind::Fatal
}

/// Classify a wire-level failure.
pub fn classify_transport(e: &TransportError) -> FailureKind {
    if e.timed_out {
        FailureKind::Timeout
    } else {
        FailureKind::Connection
    }
}
