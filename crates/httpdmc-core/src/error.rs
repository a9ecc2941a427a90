//! Error taxonomy surfaced to callers.

use std::fmt;

use crate::wire::TransportError;

/// Coarse classification of a failing HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    InvalidRequest,
    AccessDenied,
    NotFound,
    Timeout,
    TransientService,
    NotImplemented,
    Other,
}

impl StatusKind {
    pub fn from_status(code: u16) -> Self {
        match code {
            400 | 411 | 413 | 414 | 416 => StatusKind::InvalidRequest,
            401 | 403 | 407 => StatusKind::AccessDenied,
            404 | 410 => StatusKind::NotFound,
            408 | 504 => StatusKind::Timeout,
            429 | 500 | 502 | 503 => StatusKind::TransientService,
            405 | 501 => StatusKind::NotImplemented,
            _ => StatusKind::Other,
        }
    }
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::InvalidRequest => "invalid request",
            StatusKind::AccessDenied => "access denied",
            StatusKind::NotFound => "not found",
            StatusKind::Timeout => "timeout",
            StatusKind::TransientService => "service unavailable",
            StatusKind::NotImplemented => "not implemented",
            StatusKind::Other => "unexpected status",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DmcError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{kind}: HTTP {code} {reason}")]
    Status {
        kind: StatusKind,
        code: u16,
        reason: String,
    },
    #[error("too many redirects ({0})")]
    TooManyRedirects(u32),
    #[error("no transfer workers could be started")]
    NoWorkers,
    #[error("a transfer session is already active")]
    SessionActive,
    #[error("no transfer session is active")]
    NoSession,
    #[error("transfer aborted")]
    Aborted,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DmcError {
    pub fn status(code: u16, reason: impl Into<String>) -> Self {
        DmcError::Status {
            kind: StatusKind::from_status(code),
            code,
            reason: reason.into(),
        }
    }

    /// Status code for `Status` errors.
    pub fn code(&self) -> Option<u16> {
        match self {
            DmcError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<TransportError> for DmcError {
    fn from(e: TransportError) -> Self {
        DmcError::Transport(e.message)
    }
}

impl From<url::ParseError> for DmcError {
    fn from(e: url::ParseError) -> Self {
        DmcError::InvalidUrl(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DmcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_kinds() {
        assert_eq!(StatusKind::from_status(404), StatusKind::NotFound);
        assert_eq!(StatusKind::from_status(410), StatusKind::NotFound);
        assert_eq!(StatusKind::from_status(403), StatusKind::AccessDenied);
        assert_eq!(StatusKind::from_status(503), StatusKind::TransientService);
        assert_eq!(StatusKind::from_status(504), StatusKind::Timeout);
        assert_eq!(StatusKind::from_status(501), StatusKind::NotImplemented);
        assert_eq!(StatusKind::from_status(416), StatusKind::InvalidRequest);
        assert_eq!(StatusKind::from_status(418), StatusKind::Other);
    }

    #[test]
    fn status_error_display() {
        let e = DmcError::status(404, "Not Found");
        assert_eq!(e.to_string(), "not found: HTTP 404 Not Found");
        assert_eq!(e.code(), Some(404));
        assert_eq!(DmcError::NoSession.code(), None);
    }
}
