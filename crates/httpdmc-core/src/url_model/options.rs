//! Per-location transfer options.

use crate::error::{DmcError, Result};

/// Options carried in the location's option string
/// (`;threads=N;httpgetpartial=yes;httpputpartial=yes`) or set
/// programmatically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// Requested parallel streams; the configured default when absent.
    pub streams: Option<usize>,
    /// Allow ranged GETs. Off means one whole-body GET.
    pub partial_get: bool,
    /// Allow ranged PUTs. Off means one whole-body PUT.
    pub partial_put: bool,
    /// Known object size (download hint, or declared upload size).
    pub size_hint: Option<u64>,
}

impl TransferOptions {
    pub fn with_streams(mut self, streams: usize) -> Self {
        self.streams = Some(streams);
        self
    }

    pub fn with_partial_get(mut self, on: bool) -> Self {
        self.partial_get = on;
        self
    }

    pub fn with_partial_put(mut self, on: bool) -> Self {
        self.partial_put = on;
        self
    }

    pub fn with_size_hint(mut self, size: Option<u64>) -> Self {
        self.size_hint = size;
        self
    }

    /// Parses `key=value` pairs separated by `;`. Unknown keys are ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut opts = TransferOptions::default();
        for item in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = item.split_once('=').unwrap_or((item, ""));
            let key = key.trim();
            let value = value.trim();
            if key.eq_ignore_ascii_case("threads") {
                let n = value
                    .parse::<usize>()
                    .map_err(|_| DmcError::InvalidUrl(format!("bad threads value: {value}")))?;
                opts.streams = Some(n);
            } else if key.eq_ignore_ascii_case("httpgetpartial") {
                opts.partial_get = parse_flag(key, value)?;
            } else if key.eq_ignore_ascii_case("httpputpartial") {
                opts.partial_put = parse_flag(key, value)?;
            } else {
                tracing::debug!("ignoring unknown URL option {}", key);
            }
        }
        Ok(opts)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(DmcError::InvalidUrl(format!("bad {key} value: {value}"))),
    }
}
