//! Byte range type and header values.

/// End offset of a range that runs to the end of an object of unknown size.
pub const UNBOUNDED: u64 = u64::MAX;

/// A half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive). `UNBOUNDED` when the size is unknown.
    pub end: u64,
}

impl ByteRange {
    /// Range of `len` bytes starting at `start`.
    pub fn new(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Range covering everything from `start` to the end of the object.
    pub fn unbounded(start: u64) -> Self {
        Self {
            start,
            end: UNBOUNDED,
        }
    }

    /// Length of this range in bytes (`UNBOUNDED - start` when unbounded).
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn is_unbounded(&self) -> bool {
        self.end == UNBOUNDED
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Overlap of two ranges, `None` when they share no byte.
    pub fn intersect(&self, other: &ByteRange) -> Option<ByteRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(ByteRange { start, end })
    }

    /// Same range with its end clipped to `limit`.
    pub fn clip(&self, limit: u64) -> ByteRange {
        ByteRange {
            start: self.start.min(limit),
            end: self.end.min(limit),
        }
    }

    /// Curl range option value (inclusive end, no unit): `start-(end-1)` or `start-`.
    pub fn curl_range(&self) -> String {
        if self.is_unbounded() {
            format!("{}-", self.start)
        } else {
            format!("{}-{}", self.start, self.end.saturating_sub(1))
        }
    }

    /// HTTP `Range` request header value: `bytes=start-(end-1)`.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}", self.curl_range())
    }

    /// HTTP `Content-Range` value for sending this range: `bytes s-e/total` or `bytes s-e/*`.
    pub fn content_range_value(&self, total: Option<u64>) -> String {
        let total = total.map_or_else(|| "*".to_string(), |t| t.to_string());
        format!(
            "bytes {}-{}/{}",
            self.start,
            self.end.saturating_sub(1),
            total
        )
    }
}

/// Parsed `Content-Range` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Bytes carried by the response; `None` for `bytes */N` (416 replies).
    pub range: Option<ByteRange>,
    /// Complete object size when the server states it.
    pub total: Option<u64>,
}

/// Parses `bytes 0-99/1000`, `bytes 0-99/*` and `bytes */1000`.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let value = value.trim();
    let rest = value
        .strip_prefix("bytes")
        .or_else(|| value.strip_prefix("BYTES"))?
        .trim_start();
    let (span, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    let range = match span.trim() {
        "*" => None,
        s => {
            let (a, b) = s.split_once('-')?;
            let start = a.trim().parse::<u64>().ok()?;
            let end_incl = b.trim().parse::<u64>().ok()?;
            if end_incl < start {
                return None;
            }
            Some(ByteRange {
                start,
                end: end_incl.saturating_add(1),
            })
        }
    };
    Some(ContentRange { range, total })
}
