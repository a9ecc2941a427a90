//! Parse HTTP response header lines into status and [`ResponseHeaders`].

use crate::range::parse_content_range;

use super::ResponseHeaders;

/// Parses collected header lines. Interim responses (`100 Continue`) are
/// skipped: only the block after the last status line counts.
///
/// Returns `None` when no status line was seen.
pub fn parse_response_head(lines: &[String]) -> Option<(u16, String, ResponseHeaders)> {
    let start = lines.iter().rposition(|l| l.starts_with("HTTP/"))?;
    let (status, reason) = parse_status_line(&lines[start])?;
    let mut headers = ResponseHeaders::default();

    for line in &lines[start + 1..] {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            headers.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("content-range") {
            headers.content_range = parse_content_range(value);
        } else if name.eq_ignore_ascii_case("last-modified") {
            headers.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-type") {
            headers.content_type = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("location") {
            headers.location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("set-cookie") {
            if let Some(pair) = value.split(';').next().map(str::trim) {
                if pair.contains('=') {
                    headers.cookies.push(pair.to_string());
                }
            }
        } else if name.eq_ignore_ascii_case("connection") {
            headers.connection_close = value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("close"));
        }
    }

    Some((status, reason, headers))
}

fn parse_status_line(line: &str) -> Option<(u16, String)> {
    let mut parts = line.trim().splitn(3, ' ');
    let _version = parts.next()?;
    let status = parts.next()?.parse::<u16>().ok()?;
    let reason = parts.next().unwrap_or("").trim().to_string();
    Some((status, reason))
}
