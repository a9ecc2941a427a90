//! Minimal WebDAV multistatus scanner.
//!
//! Only the handful of properties needed for metadata are picked up:
//! `href`, `getcontentlength`, `resourcetype/collection`, `getlastmodified`
//! and `creationdate`. Namespace prefixes are ignored.

use chrono::{DateTime, Utc};

use super::{parse_http_date, parse_iso_date};

/// Request body asking for the properties above.
pub const PROPFIND_BODY: &str = concat!(
    r#"<?xml version="1.0" encoding="utf-8"?>"#,
    r#"<D:propfind xmlns:D="DAV:"><D:prop>"#,
    r#"<D:resourcetype/><D:getcontentlength/><D:getlastmodified/><D:creationdate/>"#,
    r#"</D:prop></D:propfind>"#
);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DavEntry {
    pub href: String,
    pub size: Option<u64>,
    pub collection: bool,
    pub modified: Option<DateTime<Utc>>,
}

fn local_name(tag: &str) -> &str {
    let name = tag
        .split(|c: char| c.is_whitespace() || c == '/')
        .next()
        .unwrap_or("");
    name.rsplit(':').next().unwrap_or(name)
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extracts one entry per `response` element.
pub fn parse_multistatus(body: &str) -> Vec<DavEntry> {
    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut created: Option<DateTime<Utc>> = None;
    let mut text = String::new();
    let mut rest = body;

    while let Some(open) = rest.find('<') {
        text.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            break;
        };
        let tag = after[..close].trim();
        rest = &after[close + 1..];

        if tag.starts_with('?') || tag.starts_with('!') {
            continue;
        }
        if let Some(name) = tag.strip_prefix('/') {
            let value = decode_entities(text.trim());
            text.clear();
            let Some(entry) = current.as_mut() else {
                continue;
            };
            match local_name(name.trim()) {
                "href" if entry.href.is_empty() => entry.href = value,
                "getcontentlength" => entry.size = value.parse().ok(),
                "getlastmodified" => entry.modified = parse_http_date(&value),
                "creationdate" => created = parse_iso_date(&value),
                "response" => {
                    if let Some(mut done) = current.take() {
                        done.modified = done.modified.or(created.take());
                        entries.push(done);
                    }
                }
                _ => {}
            }
            continue;
        }

        text.clear();
        match local_name(tag) {
            "response" => {
                current = Some(DavEntry::default());
                created = None;
            }
            "collection" => {
                if let Some(entry) = current.as_mut() {
                    entry.collection = true;
                }
            }
            _ => {}
        }
    }
    entries
}
