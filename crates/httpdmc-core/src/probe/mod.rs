//! Object metadata and listings.
//!
//! Tries WebDAV PROPFIND first and falls back to HEAD when the server does
//! not understand it. Redirects are followed (with cookies replayed) up to a
//! hop budget; transient failures are retried per [`RetryPolicy`]. Plain HTTP
//! directory listings are read from HTML index pages.

mod dav;
mod index;

use std::io::Read;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use url::Url;

use crate::error::{DmcError, Result};
use crate::pool::{ConnectionPool, Endpoint};
use crate::retry::{classify_status, classify_transport, is_transient_status, RetryBudget, RetryPolicy};
use crate::url_model::{name_from_url, percent_decode, request_path, resolve_redirect};
use crate::wire::{Method, Request, RequestBody, Response, ResponseBody};

pub use dav::{parse_multistatus, DavEntry, PROPFIND_BODY};
pub use index::{child_entries, extract_hrefs, IndexEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Collection,
}

/// What a probe learned about one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub name: String,
    pub kind: ObjectKind,
    pub size: Option<u64>,
    pub modified: Option<DateTime<Utc>>,
    /// Where the object was found after redirects.
    pub location: Url,
}

/// Parses an HTTP date (`Wed, 21 Oct 2015 07:28:00 GMT`).
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parses an ISO 8601 / RFC 3339 timestamp (WebDAV `creationdate`).
pub fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reads at most `limit` bytes of a response body.
fn read_capped(body: ResponseBody, limit: u64) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    body.into_reader()
        .take(limit)
        .read_to_end(&mut out)
        .map_err(|e| DmcError::Transport(e.to_string()))?;
    Ok(out)
}

/// Metadata prober bound to a connection pool.
#[derive(Debug, Clone)]
pub struct Prober {
    pool: Arc<ConnectionPool>,
    policy: RetryPolicy,
    max_redirects: u32,
    listing_body_limit: u64,
}

impl Prober {
    pub fn new(
        pool: Arc<ConnectionPool>,
        policy: RetryPolicy,
        max_redirects: u32,
        listing_body_limit: u64,
    ) -> Self {
        Self {
            pool,
            policy,
            max_redirects,
            listing_body_limit,
        }
    }

    /// Metadata of the object at `url`.
    pub fn probe(&self, url: &Url) -> Result<ObjectMetadata> {
        let mut ex = Exchange::new(self, url.clone());
        let resp = ex.send(|path| propfind(path, 0))?;
        if resp.is_success() {
            let body = read_capped(resp.body, self.listing_body_limit)?;
            let entries = parse_multistatus(&String::from_utf8_lossy(&body));
            if let Some(entry) = entries.into_iter().next() {
                return Ok(self.entry_metadata(&ex.url, &entry));
            }
            tracing::debug!("PROPFIND on {} gave no entries, trying HEAD", ex.url);
        } else if !method_not_understood(resp.status) {
            return Err(DmcError::status(resp.status, resp.reason));
        }
        self.head(ex)
    }

    /// Entries of the collection at `url` (or the object itself when it is a
    /// file). With `detail`, HTML index entries are probed individually for
    /// size and modification time.
    pub fn list(&self, url: &Url, detail: bool) -> Result<Vec<ObjectMetadata>> {
        let mut ex = Exchange::new(self, url.clone());
        let resp = ex.send(|path| propfind(path, 1))?;
        if resp.is_success() {
            let body = read_capped(resp.body, self.listing_body_limit)?;
            let entries = parse_multistatus(&String::from_utf8_lossy(&body));
            if !entries.is_empty() {
                return Ok(self.dav_listing(&ex.url, entries));
            }
        } else if !method_not_understood(resp.status) {
            return Err(DmcError::status(resp.status, resp.reason));
        }

        let resp = ex.send(|path| Request::new(Method::Head, path))?;
        if !resp.is_success() {
            return Err(DmcError::status(resp.status, resp.reason));
        }
        let is_html = resp
            .headers
            .content_type
            .as_deref()
            .is_some_and(|t| t.trim().to_ascii_lowercase().starts_with("text/html"));
        if !is_html {
            return Ok(vec![head_metadata(&ex.url, &resp)]);
        }

        let resp = ex.send(|path| Request::new(Method::Get, path))?;
        if !resp.is_success() {
            return Err(DmcError::status(resp.status, resp.reason));
        }
        let body = read_capped(resp.body, self.listing_body_limit)?;
        let hrefs = extract_hrefs(&String::from_utf8_lossy(&body));
        let mut out = Vec::new();
        for entry in child_entries(&ex.url, &hrefs) {
            let basic = ObjectMetadata {
                name: entry.name.clone(),
                kind: if entry.collection {
                    ObjectKind::Collection
                } else {
                    ObjectKind::File
                },
                size: None,
                modified: None,
                location: entry.url.clone(),
            };
            if detail && !entry.collection {
                match self.head(Exchange::new(self, entry.url.clone())) {
                    Ok(mut m) => {
                        m.name = entry.name;
                        out.push(m);
                    }
                    Err(e) => {
                        tracing::warn!("HEAD {} failed during listing: {}", entry.url, e);
                        out.push(basic);
                    }
                }
            } else {
                out.push(basic);
            }
        }
        Ok(out)
    }

    fn head(&self, mut ex: Exchange<'_>) -> Result<ObjectMetadata> {
        let resp = ex.send(|path| Request::new(Method::Head, path))?;
        if !resp.is_success() {
            return Err(DmcError::status(resp.status, resp.reason));
        }
        Ok(head_metadata(&ex.url, &resp))
    }

    fn entry_metadata(&self, base: &Url, entry: &DavEntry) -> ObjectMetadata {
        let location = base.join(&entry.href).unwrap_or_else(|_| base.clone());
        ObjectMetadata {
            name: name_from_url(&location),
            kind: if entry.collection {
                ObjectKind::Collection
            } else {
                ObjectKind::File
            },
            size: entry.size,
            modified: entry.modified,
            location,
        }
    }

    fn dav_listing(&self, base: &Url, entries: Vec<DavEntry>) -> Vec<ObjectMetadata> {
        let own_path = percent_decode(base.path().trim_end_matches('/'));
        let all: Vec<ObjectMetadata> = entries
            .iter()
            .map(|e| self.entry_metadata(base, e))
            .collect();
        let (own, children): (Vec<_>, Vec<_>) = all
            .into_iter()
            .partition(|m| percent_decode(m.location.path().trim_end_matches('/')) == own_path);
        match own.into_iter().next() {
            Some(me) if me.kind == ObjectKind::File => vec![me],
            _ => children,
        }
    }
}

fn propfind(path: &str, depth: u8) -> Request {
    Request::new(Method::Propfind, path)
        .with_header("Depth", depth.to_string())
        .with_header("Content-Type", "application/xml; charset=utf-8")
        .with_body(RequestBody::Bytes(PROPFIND_BODY.as_bytes().to_vec()))
}

fn method_not_understood(status: u16) -> bool {
    matches!(status, 405 | 501)
}

fn head_metadata(url: &Url, resp: &Response) -> ObjectMetadata {
    ObjectMetadata {
        name: name_from_url(url),
        kind: ObjectKind::File,
        size: resp.headers.content_length,
        modified: resp
            .headers
            .last_modified
            .as_deref()
            .and_then(parse_http_date),
        location: url.clone(),
    }
}

/// One logical request that may hop across redirects. The target URL and
/// collected cookies persist across calls to [`Exchange::send`].
struct Exchange<'p> {
    prober: &'p Prober,
    url: Url,
    cookies: Vec<String>,
    hops: u32,
}

impl<'p> Exchange<'p> {
    fn new(prober: &'p Prober, url: Url) -> Self {
        Self {
            prober,
            url,
            cookies: Vec::new(),
            hops: 0,
        }
    }

    fn remember_cookies(&mut self, set: &[String]) {
        for cookie in set {
            let name = cookie.split('=').next().unwrap_or("");
            self.cookies
                .retain(|c| c.split('=').next().unwrap_or("") != name);
            self.cookies.push(cookie.clone());
        }
    }

    /// Sends the request built by `build` for the current target. Returns the
    /// first response that is neither a redirect nor a retried transient
    /// failure.
    fn send(&mut self, build: impl Fn(&str) -> Request) -> Result<Response> {
        let pool = &self.prober.pool;
        let mut budget = RetryBudget::new(self.prober.policy);
        let mut fresh = false;
        loop {
            let endpoint = Endpoint::from_url(&self.url)?;
            let connected = if fresh {
                pool.acquire_fresh(&endpoint)
            } else {
                pool.acquire(&endpoint)
            };
            let mut request = build(&request_path(&self.url));
            if !self.cookies.is_empty() {
                request = request.with_header("Cookie", self.cookies.join("; "));
            }
            let method = request.method;
            let result = connected.and_then(|mut client| {
                let r = client.request(request);
                pool.release(&endpoint, client);
                r
            });
            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::warn!("{} {} failed: {}", method, self.url, e);
                    if budget.retry(classify_transport(&e)) {
                        fresh = true;
                        continue;
                    }
                    return Err(e.into());
                }
            };
            tracing::debug!("{} {} -> {}", method, self.url, resp.status);

            if resp.is_redirect() {
                self.hops += 1;
                if self.hops > self.prober.max_redirects {
                    return Err(DmcError::TooManyRedirects(self.prober.max_redirects));
                }
                self.remember_cookies(&resp.headers.cookies);
                let location = resp.headers.location.as_deref().unwrap_or_default();
                self.url = resolve_redirect(&self.url, location)?;
                tracing::debug!("redirected to {}", self.url);
                fresh = false;
                continue;
            }
            if is_transient_status(resp.status) && budget.retry(classify_status(resp.status)) {
                tracing::warn!("{} {} returned {}, retrying", method, self.url, resp.status);
                fresh = true;
                continue;
            }
            return Ok(resp);
        }
    }
}
