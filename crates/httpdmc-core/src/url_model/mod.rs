//! Location parsing: URL, embedded transfer options and redirect resolution.
//!
//! Locations look like `scheme://host[:port][;opt=val...]/path`. The option
//! string sits at the end of the authority and is stripped before the URL is
//! handed to the `url` crate.

mod options;
mod path;

use url::Url;

use crate::error::{DmcError, Result};

pub use options::TransferOptions;
pub use path::{name_from_url, percent_decode};

const SCHEMES: [&str; 4] = ["http", "https", "dav", "davs"];

/// Splits a raw location into its URL and transfer options.
pub fn parse_location(raw: &str) -> Result<(Url, TransferOptions)> {
    let raw = raw.trim();
    let (scheme, rest) = raw
        .split_once("://")
        .ok_or_else(|| DmcError::InvalidUrl(format!("missing scheme: {raw}")))?;
    let authority_end = rest
        .find(|c: char| matches!(c, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let (authority, option_str) = match authority.split_once(';') {
        Some((a, o)) => (a, o),
        None => (authority, ""),
    };
    let options = TransferOptions::parse(option_str)?;

    let cleaned = format!("{scheme}://{authority}{tail}");
    let url = Url::parse(&cleaned)?;
    check_url(&url)?;
    Ok((url, options))
}

/// Accepts only HTTP(S) and WebDAV(S) URLs with a host.
pub fn check_url(url: &Url) -> Result<()> {
    if !SCHEMES.contains(&url.scheme()) {
        return Err(DmcError::InvalidUrl(format!(
            "unsupported scheme {}: {url}",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DmcError::InvalidUrl(format!("URL missing host: {url}")));
    }
    Ok(())
}

/// Resolves a `Location` header against the URL that returned it.
pub fn resolve_redirect(base: &Url, location: &str) -> Result<Url> {
    let next = base.join(location.trim())?;
    check_url(&next)?;
    Ok(next)
}

/// Request target for `url`: path plus query.
pub fn request_path(url: &Url) -> String {
    let path = if url.path().is_empty() { "/" } else { url.path() };
    match url.query() {
        Some(q) => format!("{path}?{q}"),
        None => path.to_string(),
    }
}
