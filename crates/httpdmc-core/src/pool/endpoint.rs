use url::Url;

use crate::error::{DmcError, Result};

/// Key for pooled connections.
///
/// URLs are normalised down to `(scheme, host, port)` so that different paths
/// on the same origin share connections. WebDAV schemes map onto the HTTP
/// scheme they are carried over.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn from_url(url: &Url) -> Result<Self> {
        let scheme = match url.scheme() {
            "http" | "dav" => "http",
            "https" | "davs" => "https",
            other => {
                return Err(DmcError::InvalidUrl(format!(
                    "unsupported scheme {other}: {url}"
                )))
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| DmcError::InvalidUrl(format!("URL missing host: {url}")))?
            .to_string();
        let port = url.port().unwrap_or(if scheme == "https" { 443 } else { 80 });
        Ok(Self {
            scheme: scheme.to_string(),
            host,
            port,
        })
    }

    /// `scheme://host:port` without a trailing slash.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}
