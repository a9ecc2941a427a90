//! Request/response values and the black-box wire client contract.
//!
//! Everything above this module talks HTTP through [`WireClient::request`]:
//! one call, one tagged request, one tagged response. The libcurl binding
//! lives in [`curl_client`]; tests substitute scripted clients.

pub mod curl_client;
mod headers;

use std::fmt;
use std::io::{self, Read};

use crate::pool::Endpoint;
use crate::range::{ByteRange, ContentRange};

pub use curl_client::{CurlClient, CurlConnector, CurlOptions};
pub use headers::parse_response_head;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
    Propfind,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Propfind => "PROPFIND",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload.
pub enum RequestBody {
    Empty,
    Bytes(Vec<u8>),
    /// Streamed payload; `len` is sent as the declared size when known.
    Stream {
        reader: Box<dyn Read + Send>,
        len: Option<u64>,
    },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream { len, .. } => write!(f, "Stream(len={:?})", len),
        }
    }
}

/// One HTTP request against the endpoint the client is bound to.
#[derive(Debug)]
pub struct Request {
    pub method: Method,
    /// Path plus query, e.g. `/dir/file?x=1`.
    pub path: String,
    /// `Range` for GET, `Content-Range` for PUT.
    pub range: Option<ByteRange>,
    /// Object size announced in `Content-Range` of a ranged PUT.
    pub total_size: Option<u64>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl Request {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            range: None,
            total_size: None,
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_range(mut self, range: ByteRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_total_size(mut self, total: Option<u64>) -> Self {
        self.total_size = total;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Value of the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response headers the engine cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub last_modified: Option<String>,
    pub content_type: Option<String>,
    pub location: Option<String>,
    /// `name=value` pairs from `Set-Cookie`.
    pub cookies: Vec<String>,
    pub connection_close: bool,
}

/// Response payload.
pub enum ResponseBody {
    None,
    Bytes(Vec<u8>),
    Stream(Box<dyn Read + Send>),
}

impl ResponseBody {
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        match self {
            ResponseBody::None => Box::new(io::empty()),
            ResponseBody::Bytes(b) => Box::new(io::Cursor::new(b)),
            ResponseBody::Stream(r) => r,
        }
    }

    /// Number of bytes when known without reading.
    pub fn known_len(&self) -> Option<u64> {
        match self {
            ResponseBody::None => Some(0),
            ResponseBody::Bytes(b) => Some(b.len() as u64),
            ResponseBody::Stream(_) => None,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::None => f.write_str("None"),
            ResponseBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ResponseBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub reason: String,
    pub headers: ResponseHeaders,
    pub body: ResponseBody,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Redirect status carrying a `Location` header.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308) && self.headers.location.is_some()
    }
}

/// Failure below HTTP: connect, send, receive, timeout.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub timed_out: bool,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: true,
        }
    }
}

/// A connection bound to one endpoint.
pub trait WireClient: Send {
    fn request(&mut self, request: Request) -> Result<Response, TransportError>;

    /// False once the peer signalled close or the connection failed; such
    /// handles are not pooled.
    fn is_open(&self) -> bool;
}

/// Opens new connections.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn WireClient>, TransportError>;
}
