//! Scripted in-process wire for integration tests.
//!
//! Every request is recorded (streamed bodies are read to the end) and
//! answered by a handler closure. Helpers build the usual replies.

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use httpdmc_core::pool::{ConnectionPool, Endpoint};
use httpdmc_core::range::{ByteRange, ContentRange};
use httpdmc_core::wire::{
    Connector, Method, Request, RequestBody, Response, ResponseBody, ResponseHeaders,
    TransportError, WireClient,
};

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct Seen {
    pub host: String,
    pub method: Method,
    pub path: String,
    pub range: Option<ByteRange>,
    pub total_size: Option<u64>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub type Reply = std::result::Result<Response, TransportError>;

type Handler = dyn Fn(&Seen) -> Reply + Send + Sync;

struct State {
    handler: Box<Handler>,
    log: Mutex<Vec<Seen>>,
    connects: AtomicUsize,
}

pub struct MockConnector {
    state: Arc<State>,
}

impl MockConnector {
    pub fn new(handler: impl Fn(&Seen) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(State {
                handler: Box::new(handler),
                log: Mutex::new(Vec::new()),
                connects: AtomicUsize::new(0),
            }),
        })
    }

    /// Pool over this connector.
    pub fn pool(self: &Arc<Self>) -> Arc<ConnectionPool> {
        let connector: Arc<dyn Connector> = self.clone();
        Arc::new(ConnectionPool::new(connector))
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.state.log.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method) -> usize {
        self.requests().iter().filter(|s| s.method == method).count()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &Endpoint) -> std::result::Result<Box<dyn WireClient>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient {
            host: endpoint.host.clone(),
            state: Arc::clone(&self.state),
            open: true,
        }))
    }
}

struct MockClient {
    host: String,
    state: Arc<State>,
    open: bool,
}

impl WireClient for MockClient {
    fn request(&mut self, request: Request) -> Reply {
        let Request {
            method,
            path,
            range,
            total_size,
            headers,
            body,
        } = request;
        let body = match body {
            RequestBody::Empty => Vec::new(),
            RequestBody::Bytes(b) => b,
            RequestBody::Stream { mut reader, .. } => {
                let mut out = Vec::new();
                reader
                    .read_to_end(&mut out)
                    .map_err(|e| TransportError::new(e.to_string()))?;
                out
            }
        };
        let seen = Seen {
            host: self.host.clone(),
            method,
            path,
            range,
            total_size,
            headers,
            body,
        };
        self.state.log.lock().unwrap().push(seen.clone());
        let reply = (self.state.handler)(&seen);
        match &reply {
            Ok(resp) if resp.headers.connection_close => self.open = false,
            Err(_) => self.open = false,
            _ => {}
        }
        reply
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

pub fn reply(status: u16) -> Response {
    Response {
        status,
        reason: reason(status).to_string(),
        headers: ResponseHeaders::default(),
        body: ResponseBody::None,
    }
}

pub fn reply_with_body(status: u16, body: Vec<u8>) -> Response {
    let mut resp = reply(status);
    resp.headers.content_length = Some(body.len() as u64);
    resp.body = ResponseBody::Bytes(body);
    resp
}

pub fn redirect(status: u16, location: &str) -> Response {
    let mut resp = reply(status);
    resp.headers.location = Some(location.to_string());
    resp
}

/// Body that yields the first `cut` bytes of `data` and then fails the way
/// a reset connection does.
struct BreakingBody {
    data: Vec<u8>,
    pos: usize,
    cut: usize,
}

impl Read for BreakingBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.cut {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        let n = buf.len().min(self.cut - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Replaces a buffered body with a stream that breaks off after `cut` bytes.
/// Headers stay untouched, so the declared length is still the full one.
pub fn break_body_after(resp: &mut Response, cut: usize) {
    let data = match std::mem::replace(&mut resp.body, ResponseBody::None) {
        ResponseBody::Bytes(b) => b,
        ResponseBody::None => Vec::new(),
        ResponseBody::Stream(mut r) => {
            let mut out = Vec::new();
            let _ = r.read_to_end(&mut out);
            out
        }
    };
    let cut = cut.min(data.len());
    resp.body = ResponseBody::Stream(Box::new(BreakingBody { data, pos: 0, cut }));
}

/// Answers HEAD and GET for `data` the way a range-capable server does.
pub fn serve_object(data: &[u8], seen: &Seen) -> Response {
    let total = data.len() as u64;
    match (seen.method, seen.range) {
        (Method::Head, _) => {
            let mut resp = reply(200);
            resp.headers.content_length = Some(total);
            resp
        }
        (Method::Get, Some(range)) => {
            if range.start >= total {
                let mut resp = reply(416);
                resp.headers.content_range = Some(ContentRange {
                    range: None,
                    total: Some(total),
                });
                return resp;
            }
            let span = range.clip(total);
            let slice = data[span.start as usize..span.end as usize].to_vec();
            let mut resp = reply_with_body(206, slice);
            resp.headers.content_range = Some(ContentRange {
                range: Some(span),
                total: Some(total),
            });
            resp
        }
        (Method::Get, None) => reply_with_body(200, data.to_vec()),
        _ => reply(405),
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        404 => "Not Found",
        405 => "Method Not Allowed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "",
    }
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
