//! Minimal HTTP/1.1 server for integration tests over real sockets.
//!
//! Serves a single object. HEAD answers with Content-Length; GET honours
//! `Range` with 206 Partial Content (or 416 past the end); PUT writes the
//! request body into the stored object, at the `Content-Range` offset when
//! one is given. Paths under `/moved/` answer 302 to the same path without
//! the prefix. Every response carries `Connection: close`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    /// If false, a PUT with Content-Range is refused with 501.
    pub partial_put: bool,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            support_ranges: true,
            partial_put: true,
        }
    }
}

/// Handle to a running server.
#[derive(Clone)]
pub struct RangeServer {
    /// Base URL with a trailing slash, e.g. `http://127.0.0.1:12345/`.
    pub url: String,
    object: Arc<Mutex<Vec<u8>>>,
    requests: Arc<Mutex<Vec<(String, bool)>>>,
    connections: Arc<AtomicUsize>,
}

impl RangeServer {
    /// Current object contents.
    pub fn object(&self) -> Vec<u8> {
        self.object.lock().unwrap().clone()
    }

    /// `(method, had Range or Content-Range)` per request, in arrival order.
    pub fn requests(&self) -> Vec<(String, bool)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Starts a server in a background thread serving `body`. Returns the base
/// URL. The server runs until the process exits.
pub fn start(body: Vec<u8>) -> String {
    start_with_options(body, RangeServerOptions::default()).url
}

/// Like `start` but allows customizing server behavior.
pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let server = RangeServer {
        url: format!("http://127.0.0.1:{}/", port),
        object: Arc::new(Mutex::new(body)),
        requests: Arc::new(Mutex::new(Vec::new())),
        connections: Arc::new(AtomicUsize::new(0)),
    };
    let state = server.clone();
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            state.connections.fetch_add(1, Ordering::SeqCst);
            let state = state.clone();
            thread::spawn(move || handle(stream, &state, opts));
        }
    });
    server
}

struct Incoming {
    method: String,
    path: String,
    range: Option<(u64, u64)>,
    content_range: Option<(u64, u64)>,
    body: Vec<u8>,
}

fn handle(stream: TcpStream, state: &RangeServer, opts: RangeServerOptions) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Ok(reader) = stream.try_clone() else {
        return;
    };
    let mut reader = BufReader::new(reader);
    let Some(req) = read_request(&mut reader) else {
        return;
    };
    let mut stream = stream;
    state.requests.lock().unwrap().push((
        req.method.clone(),
        req.range.is_some() || req.content_range.is_some(),
    ));

    if let Some(rest) = req.path.strip_prefix("/moved/") {
        let head = format!(
            "HTTP/1.1 302 Found\r\nLocation: /{}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            rest
        );
        let _ = stream.write_all(head.as_bytes());
        return;
    }

    let method = req.method.to_ascii_uppercase();
    match method.as_str() {
        "HEAD" => {
            let total = state.object.lock().unwrap().len();
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                total
            );
            let _ = stream.write_all(head.as_bytes());
        }
        "GET" => {
            let body = state.object.lock().unwrap().clone();
            let total = body.len() as u64;
            let (status, range_header, slice) = match req.range {
                Some((start, end_incl)) if opts.support_ranges => {
                    let end_incl = end_incl.min(total.saturating_sub(1));
                    if start >= total || start > end_incl {
                        ("416 Range Not Satisfiable", format!("bytes */{}", total), &body[0..0])
                    } else {
                        let slice = &body[start as usize..=end_incl as usize];
                        (
                            "206 Partial Content",
                            format!("bytes {}-{}/{}", start, end_incl, total),
                            slice,
                        )
                    }
                }
                _ => ("200 OK", String::new(), &body[..]),
            };
            let content_range = if range_header.is_empty() {
                String::new()
            } else {
                format!("Content-Range: {}\r\n", range_header)
            };
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
                status,
                slice.len(),
                content_range
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(slice);
        }
        "PUT" => {
            let status = match req.content_range {
                Some(_) if !opts.partial_put => "501 Not Implemented",
                Some((start, _)) => {
                    let mut object = state.object.lock().unwrap();
                    let end = start as usize + req.body.len();
                    if object.len() < end {
                        object.resize(end, 0);
                    }
                    object[start as usize..end].copy_from_slice(&req.body);
                    "204 No Content"
                }
                None => {
                    *state.object.lock().unwrap() = req.body;
                    "201 Created"
                }
            };
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                status
            );
            let _ = stream.write_all(head.as_bytes());
        }
        _ => {
            let _ = stream.write_all(
                b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            );
        }
    }
    let _ = stream.flush();
}

fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Incoming> {
    let mut line = String::new();
    reader.read_line(&mut line).ok()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut range = None;
    let mut content_range = None;
    let mut content_length = None;
    let mut chunked = false;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).ok()? == 0 {
            break;
        }
        let header = header.trim();
        if header.is_empty() {
            break;
        }
        let Some((name, value)) = header.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        match name.as_str() {
            "range" => range = value.strip_prefix("bytes=").and_then(parse_span),
            "content-range" => {
                content_range = value
                    .strip_prefix("bytes ")
                    .and_then(|v| v.split('/').next())
                    .and_then(parse_span)
            }
            "content-length" => content_length = value.parse::<usize>().ok(),
            "transfer-encoding" => chunked = value.eq_ignore_ascii_case("chunked"),
            _ => {}
        }
    }

    let mut body = Vec::new();
    if chunked {
        loop {
            let mut size_line = String::new();
            reader.read_line(&mut size_line).ok()?;
            let size = usize::from_str_radix(size_line.trim().split(';').next()?, 16).ok()?;
            if size == 0 {
                let mut trailer = String::new();
                let _ = reader.read_line(&mut trailer);
                break;
            }
            let mut chunk = vec![0u8; size];
            reader.read_exact(&mut chunk).ok()?;
            body.extend_from_slice(&chunk);
            let mut crlf = [0u8; 2];
            reader.read_exact(&mut crlf).ok()?;
        }
    } else if let Some(len) = content_length {
        body.resize(len, 0);
        reader.read_exact(&mut body).ok()?;
    }
    Some(Incoming {
        method,
        path,
        range,
        content_range,
        body,
    })
}

/// `a-b` (end inclusive; empty end means to the end of the object).
fn parse_span(s: &str) -> Option<(u64, u64)> {
    let (a, b) = s.trim().split_once('-')?;
    let start = a.trim().parse::<u64>().ok()?;
    let end = match b.trim() {
        "" => u64::MAX,
        e => e.parse::<u64>().ok()?,
    };
    Some((start, end))
}
