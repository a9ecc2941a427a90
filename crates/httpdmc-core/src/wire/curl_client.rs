//! libcurl-backed wire client.
//!
//! One `Easy` handle per pooled connection, owned by a driver thread. The
//! response is handed back once its head is in; a 2xx body then streams
//! through a bounded channel fed from curl's write callback, and dropping
//! the body reader aborts the transfer. The handle is reset between
//! requests but keeps its live connection, so consecutive requests on the
//! same client reuse the TCP/TLS session.

use std::cell::{Cell, RefCell};
use std::io::{self, Read};
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use curl::easy::{Easy, List};

use crate::pool::Endpoint;

use super::{
    parse_response_head, Connector, Method, Request, RequestBody, Response, ResponseBody,
    ResponseHeaders, TransportError, WireClient,
};

/// Body chunks buffered between curl and the reader.
const CHUNKS_IN_FLIGHT: usize = 8;

/// Timeouts applied to every request.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below this many bytes/sec ...
    pub low_speed_limit: u32,
    /// ... for this long.
    pub low_speed_time: Duration,
    /// Hard wall-clock limit per request.
    pub timeout: Option<Duration>,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            timeout: None,
        }
    }
}

fn transport(e: curl::Error) -> TransportError {
    TransportError {
        message: e.to_string(),
        timed_out: e.is_operation_timedout(),
    }
}

/// Opens [`CurlClient`]s.
#[derive(Debug, Clone)]
pub struct CurlConnector {
    options: CurlOptions,
}

impl CurlConnector {
    /// Performs libcurl global initialisation (idempotent).
    pub fn new(options: CurlOptions) -> Self {
        curl::init();
        Self { options }
    }

    pub fn shared(options: CurlOptions) -> Arc<dyn Connector> {
        Arc::new(Self::new(options))
    }
}

impl Connector for CurlConnector {
    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn WireClient>, TransportError> {
        let client = CurlClient::new(endpoint.clone(), self.options).map_err(|e| {
            TransportError::new(format!("cannot start connection thread: {}", e))
        })?;
        Ok(Box::new(client))
    }
}

/// What the driver thread reports for one request, in order: a head, any
/// number of body chunks, then `Done` (or `Failed` at any point).
enum Event {
    Head(u16, String, ResponseHeaders),
    Data(Vec<u8>),
    Done,
    Failed(TransportError),
}

struct Job {
    request: Request,
    events: SyncSender<Event>,
}

fn configure(
    easy: &mut Easy,
    endpoint: &Endpoint,
    options: &CurlOptions,
    request: &Request,
) -> Result<List, curl::Error> {
    easy.reset();
    let url = format!("{}{}", endpoint.base_url(), request.path);
    easy.url(&url)?;
    // Redirects are handled above the wire so ranges can be re-planned.
    easy.follow_location(false)?;
    easy.connect_timeout(options.connect_timeout)?;
    easy.low_speed_limit(options.low_speed_limit)?;
    easy.low_speed_time(options.low_speed_time)?;
    if let Some(t) = options.timeout {
        easy.timeout(t)?;
    }

    let mut list = List::new();
    for (k, v) in &request.headers {
        list.append(&format!("{}: {}", k.trim(), v.trim()))?;
    }

    match request.method {
        Method::Get => {
            if let Some(range) = request.range {
                easy.range(&range.curl_range())?;
            }
        }
        Method::Head => {
            easy.nobody(true)?;
        }
        Method::Put => {
            easy.upload(true)?;
            if let Some(range) = request.range {
                list.append(&format!(
                    "Content-Range: {}",
                    range.content_range_value(request.total_size)
                ))?;
            }
            match &request.body {
                RequestBody::Empty => easy.in_filesize(0)?,
                RequestBody::Bytes(b) => easy.in_filesize(b.len() as u64)?,
                RequestBody::Stream { len: Some(n), .. } => easy.in_filesize(*n)?,
                RequestBody::Stream { len: None, .. } => {}
            }
            list.append("Expect:")?;
        }
        Method::Propfind => {
            easy.custom_request("PROPFIND")?;
            if let RequestBody::Bytes(b) = &request.body {
                easy.post(true)?;
                easy.post_fields_copy(b)?;
            }
        }
    }
    Ok(list)
}

/// Owns the `Easy` handle and runs one request at a time.
struct Driver {
    endpoint: Endpoint,
    options: CurlOptions,
    easy: Easy,
    open: Arc<AtomicBool>,
}

impl Driver {
    fn run(mut self, jobs: Receiver<Job>) {
        for Job { request, events } in jobs {
            match self.perform(request, &events) {
                Ok(()) => {
                    let _ = events.send(Event::Done);
                }
                Err(e) => {
                    self.open.store(false, Ordering::SeqCst);
                    let _ = events.send(Event::Failed(transport(e)));
                }
            }
        }
    }

    fn perform(
        &mut self,
        request: Request,
        events: &SyncSender<Event>,
    ) -> Result<(), curl::Error> {
        let list = configure(&mut self.easy, &self.endpoint, &self.options, &request)?;
        self.easy.http_headers(list)?;

        let method = request.method;
        let mut upload: Box<dyn Read + Send> = match request.body {
            RequestBody::Empty => Box::new(io::empty()),
            RequestBody::Bytes(b) => Box::new(io::Cursor::new(b)),
            RequestBody::Stream { reader, .. } => reader,
        };
        let header_lines: RefCell<Vec<String>> = RefCell::new(Vec::new());
        let head_sent = Cell::new(false);

        {
            let mut transfer = self.easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    header_lines.borrow_mut().push(s.trim_end().to_string());
                }
                true
            })?;
            // A short count aborts the transfer: the reader is gone or the
            // head is unusable.
            transfer.write_function(|data| {
                if !head_sent.get() {
                    head_sent.set(true);
                    let Some((status, reason, headers)) =
                        parse_response_head(&header_lines.borrow())
                    else {
                        return Ok(0);
                    };
                    if events.send(Event::Head(status, reason, headers)).is_err() {
                        return Ok(0);
                    }
                }
                match events.send(Event::Data(data.to_vec())) {
                    Ok(()) => Ok(data.len()),
                    Err(_) => Ok(0),
                }
            })?;
            if method == Method::Put {
                transfer.read_function(|buf| match upload.read(buf) {
                    Ok(n) => Ok(n),
                    Err(e) => {
                        tracing::warn!("upload body read failed: {}", e);
                        Err(curl::easy::ReadError::Abort)
                    }
                })?;
            }
            transfer.perform()?;
        }

        if !head_sent.get() {
            let code = self.easy.response_code()?;
            let (status, reason, headers) = parse_response_head(&header_lines.borrow())
                .unwrap_or_else(|| (code as u16, String::new(), ResponseHeaders::default()));
            let _ = events.send(Event::Head(status, reason, headers));
        }
        Ok(())
    }
}

/// Response body fed by the driver thread.
struct CurlBody {
    events: Receiver<Event>,
    chunk: Vec<u8>,
    offset: usize,
    done: bool,
    open: Arc<AtomicBool>,
}

impl CurlBody {
    /// Waits for the next chunk; `false` at the end of the body.
    fn next_chunk(&mut self) -> io::Result<bool> {
        if self.done {
            return Ok(false);
        }
        match self.events.recv() {
            Ok(Event::Data(data)) => {
                self.chunk = data;
                self.offset = 0;
                Ok(true)
            }
            Ok(Event::Done) => {
                self.done = true;
                Ok(false)
            }
            Ok(Event::Failed(e)) => {
                self.done = true;
                Err(io::Error::new(io::ErrorKind::Other, e.message))
            }
            Ok(Event::Head(..)) | Err(_) => {
                self.done = true;
                self.open.store(false, Ordering::SeqCst);
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection thread stopped mid-body",
                ))
            }
        }
    }

    fn drained(&self) -> bool {
        self.offset >= self.chunk.len()
    }
}

impl Read for CurlBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.drained() {
            if !self.next_chunk()? {
                return Ok(0);
            }
        }
        let n = buf.len().min(self.chunk.len() - self.offset);
        buf[..n].copy_from_slice(&self.chunk[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

impl Drop for CurlBody {
    fn drop(&mut self) {
        while !self.done {
            match self.events.try_recv() {
                Ok(Event::Data(_)) => {}
                Ok(Event::Done) => self.done = true,
                _ => break,
            }
        }
        // Still streaming: the driver aborts the transfer on its next chunk.
        if !self.done {
            self.open.store(false, Ordering::SeqCst);
        }
    }
}

/// A libcurl handle bound to one endpoint.
pub struct CurlClient {
    endpoint: Endpoint,
    jobs: Sender<Job>,
    open: Arc<AtomicBool>,
}

impl CurlClient {
    /// Starts the driver thread for a new handle.
    pub fn new(endpoint: Endpoint, options: CurlOptions) -> io::Result<Self> {
        let (jobs, queue) = mpsc::channel();
        let open = Arc::new(AtomicBool::new(true));
        let driver = Driver {
            endpoint: endpoint.clone(),
            options,
            easy: Easy::new(),
            open: Arc::clone(&open),
        };
        thread::Builder::new()
            .name(format!("curl-{}", endpoint.host))
            .spawn(move || driver.run(queue))?;
        Ok(Self {
            endpoint,
            jobs,
            open,
        })
    }

    fn broken(&self, message: &str) -> TransportError {
        self.open.store(false, Ordering::SeqCst);
        TransportError::new(message)
    }
}

impl WireClient for CurlClient {
    fn request(&mut self, request: Request) -> Result<Response, TransportError> {
        tracing::debug!(
            "{} {}{} range={:?}",
            request.method,
            self.endpoint.base_url(),
            request.path,
            request.range
        );
        let (events, replies) = mpsc::sync_channel(CHUNKS_IN_FLIGHT);
        if self.jobs.send(Job { request, events }).is_err() {
            return Err(self.broken("connection thread has exited"));
        }
        let (status, reason, headers) = match replies.recv() {
            Ok(Event::Head(status, reason, headers)) => (status, reason, headers),
            Ok(Event::Failed(e)) => {
                self.open.store(false, Ordering::SeqCst);
                return Err(e);
            }
            Ok(_) | Err(_) => return Err(self.broken("no response head")),
        };
        if headers.connection_close {
            self.open.store(false, Ordering::SeqCst);
        }

        let mut body = CurlBody {
            events: replies,
            chunk: Vec::new(),
            offset: 0,
            done: false,
            open: Arc::clone(&self.open),
        };
        let first = body
            .next_chunk()
            .map_err(|e| self.broken(&e.to_string()))?;
        let body = if !first {
            ResponseBody::None
        } else if (200..300).contains(&status) {
            ResponseBody::Stream(Box::new(body))
        } else {
            // Error and redirect bodies are small; read them here so the
            // connection is idle again when the caller moves on.
            let mut bytes = Vec::new();
            body.read_to_end(&mut bytes)
                .map_err(|e| self.broken(&e.to_string()))?;
            ResponseBody::Bytes(bytes)
        };
        Ok(Response {
            status,
            reason,
            headers,
            body,
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
