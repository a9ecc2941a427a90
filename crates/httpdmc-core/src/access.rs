//! `HttpDataPoint`: the caller-facing handle for one remote object.

use std::sync::Arc;

use url::Url;

use crate::buffer::SharedBuffer;
use crate::config::DmcConfig;
use crate::error::{DmcError, Result};
use crate::pool::ConnectionPool;
use crate::probe::{ObjectMetadata, Prober};
use crate::transfer::{Direction, Session, SessionSettings};
use crate::url_model::{check_url, parse_location, TransferOptions};
use crate::wire::CurlConnector;

/// One remote object addressed by an `http`, `https`, `dav` or `davs` URL.
///
/// At most one transfer session (download or upload) is active at a time.
/// The location follows redirects observed by probes and transfers.
#[derive(Debug)]
pub struct HttpDataPoint {
    location: Url,
    options: TransferOptions,
    config: DmcConfig,
    pool: Arc<ConnectionPool>,
    reading: Option<Session>,
    writing: Option<Session>,
}

impl HttpDataPoint {
    /// Data point for `location` (options in the authority are honoured)
    /// sharing `pool` with other data points.
    pub fn new(location: &str, pool: Arc<ConnectionPool>, config: DmcConfig) -> Result<Self> {
        let (url, options) = parse_location(location)?;
        Ok(Self {
            location: url,
            options,
            config,
            pool,
            reading: None,
            writing: None,
        })
    }

    /// Data point backed by libcurl with its own connection pool.
    pub fn open(location: &str, config: DmcConfig) -> Result<Self> {
        let connector = CurlConnector::shared(config.curl_options());
        let pool = Arc::new(ConnectionPool::new(connector));
        Self::new(location, pool, config)
    }

    /// Replaces the transfer options parsed from the location.
    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Current location; updated by redirects once a probe or session ends.
    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn set_location(&mut self, location: Url) -> Result<()> {
        check_url(&location)?;
        self.location = location;
        Ok(())
    }

    fn prober(&self) -> Prober {
        Prober::new(
            Arc::clone(&self.pool),
            self.config.retry_policy(),
            self.config.max_redirects,
            self.config.listing_body_limit,
        )
    }

    /// Metadata of the object. A redirected location is remembered.
    pub fn probe(&mut self) -> Result<ObjectMetadata> {
        let meta = self.prober().probe(&self.location)?;
        if meta.location != self.location && meta.kind == crate::probe::ObjectKind::File {
            tracing::debug!("{} now at {}", self.location, meta.location);
            self.location = meta.location.clone();
        }
        if self.options.size_hint.is_none() {
            self.options.size_hint = meta.size;
        }
        Ok(meta)
    }

    /// Entries of a collection, or the object itself for a file.
    pub fn list(&self, detail: bool) -> Result<Vec<ObjectMetadata>> {
        self.prober().list(&self.location, detail)
    }

    fn busy(&self) -> bool {
        self.reading.is_some() || self.writing.is_some()
    }

    fn settings(&self, partial: bool) -> SessionSettings {
        let max = self.config.max_streams.max(1);
        let streams = self
            .options
            .streams
            .unwrap_or(self.config.default_streams)
            .clamp(1, max);
        SessionSettings {
            streams: if partial { streams } else { 1 },
            partial,
            chunk_size: self.config.chunk_size.max(1),
            max_redirects: self.config.max_redirects,
            retry: self.config.retry_policy(),
            size: self.options.size_hint,
        }
    }

    /// Starts filling `buffer` with the object's bytes.
    pub fn start_download(&mut self, buffer: Arc<dyn SharedBuffer>) -> Result<()> {
        if self.busy() {
            return Err(DmcError::SessionActive);
        }
        let settings = self.settings(self.options.partial_get);
        let session = Session::start(
            Direction::Download,
            self.location.clone(),
            Arc::clone(&self.pool),
            buffer,
            settings,
        )?;
        self.reading = Some(session);
        Ok(())
    }

    /// Ends the download session and reports its outcome.
    pub fn stop_download(&mut self) -> Result<()> {
        let mut session = self.reading.take().ok_or(DmcError::NoSession)?;
        let result = session.stop();
        self.location = session.location();
        result
    }

    /// Starts sending the bytes the caller fills into `buffer`.
    pub fn start_upload(&mut self, buffer: Arc<dyn SharedBuffer>) -> Result<()> {
        if self.busy() {
            return Err(DmcError::SessionActive);
        }
        let settings = self.settings(self.options.partial_put);
        let session = Session::start(
            Direction::Upload,
            self.location.clone(),
            Arc::clone(&self.pool),
            buffer,
            settings,
        )?;
        self.writing = Some(session);
        Ok(())
    }

    /// Ends the upload session and reports its outcome.
    pub fn stop_upload(&mut self) -> Result<()> {
        let mut session = self.writing.take().ok_or(DmcError::NoSession)?;
        let result = session.stop();
        self.location = session.location();
        result
    }

    /// Bytes moved by the active session, if any.
    pub fn transferred(&self) -> Option<u64> {
        self.reading
            .as_ref()
            .or(self.writing.as_ref())
            .map(Session::delivered)
    }
}

impl Drop for HttpDataPoint {
    fn drop(&mut self) {
        if self.reading.is_some() {
            let _ = self.stop_download();
        }
        if self.writing.is_some() {
            let _ = self.stop_upload();
        }
    }
}
