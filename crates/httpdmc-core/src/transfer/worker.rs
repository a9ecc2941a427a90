//! Per-thread request state: sticky location, connection, attempts, redirects.

use std::sync::Arc;

use url::Url;

use crate::error::{DmcError, Result};
use crate::pool::Endpoint;
use crate::retry::{classify_status, classify_transport, is_transient_status, RetryBudget};
use crate::url_model::{request_path, resolve_redirect};
use crate::wire::{Request, Response, TransportError, WireClient};

use super::Shared;

pub(super) struct Worker {
    pub(super) shared: Arc<Shared>,
    location: Url,
    endpoint: Endpoint,
    client: Option<Box<dyn WireClient>>,
    fresh: bool,
    budget: RetryBudget,
    hops: u32,
    cookies: Vec<String>,
}

impl Worker {
    pub(super) fn new(shared: Arc<Shared>) -> Result<Self> {
        let location = shared.location();
        let endpoint = Endpoint::from_url(&location)?;
        let budget = RetryBudget::new(shared.settings.retry);
        Ok(Self {
            shared,
            location,
            endpoint,
            client: None,
            fresh: false,
            budget,
            hops: 0,
            cookies: Vec::new(),
        })
    }

    /// Request target for the worker's current location.
    pub(super) fn path(&self) -> String {
        request_path(&self.location)
    }

    /// Sends `request` on the worker's connection, opening one if needed.
    /// A connection that failed is dropped, never pooled.
    pub(super) fn send(&mut self, mut request: Request) -> std::result::Result<Response, TransportError> {
        let mut client = match self.client.take() {
            Some(c) => c,
            None if self.fresh => self.shared.pool.acquire_fresh(&self.endpoint)?,
            None => self.shared.pool.acquire(&self.endpoint)?,
        };
        self.fresh = false;
        if !self.cookies.is_empty() {
            request = request.with_header("Cookie", self.cookies.join("; "));
        }
        let method = request.method;
        let range = request.range;
        let resp = client.request(request)?;
        tracing::debug!(
            "{} {} {:?} -> {}",
            method,
            self.location,
            range,
            resp.status
        );
        self.client = Some(client);
        Ok(resp)
    }

    /// Accounts a transport failure. True when the operation may be retried
    /// (on a fresh connection).
    pub(super) fn retry_transport(&mut self, e: &TransportError) -> bool {
        self.client = None;
        self.fresh = true;
        let again = self.budget.retry(classify_transport(e));
        tracing::warn!(
            "transport failure on {} (attempt {}): {}{}",
            self.location,
            self.budget.attempts(),
            e,
            if again { ", retrying" } else { "" }
        );
        again
    }

    /// Accounts a failing status. True when it is transient and the attempt
    /// budget allows another try.
    pub(super) fn retry_status(&mut self, status: u16) -> bool {
        if !is_transient_status(status) {
            return false;
        }
        self.client = None;
        self.fresh = true;
        let again = self.budget.retry(classify_status(status));
        tracing::warn!(
            "{} returned {} (attempt {}){}",
            self.location,
            status,
            self.budget.attempts(),
            if again { ", retrying" } else { "" }
        );
        again
    }

    /// Moves the worker (and the session) to the redirect target.
    pub(super) fn follow_redirect(&mut self, resp: &Response) -> Result<()> {
        self.hops += 1;
        let max = self.shared.settings.max_redirects;
        if self.hops > max {
            return Err(DmcError::TooManyRedirects(max));
        }
        for cookie in &resp.headers.cookies {
            let name = cookie.split('=').next().unwrap_or("");
            self.cookies
                .retain(|c| c.split('=').next().unwrap_or("") != name);
            self.cookies.push(cookie.clone());
        }
        let target = resp.headers.location.as_deref().unwrap_or_default();
        let next = resolve_redirect(&self.location, target)?;
        let endpoint = Endpoint::from_url(&next)?;
        self.release_connection();
        tracing::debug!("redirected from {} to {}", self.location, next);
        self.shared.set_location(next.clone());
        self.location = next;
        self.endpoint = endpoint;
        Ok(())
    }

    /// A ranged operation finished: attempts and redirect hops start over.
    pub(super) fn succeeded(&mut self) {
        self.budget.reset();
        self.hops = 0;
    }

    pub(super) fn release_connection(&mut self) {
        if let Some(client) = self.client.take() {
            self.shared.pool.release(&self.endpoint, client);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.release_connection();
    }
}
