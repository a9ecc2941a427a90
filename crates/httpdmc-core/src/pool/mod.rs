//! Connection pool keyed by endpoint.
//!
//! Idle handles are parked per `(scheme, host, port)` and handed out to one
//! worker at a time. The pool lock is never held while connecting.

mod endpoint;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::wire::{Connector, TransportError, WireClient};

pub use endpoint::Endpoint;

type IdleMap = HashMap<Endpoint, Vec<Box<dyn WireClient>>>;

pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    idle: Mutex<IdleMap>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            idle: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, IdleMap> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Idle handle for `endpoint`, or a new connection.
    pub fn acquire(&self, endpoint: &Endpoint) -> Result<Box<dyn WireClient>, TransportError> {
        let reused = self.lock().get_mut(endpoint).and_then(Vec::pop);
        match reused {
            Some(client) => Ok(client),
            None => self.acquire_fresh(endpoint),
        }
    }

    /// Always a new connection (used after a transport failure).
    pub fn acquire_fresh(&self, endpoint: &Endpoint) -> Result<Box<dyn WireClient>, TransportError> {
        tracing::debug!("opening connection to {}", endpoint.base_url());
        self.connector.connect(endpoint)
    }

    /// Parks `client` for reuse unless the peer closed it.
    pub fn release(&self, endpoint: &Endpoint, client: Box<dyn WireClient>) {
        if !client.is_open() {
            return;
        }
        self.lock().entry(endpoint.clone()).or_default().push(client);
    }

    pub fn idle_count(&self, endpoint: &Endpoint) -> usize {
        self.lock().get(endpoint).map_or(0, Vec::len)
    }

    /// Drops every idle handle.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let idle: usize = self.lock().values().map(Vec::len).sum();
        f.debug_struct("ConnectionPool").field("idle", &idle).finish()
    }
}
