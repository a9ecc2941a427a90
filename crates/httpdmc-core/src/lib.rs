//! Parallel ranged HTTP/WebDAV transfer engine.
//!
//! An [`HttpDataPoint`] moves one remote object between a server and a
//! caller-owned [`SharedBuffer`], splitting the transfer into ranged GETs or
//! PUTs over several pooled connections when the server allows it.

pub mod access;
pub mod buffer;
pub mod config;
pub mod error;
pub mod logging;
pub mod pool;
pub mod probe;
pub mod range;
pub mod retry;
pub mod transfer;
pub mod url_model;
pub mod wire;

pub use access::HttpDataPoint;
pub use buffer::{SharedBuffer, SlotBuffer};
pub use config::DmcConfig;
pub use error::{DmcError, Result};
pub use pool::ConnectionPool;
pub use probe::{ObjectKind, ObjectMetadata};
pub use url_model::TransferOptions;
