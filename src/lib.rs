//! mysqltap - transparent MySQL query-recording proxy
//!
//! This library provides the core functionality for a proxy that:
//! - Accepts MySQL client connections and dials the real upstream server
//! - Rewrites the server greeting (proxy version string, local connection id,
//!   SSL/compression capabilities cleared) and forwards the client response
//! - Relays all traffic transparently after the handshake
//! - Records every query flowing client-to-server, including prepared
//!   statements reconstructed with their bound parameters, to per-connection
//!   log files

#[macro_use]
mod logging;

pub mod config;
pub mod error;
pub mod protocol;
pub mod query_record;
pub mod server;

pub use config::Config;
pub use error::{ProxyError, Result};
pub use query_record::{QueryRecorder, RecordTap};
pub use server::{Listener, ListenerStats, ProxySession};
