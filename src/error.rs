//! Error types for mysqltap

use thiserror::Error;

/// Main error type for the proxy
#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Short read or inconsistent length in a packet header or body
    #[error("Framing error: {0}")]
    Framing(String),

    /// Peer speaks a protocol variant the proxy does not handle
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Upstream server unreachable or closed during handshake
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Client closed or misbehaved during handshake
    #[error("Client error: {0}")]
    Client(String),

    /// Binary execute payload could not be decoded
    #[error("Statement argument parse error: {0}")]
    ParseArgs(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// Reclassify an I/O failure as an upstream-side handshake failure.
    pub fn on_upstream(self) -> Self {
        match self {
            ProxyError::Io(e) => ProxyError::Upstream(e.to_string()),
            other => other,
        }
    }

    /// Reclassify an I/O failure as a client-side handshake failure.
    pub fn on_client(self) -> Self {
        match self {
            ProxyError::Io(e) => ProxyError::Client(e.to_string()),
            other => other,
        }
    }
}
