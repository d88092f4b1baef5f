//! Error types for proxy operations.
//!
//! None of these are fatal to the server: they end the affected connection
//! or tunnel and are reported through the `error` event.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error on either leg.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// Outbound HTTP request failed.
    #[error("upstream request failed: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    /// Request target could not be parsed into host and port.
    #[error("invalid request target: {0}")]
    InvalidTarget(String),

    /// Failed to connect to upstream server.
    #[error("failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect { addr: String, message: String },

    /// Connect or idle timeout.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        ProxyError::Tls(err.to_string())
    }
}
