//! Transport-level error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Credential input could not be parsed into a cookie set, or the set is
    /// missing a mandatory identity cookie.
    #[error("invalid credential input: {0}")]
    InvalidInput(String),

    /// Connectivity-level failure (DNS, TLS, connection reset).
    #[error("network error: {0}")]
    Network(String),

    /// Terminal non-success HTTP status, after retries where applicable.
    /// Carries the last status seen and a snippet of the body.
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// WebSocket-level failure on the persistent transport.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// The persistent transport is closed; no further frames can be sent.
    #[error("transport closed")]
    Closed,
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        TransportError::WebSocket(err.to_string())
    }
}
