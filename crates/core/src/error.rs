//! Error taxonomy for the session layer.
//!
//! The top-level login path normalizes every failure into one of these
//! variants so callers can tell "could not read credentials" from
//! "credentials rejected by remote" from "could not reach remote"; they
//! need materially different remediation.

use msgr_runtime::TransportError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Provider error codes observed to mean "your anti-forgery token is stale".
///
/// These belong to an external, uncontrolled provider: they are not
/// documented, not exhaustive, and may change silently. Treat as revisable
/// configuration, never as a stable contract.
pub const TOKEN_REJECTION_CODES: &[i64] = &[1357001, 1357004, 1357031];

/// Provider error codes observed to mean "slow down".
pub const RATE_LIMIT_CODES: &[i64] = &[1675004];

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or incomplete credential input. Never retried.
    #[error("invalid credentials: {0}")]
    Validation(String),

    /// Identity cookies absent after bootstrap, or the credential exchange
    /// was rejected. Fatal to login.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Connectivity failure or 5xx exhaustion, surfaced after the
    /// transport's internal retries.
    #[error("network failure: {0}")]
    Network(String),

    /// Terminal non-success HTTP status.
    #[error("server returned status {status}: {message}")]
    Http { status: u16, message: String },

    /// A pending call exceeded its deadline. The correlation entry has been
    /// evicted; a late response is routed to the event decoder instead.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The real-time channel disconnected while the call was pending.
    #[error("realtime connection closed: {0}")]
    ConnectionClosed(String),

    /// The remote answered with something structurally unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Automatic reconnection gave up.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    /// The provider signaled throttling for this kind of request; consult
    /// the recorded cooldown before retrying.
    #[error("rate limited on queue {queue}")]
    RateLimited { queue: String },
}

impl Error {
    /// Whether a provider error code means the anti-forgery token went
    /// stale and a refresh-and-retry is worth attempting.
    pub fn is_token_rejection_code(code: i64) -> bool {
        TOKEN_REJECTION_CODES.contains(&code)
    }

    /// Whether a provider error code is a throttling signal.
    pub fn is_rate_limit_code(code: i64) -> bool {
        RATE_LIMIT_CODES.contains(&code)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidInput(msg) => Error::Validation(msg),
            TransportError::Network(msg) => Error::Network(msg),
            TransportError::Status { status, body } => Error::Http {
                status,
                message: body,
            },
            TransportError::WebSocket(msg) => Error::ConnectionClosed(msg),
            TransportError::Closed => Error::ConnectionClosed("transport closed".into()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_onto_the_taxonomy() {
        let err: Error = TransportError::InvalidInput("bad".into()).into();
        assert!(matches!(err, Error::Validation(_)));

        let err: Error = TransportError::Status {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert!(matches!(err, Error::Http { status: 500, .. }));

        let err: Error = TransportError::Closed.into();
        assert!(matches!(err, Error::ConnectionClosed(_)));
    }

    #[test]
    fn token_rejection_codes_are_recognized() {
        assert!(Error::is_token_rejection_code(1357001));
        assert!(!Error::is_token_rejection_code(200));
    }
}
