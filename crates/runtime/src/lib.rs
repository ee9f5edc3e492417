//! Transport layer for the msgr session stack.
//!
//! Three concerns live here, all below the session/context layer:
//!
//! * [`cookies`]: credential ingestion into a canonical cookie set and the
//!   shared jar every transport reads from and writes back into.
//! * [`http`]: one-shot authenticated HTTP requests with a stable
//!   browser-fingerprint header set and bounded retry on server errors.
//! * [`ws`]: the persistent pub/sub WebSocket transport behind the
//!   [`Transport`] trait, so the real-time channel logic upstairs is
//!   testable against an in-memory transport.

pub mod cookies;
pub mod error;
pub mod http;
pub mod ws;

pub use cookies::{CookieJar, normalize, validate_identity};
pub use error::{Result, TransportError};
pub use http::{HttpResponse, HttpTransport, RetryPolicy};
pub use ws::{Transport, WsTransport};
