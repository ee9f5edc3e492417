// msgr: session layer over the platform's private web protocol.
//
// Everything here operates on cookies and tokens harvested from a real
// logged-in browser session; there is no official API underneath.

pub mod bootstrap;
pub mod client;
pub mod context;
pub mod error;
pub mod extract;
pub mod login;
pub mod realtime;
pub mod refresh;
pub mod registry;

pub use bootstrap::{BASE_URL, DEFAULT_APP_ID, DEFAULT_REALTIME_ENDPOINT};
pub use client::Client;
pub use context::{SequenceCursor, SessionContext, TokenPair, derive_checksum};
pub use error::{Error, Result};
pub use login::Credentials;
pub use realtime::{ChannelState, Connector, RealtimeChannel, ReconnectPolicy, WsConnector};
pub use refresh::TokenRefresher;
pub use registry::{OperationHandler, OperationRegistry};

pub use msgr_protocol::{Event, MessageEvent, SessionCookie, SessionOptions};
