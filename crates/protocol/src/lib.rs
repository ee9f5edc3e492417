//! Wire types for the messaging platform's private web protocol.
//!
//! This crate contains the serde-serializable types exchanged with the
//! platform: session cookies, the outbound real-time task envelope, inbound
//! frames and their normalized event forms, and the session option set.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: no behavior beyond serialization and tiny constructors
//! * 1:1 with the wire: field names and nesting match what the platform
//!   actually sends and expects, however awkward
//! * Fragile by nature: the protocol is owned by an external provider and
//!   changes without notice; shapes here are observations, not contracts
//!
//! Higher-level behavior (transports, session lifecycle, the real-time
//! channel) lives in `msgr-runtime` and `msgr-rs`.

pub mod cookie;
pub mod envelope;
pub mod events;
pub mod options;

pub use cookie::*;
pub use envelope::*;
pub use events::*;
pub use options::*;
