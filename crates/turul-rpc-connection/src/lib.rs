//! # Turul RPC connection
//!
//! A [`Connection`] wraps any async byte stream and speaks newline-delimited
//! JSON-RPC over it in both directions:
//!
//! - outbound requests are tracked in a [`CorrelationTable`] and resolved by id,
//!   so concurrent callers each get their own response
//! - inbound requests are served through a `Router`, concurrently, with
//!   streamed replies written as chunks followed by a terminator
//! - closing the connection fails every pending request with
//!   [`ConnectionError::Closed`]
//!
//! Servers and clients share this type; only the handshake differs.

pub mod connection;
pub mod correlation;
pub mod error;
pub mod session;
pub mod state;

pub use connection::{
    CloseReason, Connection, ConnectionConfig, FrameReader, PendingStream, read_frame,
};
pub use correlation::{CorrelationTable, Delivery};
pub use error::{ConnectionError, ConnectionResult};
pub use session::Session;
pub use state::ConnectionState;
