//! Receiving side: one connection, many sessions.

pub mod connection;
pub mod multiplexer;

pub use connection::{ClientConnection, ClientNotice};
pub use multiplexer::{Routed, SessionChannel, SessionMultiplexer};
