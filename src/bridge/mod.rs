//! Uniform request/response surface for tools.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{BridgeClient, BridgeTransport};
pub use protocol::{BridgeError, BridgeRequest, BridgeResponse};
pub use server::ToolBridge;
