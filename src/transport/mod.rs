//! Full-duplex text-frame transports.

pub mod memory;
#[cfg(feature = "ws")]
pub mod ws;

use std::pin::Pin;

use futures::stream::BoxStream;
use futures::Sink;

use crate::error::{MuxError, Result};

pub use memory::{duplex, MemoryTransport};

/// Outbound half: accepts whole text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = MuxError> + Send>>;

/// Inbound half: yields whole text frames until the peer goes away.
pub type FrameStream = BoxStream<'static, Result<String>>;

/// A connection that can be split into independently owned halves.
pub trait FrameTransport: Send + 'static {
    fn split(self) -> (FrameSink, FrameStream);
}

impl FrameTransport for (FrameSink, FrameStream) {
    fn split(self) -> (FrameSink, FrameStream) {
        self
    }
}
