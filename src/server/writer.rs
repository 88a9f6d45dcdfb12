//! Serialized writer shared by every generation on a connection.

use std::sync::Arc;

use futures::SinkExt;
use tokio::sync::Mutex;

use crate::error::{MuxError, Result};
use crate::protocol::{CounterMode, EventEncoder, StreamEvent};
use crate::transport::FrameSink;

struct Outbound {
    encoder: EventEncoder,
    sink: FrameSink,
    alive: bool,
}

/// Encodes and writes events under one lock so sequence numbers follow
/// emission order on the wire. Once a write fails the writer goes dead and
/// later sends are dropped.
#[derive(Clone)]
pub struct EventWriter {
    inner: Arc<Mutex<Outbound>>,
}

impl EventWriter {
    pub fn new(sink: FrameSink, mode: CounterMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Outbound {
                encoder: EventEncoder::new(mode),
                sink,
                alive: true,
            })),
        }
    }

    /// Encode and write one event, awaiting the write.
    pub async fn send(&self, event: &StreamEvent) -> Result<()> {
        let mut out = self.inner.lock().await;
        if !out.alive {
            return Err(MuxError::ConnectionLost("writer closed".into()));
        }
        let frame = out.encoder.encode_frame(event)?;
        if let Err(err) = out.sink.send(frame).await {
            out.alive = false;
            tracing::info!(error = %err, "connection writer failed; dropping further writes");
            return Err(err);
        }
        Ok(())
    }

    pub async fn is_alive(&self) -> bool {
        self.inner.lock().await.alive
    }

    /// Close the sink and drop further writes.
    pub async fn close(&self) {
        let mut out = self.inner.lock().await;
        if out.alive {
            out.alive = false;
            let _ = out.sink.close().await;
        }
    }
}

impl std::fmt::Debug for EventWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventWriter").finish_non_exhaustive()
    }
}
