//! In-process duplex over bounded channels.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

use super::{FrameSink, FrameStream, FrameTransport};
use crate::error::MuxError;

/// One end of an in-memory connection. Dropping either half of one end
/// closes the corresponding direction for the peer.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::Sender<String>,
    rx: mpsc::Receiver<String>,
}

/// Connected pair of transports with `capacity` frames of buffering per
/// direction.
pub fn duplex(capacity: usize) -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
    (
        MemoryTransport { tx: a_tx, rx: a_rx },
        MemoryTransport { tx: b_tx, rx: b_rx },
    )
}

impl FrameTransport for MemoryTransport {
    fn split(self) -> (FrameSink, FrameStream) {
        let sink = PollSender::new(self.tx)
            .sink_map_err(|_| MuxError::ConnectionLost("peer closed the in-memory channel".into()));
        let stream = ReceiverStream::new(self.rx).map(Ok);
        (Box::pin(sink), Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (a, b) = duplex(4);
        let (mut a_tx, mut a_rx) = a.split();
        let (mut b_tx, mut b_rx) = b.split();

        a_tx.send("hello".into()).await.expect("send a->b");
        b_tx.send("world".into()).await.expect("send b->a");
        assert_eq!(b_rx.next().await.expect("frame").expect("ok"), "hello");
        assert_eq!(a_rx.next().await.expect("frame").expect("ok"), "world");
    }

    #[tokio::test]
    async fn dropping_peer_fails_sends_and_ends_stream() {
        let (a, b) = duplex(1);
        let (mut a_tx, mut a_rx) = a.split();
        drop(b);
        assert!(a_tx.send("lost".into()).await.is_err());
        assert!(a_rx.next().await.is_none());
    }
}
