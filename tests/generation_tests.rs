//! Generation lifecycle: client watchdog and server step timeout.

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast::error::TryRecvError;

use chatmux::client::{ClientConnection, ClientNotice};
use chatmux::engine::ScriptedEngine;
use chatmux::error::MuxError;
use chatmux::generation::GenerationState;
use chatmux::protocol::{ClientCommand, EventEncoder, EventKind, StreamEvent};
use chatmux::store::InMemoryStore;
use chatmux::transport::{duplex, FrameSink, FrameStream, FrameTransport};
use common::{test_config, wait_for_finish, Harness};

/// Server end driven by hand.
struct FakeServer {
    sink: FrameSink,
    stream: FrameStream,
    encoder: EventEncoder,
}

impl FakeServer {
    async fn emit(&mut self, generation_id: &str, kind: EventKind) {
        let frame = self
            .encoder
            .encode_frame(&StreamEvent::generation("s1", generation_id, 0, kind))
            .expect("encode");
        self.sink.send(frame).await.expect("client end open");
    }

    async fn expect_command(&mut self) -> ClientCommand {
        let frame = self.stream.next().await.expect("client open").expect("frame");
        ClientCommand::from_frame(&frame).expect("client command")
    }
}

async fn client_with_fake_server(watchdog: Duration) -> (ClientConnection, FakeServer) {
    let (server_end, client_end) = duplex(64);
    let (sink, stream) = server_end.split();
    let client = ClientConnection::new(
        test_config().with_watchdog_timeout(watchdog),
        Arc::new(InMemoryStore::new()),
    );
    client.attach(client_end).await.expect("attach");
    (
        client,
        FakeServer {
            sink,
            stream,
            encoder: EventEncoder::default(),
        },
    )
}

fn done() -> EventKind {
    EventKind::GenerationDone {
        generation_time: None,
        context_info: None,
        usage: None,
    }
}

#[tokio::test(start_paused = true)]
async fn watchdog_times_out_once_and_late_terminal_is_absorbed() {
    let (client, mut server) = client_with_fake_server(Duration::from_secs(5)).await;
    let mut notices = client.subscribe();

    client.start_generation("s1", "hello").await.expect("start");
    assert_eq!(server.expect_command().await, ClientCommand::send_message("s1", "hello"));
    server.emit("g1", EventKind::GenerationStart).await;

    match wait_for_finish(&mut notices, "s1").await {
        ClientNotice::GenerationFinished {
            generation_id,
            state,
            error,
            ..
        } => {
            assert_eq!(generation_id.as_deref(), Some("g1"));
            assert_eq!(state, GenerationState::TimedOut);
            assert_eq!(error, Some(MuxError::GenerationTimeout(5000).to_string()));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!client.is_generating("s1"));

    // The session is free again before the server ever finishes.
    server.emit("g1", done()).await;
    client.start_generation("s1", "again").await.expect("restart after timeout");
    assert_eq!(server.expect_command().await, ClientCommand::send_message("s1", "again"));
    server.emit("g2", EventKind::GenerationStart).await;
    server.emit("g2", done()).await;

    match wait_for_finish(&mut notices, "s1").await {
        ClientNotice::GenerationFinished {
            generation_id,
            state,
            ..
        } => {
            assert_eq!(generation_id.as_deref(), Some("g2"));
            assert_eq!(state, GenerationState::Completed);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn progress_keeps_the_watchdog_from_firing() {
    let (client, mut server) = client_with_fake_server(Duration::from_secs(5)).await;
    let mut notices = client.subscribe();

    client.start_generation("s1", "hello").await.expect("start");
    server.expect_command().await;
    server.emit("g1", EventKind::GenerationStart).await;
    for part in ["a", "b", "c"] {
        tokio::time::sleep(Duration::from_secs(3)).await;
        server
            .emit(
                "g1",
                EventKind::ContentDelta {
                    block_id: "b".into(),
                    text: part.into(),
                },
            )
            .await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(client.is_generating("s1"));
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));

    server.emit("g1", done()).await;
    match wait_for_finish(&mut notices, "s1").await {
        ClientNotice::GenerationFinished { state, .. } => {
            assert_eq!(state, GenerationState::Completed)
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_locally_and_absorbs_the_server_terminal() {
    let (client, mut server) = client_with_fake_server(Duration::from_secs(60)).await;
    let mut notices = client.subscribe();

    client.start_generation("s1", "hello").await.expect("start");
    server.expect_command().await;
    server.emit("g1", EventKind::GenerationStart).await;
    let mux = client.multiplexer();
    common::wait_until(|| mux.channel("s1").is_some_and(|c| c.is_generating())).await;

    assert!(client.stop_generation("s1").await.expect("stop sent"));
    assert_eq!(server.expect_command().await, ClientCommand::stop("s1"));
    match wait_for_finish(&mut notices, "s1").await {
        ClientNotice::GenerationFinished { state, .. } => {
            assert_eq!(state, GenerationState::Cancelled)
        }
        other => panic!("unexpected {other:?}"),
    }

    server
        .emit(
            "g1",
            EventKind::Error {
                block_id: None,
                message: "Generation cancelled".into(),
                terminal: true,
            },
        )
        .await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));
    assert!(!client.stop_generation("s1").await.expect("idle stop"));
}

#[tokio::test(start_paused = true)]
async fn stalled_engine_hits_the_server_step_timeout() {
    let config = test_config().with_step_timeout(Duration::from_secs(2));
    let mut harness = Harness::start(config, Arc::new(ScriptedEngine::new().with_stall())).await;

    harness.client.start_generation("s1", "hello").await.expect("start");
    match harness.finished("s1").await {
        ClientNotice::GenerationFinished { state, error, .. } => {
            assert_eq!(state, GenerationState::Errored);
            assert_eq!(error, Some(MuxError::GenerationTimeout(2000).to_string()));
        }
        other => panic!("unexpected {other:?}"),
    }

    let record = common::finalized(&harness.store, "s1").await;
    assert_eq!(record.state, GenerationState::TimedOut);
    assert!(!harness.server.is_generating("s1"));
}
