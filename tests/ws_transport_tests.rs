//! Full round trip over a real WebSocket.

mod common;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use chatmux::client::{ClientConnection, ClientNotice};
use chatmux::engine::DemoEngine;
use chatmux::generation::GenerationState;
use chatmux::store::InMemoryStore;
use chatmux::transport::ws;
use common::{server, test_config, wait_for_finish};

#[tokio::test]
async fn demo_generation_over_websocket() {
    let store = Arc::new(InMemoryStore::new());
    let engine = DemoEngine::new().with_chunk_delay(Duration::from_millis(1));
    let server = server(test_config(), Arc::new(engine), store.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let accepting = server.clone();
    tokio::spawn(async move { accepting.accept_loop(listener).await });

    let client = ClientConnection::new(test_config(), store.clone());
    let mut notices = client.subscribe();
    let transport = ws::connect(&format!("ws://{addr}")).await.expect("connect");
    client.attach(transport).await.expect("attach");
    client.focus("ws").await.expect("focus");

    client.start_generation("ws", "hello there").await.expect("start");
    match wait_for_finish(&mut notices, "ws").await {
        ClientNotice::GenerationFinished { state, .. } => {
            assert_eq!(state, GenerationState::Completed)
        }
        other => panic!("unexpected {other:?}"),
    }

    let timeline = client.multiplexer().timeline("ws").expect("timeline");
    assert_eq!(timeline.latest().map(|g| g.content.as_str()), Some("You said: hello there"));
    assert!(client.is_connected().await);
}
