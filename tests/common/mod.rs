//! Shared test helpers: server/client harness over the in-memory transport.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use chatmux::client::{ClientConnection, ClientNotice};
use chatmux::config::MuxConfig;
use chatmux::engine::{EngineChunk, EngineToolCall, ReasoningEngine};
use chatmux::error::MuxError;
use chatmux::protocol::{decode_frame, ClientCommand, Decoded, EventKind, StreamEvent};
use chatmux::server::Server;
use chatmux::store::{FinalizedGeneration, GenerationStore, InMemoryStore, SessionStateSource};
use chatmux::tools::{
    builtin, FnTool, Tool, ToolArguments, ToolExecutionContext, ToolParameters, ToolRegistry,
};
use chatmux::transport::{duplex, FrameSink, FrameStream, FrameTransport, MemoryTransport};

/// Config with the documented defaults except a fast retry backoff.
pub fn test_config() -> MuxConfig {
    let mut config = MuxConfig::default();
    config.tool_retry_backoff = Duration::from_millis(10);
    config
}

/// Tool `x`: echoes its integer argument `y`.
pub fn echo_tool() -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        "x",
        "Echo the y argument",
        ToolParameters::object().integer("y", "Value to echo", true).build(),
        |args: ToolArguments, _ctx: ToolExecutionContext| async move {
            let y = args.get_i64("y")?;
            Ok(serde_json::json!({ "echo": y }))
        },
    ))
}

pub fn registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in builtin::all_tools() {
        registry.register(tool).expect("builtin tools should register");
    }
    registry.register(echo_tool()).expect("echo tool should register");
    Arc::new(registry)
}

pub fn text(s: &str) -> EngineChunk {
    EngineChunk::Text(s.to_string())
}

pub fn tool_calls(id: &str, name: &str, args: serde_json::Value) -> EngineChunk {
    EngineChunk::ToolCalls(vec![EngineToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args,
    }])
}

pub fn server(
    config: MuxConfig,
    engine: Arc<dyn ReasoningEngine>,
    store: Arc<InMemoryStore>,
) -> Server {
    Server::new(config, registry(), engine, store)
}

/// Server plus a client attached over an in-memory duplex.
pub struct Harness {
    pub server: Server,
    pub client: ClientConnection,
    pub store: Arc<InMemoryStore>,
    pub notices: broadcast::Receiver<ClientNotice>,
}

impl Harness {
    pub async fn start(config: MuxConfig, engine: Arc<dyn ReasoningEngine>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let server = server(config.clone(), engine, store.clone());
        let (server_end, client_end) = duplex(256);
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(server_end).await });

        let client = ClientConnection::new(config, store.clone());
        let notices = client.subscribe();
        client
            .attach(client_end)
            .await
            .expect("client should attach");
        Self {
            server,
            client,
            store,
            notices,
        }
    }

    /// Next terminal notice for `session_id`.
    pub async fn finished(&mut self, session_id: &str) -> ClientNotice {
        wait_for_finish(&mut self.notices, session_id).await
    }
}

pub async fn wait_for_finish(
    notices: &mut broadcast::Receiver<ClientNotice>,
    session_id: &str,
) -> ClientNotice {
    tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match notices.recv().await.expect("notice channel should stay open") {
                notice @ ClientNotice::GenerationFinished { .. } => {
                    let ours = matches!(
                        &notice,
                        ClientNotice::GenerationFinished { session_id: s, .. } if s == session_id
                    );
                    if ours {
                        return notice;
                    }
                }
                _ => {}
            }
        }
    })
    .await
    .expect("generation should finish")
}

/// Poll `check` until it holds.
pub async fn wait_until<F: FnMut() -> bool>(mut check: F) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should become true");
}

/// Latest record of `session_id` once it has reached a terminal state.
pub async fn finalized(store: &InMemoryStore, session_id: &str) -> FinalizedGeneration {
    wait_until(|| {
        store
            .generations(session_id)
            .last()
            .is_some_and(|record| record.state.is_terminal())
    })
    .await;
    store
        .generations(session_id)
        .pop()
        .expect("terminal record should be stored")
}

/// Protocol-level client: sends commands, reads raw decoded events.
pub struct RawClient {
    sink: FrameSink,
    stream: FrameStream,
}

impl RawClient {
    pub fn new(transport: MemoryTransport) -> Self {
        let (sink, stream) = transport.split();
        Self { sink, stream }
    }

    /// Connect a raw client to a fresh connection of `server`.
    pub fn connect(server: &Server) -> Self {
        let (server_end, client_end) = duplex(256);
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(server_end).await });
        Self::new(client_end)
    }

    pub async fn send(&mut self, command: ClientCommand) {
        let frame = command.to_frame().expect("command should serialize");
        self.sink.send(frame).await.expect("frame should be written");
    }

    pub async fn send_raw(&mut self, frame: &str) -> Result<(), MuxError> {
        self.sink.send(frame.to_string()).await
    }

    /// Next frame, decoded, with its wire `event_id`. Heartbeats included.
    pub async fn next_raw(&mut self) -> Option<(u64, StreamEvent)> {
        loop {
            let frame = self.stream.next().await?.ok()?;
            match decode_frame(&frame).expect("server frames should decode") {
                Decoded::Event { event, sequence } => return Some((sequence, event)),
                Decoded::Unknown { .. } => continue,
            }
        }
    }

    /// Next non-heartbeat event.
    pub async fn next_event(&mut self) -> (u64, StreamEvent) {
        loop {
            let (seq, event) = self.next_raw().await.expect("connection should stay open");
            if !matches!(event.kind, EventKind::Ping | EventKind::Pong) {
                return (seq, event);
            }
        }
    }

    /// Events up to and including the terminal event of `session_id`.
    pub async fn collect_generation(&mut self, session_id: &str) -> Vec<(u64, StreamEvent)> {
        let mut events = Vec::new();
        loop {
            let (seq, event) = self.next_event().await;
            let done = event.session_id.as_deref() == Some(session_id) && event.kind.is_terminal();
            events.push((seq, event));
            if done {
                return events;
            }
        }
    }
}

/// Client end whose reads stop once `cut` fires. When the client then lets
/// go of the stream, the server's writes to it fail.
pub fn severable(transport: MemoryTransport, cut: &CancellationToken) -> (FrameSink, FrameStream) {
    let (sink, stream) = transport.split();
    (sink, stream.take_until(cut.clone().cancelled_owned()).boxed())
}

/// In-memory store whose writes take `delay` to land.
pub struct SlowStore {
    pub inner: InMemoryStore,
    pub delay: Duration,
}

#[async_trait]
impl GenerationStore for SlowStore {
    async fn persist(&self, record: FinalizedGeneration) -> chatmux::error::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.persist(record).await
    }
}

#[async_trait]
impl SessionStateSource for SlowStore {
    async fn load_session(
        &self,
        session_id: &str,
    ) -> chatmux::error::Result<Vec<FinalizedGeneration>> {
        self.inner.load_session(session_id).await
    }
}

/// Engine that never answers, used to hold a generation open.
pub struct SilentEngine;

#[async_trait]
impl ReasoningEngine for SilentEngine {
    fn name(&self) -> &str {
        "silent"
    }

    async fn stream(
        &self,
        _request: &chatmux::engine::EngineRequest,
    ) -> chatmux::error::Result<BoxStream<'static, chatmux::error::Result<EngineChunk>>> {
        Ok(futures::stream::pending::<chatmux::error::Result<EngineChunk>>().boxed())
    }
}
