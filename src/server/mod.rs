//! Serving side: accepts commands, runs generations, streams events.

pub mod connection;
pub mod runner;
pub mod writer;

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::MuxConfig;
use crate::engine::ReasoningEngine;
use crate::error::Result;
use crate::generation::GenerationTable;
use crate::store::GenerationStore;
use crate::tools::ToolRegistry;
use crate::transport::FrameTransport;
use crate::types::SessionId;

pub use connection::ServerConnection;
pub use runner::{GenerationHandle, StartRequest};
pub use writer::EventWriter;

/// State shared by every connection of a server.
pub(crate) struct ServerShared {
    pub(crate) config: MuxConfig,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) engine: Arc<dyn ReasoningEngine>,
    pub(crate) store: Arc<dyn GenerationStore>,
    /// One active generation per session, across connections.
    pub(crate) table: GenerationTable,
    pub(crate) handles: DashMap<SessionId, GenerationHandle>,
}

impl ServerShared {
    /// Cancel the session's running generation. Returns whether one existed.
    pub(crate) fn stop(&self, session_id: &str) -> bool {
        match self.handles.get(session_id) {
            Some(handle) if !handle.is_finished() => {
                tracing::info!(
                    session_id,
                    generation_id = %handle.generation_id,
                    "stopping generation"
                );
                handle.cancel();
                true
            }
            _ => false,
        }
    }
}

/// Multiplexing server. Cheap to clone; clones share generations.
#[derive(Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn new(
        config: MuxConfig,
        registry: Arc<ToolRegistry>,
        engine: Arc<dyn ReasoningEngine>,
        store: Arc<dyn GenerationStore>,
    ) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                config,
                registry,
                engine,
                store,
                table: GenerationTable::new(),
                handles: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &MuxConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.shared.registry
    }

    /// Serve one connection until the peer goes away.
    pub async fn serve<T: FrameTransport>(&self, transport: T) -> Result<()> {
        ServerConnection::run(Arc::clone(&self.shared), transport).await
    }

    /// Cancel a session's generation regardless of which connection started it.
    pub fn stop_generation(&self, session_id: &str) -> bool {
        self.shared.stop(session_id)
    }

    pub fn is_generating(&self, session_id: &str) -> bool {
        self.shared.table.is_active(session_id)
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.shared.table.active_sessions()
    }

    /// Accept WebSocket connections on `addr` forever.
    #[cfg(feature = "ws")]
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening");
        self.accept_loop(listener).await
    }

    /// Accept WebSocket connections on a bound listener forever.
    #[cfg(feature = "ws")]
    pub async fn accept_loop(&self, listener: tokio::net::TcpListener) -> Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                let transport = match crate::transport::ws::accept(socket).await {
                    Ok(transport) => transport,
                    Err(err) => {
                        tracing::warn!(%peer, error = %err, "websocket handshake failed");
                        return;
                    }
                };
                if let Err(err) = server.serve(transport).await {
                    tracing::warn!(%peer, error = %err, "connection ended with error");
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("engine", &self.shared.engine.name())
            .field("tools", &self.shared.registry.len())
            .field("active", &self.shared.table.active_sessions())
            .finish()
    }
}
