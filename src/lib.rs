//! chatmux: multiplexed streaming for agent conversations.
//!
//! Many concurrent conversations (sessions) share one full-duplex
//! connection. The serving side runs a reasoning/tool loop per generation
//! and streams typed events; the receiving side routes them per session and
//! rebuilds ordered timelines of thinking, tool calls and content.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chatmux::prelude::*;
//! use chatmux::engine::DemoEngine;
//! use chatmux::tools::builtin;
//!
//! # async fn example() -> chatmux::error::Result<()> {
//! let mut registry = ToolRegistry::new();
//! for tool in builtin::all_tools() {
//!     registry.register(tool)?;
//! }
//! let store = Arc::new(InMemoryStore::new());
//! let server = Server::new(
//!     MuxConfig::default(),
//!     Arc::new(registry),
//!     Arc::new(DemoEngine::new()),
//!     store.clone(),
//! );
//!
//! let (server_end, client_end) = chatmux::transport::duplex(64);
//! tokio::spawn(async move { server.serve(server_end).await });
//!
//! let client = ClientConnection::new(MuxConfig::default(), store);
//! client.attach(client_end).await?;
//! client.focus("s1").await?;
//! client.start_generation("s1", "2 + 3").await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod generation;
pub mod prelude;
pub mod protocol;
pub mod server;
pub mod store;
pub mod timeline;
pub mod tools;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
