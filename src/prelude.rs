//! Convenience re-exports for common use.

pub use crate::client::{ClientConnection, ClientNotice, SessionMultiplexer};
pub use crate::config::MuxConfig;
pub use crate::engine::{EngineChunk, EngineRequest, ReasoningEngine};
pub use crate::error::{MuxError, Result};
pub use crate::generation::{GenerationState, GenerationTable};
pub use crate::protocol::{ClientCommand, EventKind, StreamEvent};
pub use crate::server::Server;
pub use crate::store::{FinalizedGeneration, GenerationStore, InMemoryStore, SessionStateSource};
pub use crate::timeline::{GenerationTimeline, SessionTimeline, TimelineBlock};
pub use crate::tools::{FnTool, Tool, ToolArguments, ToolParameters, ToolRegistry};
pub use crate::types::{SessionId, Usage};
