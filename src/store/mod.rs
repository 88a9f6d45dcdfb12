//! Persistence collaborators.
//!
//! The serving side hands every finished generation to a [`GenerationStore`];
//! the receiving side pulls a session's history back through a
//! [`SessionStateSource`] on refocus or reconnect.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::generation::GenerationState;
use crate::timeline::TimelineBlock;
use crate::types::{GenerationId, SessionId, Usage};

pub use memory::InMemoryStore;

/// Stored record of one generation.
///
/// Written once when the generation starts and again if its connection is
/// lost, both times in a non-terminal state; the record written on the
/// terminal transition replaces those snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedGeneration {
    pub session_id: SessionId,
    pub generation_id: GenerationId,
    pub state: GenerationState,
    pub timeline: Vec<TimelineBlock>,
    pub content: String,
    pub usage: Usage,
    pub generation_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    /// Store `record`, replacing any earlier record of the same generation.
    async fn persist(&self, record: FinalizedGeneration) -> Result<()>;
}

#[async_trait]
pub trait SessionStateSource: Send + Sync {
    /// Persisted generations of a session, oldest first.
    async fn load_session(&self, session_id: &str) -> Result<Vec<FinalizedGeneration>>;
}
