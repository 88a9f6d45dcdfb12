//! Concurrent table of active generations, one slot per session.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use super::state::{transition, GenerationState, GenerationTrigger, Transition};
use crate::error::{MuxError, Result};
use crate::protocol::{EventKind, StreamEvent};
use crate::types::{new_generation_id, GenerationId, SessionId};

/// Bookkeeping for one in-flight generation.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub session_id: SessionId,
    /// `None` on the requesting side until the first event names it.
    pub generation_id: Option<GenerationId>,
    pub state: GenerationState,
    pub block_ids_seen: HashSet<String>,
    pub started_at: DateTime<Utc>,
    pub last_progress_at: Instant,
}

impl GenerationContext {
    fn new(session_id: &str, generation_id: Option<GenerationId>) -> Self {
        Self {
            session_id: session_id.to_string(),
            generation_id,
            state: GenerationState::Requested,
            block_ids_seen: HashSet::new(),
            started_at: Utc::now(),
            last_progress_at: Instant::now(),
        }
    }
}

/// Holds at most one non-terminal generation per session. Contexts are
/// created on start and removed on their terminal transition.
#[derive(Debug, Default)]
pub struct GenerationTable {
    contexts: DashMap<SessionId, GenerationContext>,
}

impl GenerationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a generation with a fresh id.
    pub fn start(&self, session_id: &str) -> Result<GenerationId> {
        let id = new_generation_id();
        self.start_with_id(session_id, Some(id.clone()))?;
        Ok(id)
    }

    /// Start a generation whose id is supplied (or learned later).
    ///
    /// Rejected with [`MuxError::GenerationAlreadyActive`] while the session
    /// has a Requested or Streaming generation. Never queued.
    pub fn start_with_id(
        &self,
        session_id: &str,
        generation_id: Option<GenerationId>,
    ) -> Result<()> {
        match self.contexts.entry(session_id.to_string()) {
            Entry::Occupied(mut slot) => {
                if slot.get().state.is_active() {
                    return Err(MuxError::GenerationAlreadyActive {
                        session_id: session_id.to_string(),
                    });
                }
                slot.insert(GenerationContext::new(session_id, generation_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(GenerationContext::new(session_id, generation_id));
            }
        }
        tracing::debug!(session_id, "generation requested");
        Ok(())
    }

    /// Apply a trigger to the session's active generation.
    ///
    /// `generation_id` guards against events of an older generation landing
    /// on a newer one; an unbound context adopts the first id it sees.
    pub fn apply(
        &self,
        session_id: &str,
        generation_id: Option<&str>,
        trigger: GenerationTrigger,
    ) -> Transition {
        let Some(mut ctx) = self.contexts.get_mut(session_id) else {
            return Transition::Absorbed {
                state: GenerationState::Idle,
                trigger,
            };
        };
        match (&ctx.generation_id, generation_id) {
            (Some(current), Some(incoming)) if current != incoming => {
                return Transition::Absorbed {
                    state: GenerationState::Idle,
                    trigger,
                };
            }
            (None, Some(incoming)) => ctx.generation_id = Some(incoming.to_string()),
            _ => {}
        }

        let outcome = transition(ctx.state, trigger);
        if let Transition::Applied { to, .. } = outcome {
            ctx.state = to;
            ctx.last_progress_at = Instant::now();
        }
        drop(ctx);

        if outcome.entered_terminal() {
            self.evict_terminal(session_id);
        }
        outcome
    }

    /// Drop the session's context only if it is still terminal; a start that
    /// raced in after the guard was released keeps its new context.
    fn evict_terminal(&self, session_id: &str) {
        self.contexts
            .remove_if(session_id, |_, ctx| ctx.state.is_terminal());
    }

    /// Apply the trigger carried by `event` and record its block id.
    pub fn apply_event(&self, event: &StreamEvent) -> Option<Transition> {
        let session_id = event.session_id.as_deref()?;
        let trigger = GenerationTrigger::for_event(&event.kind)?;
        // An unbound context only binds to the generation that announces itself.
        if let Some(ctx) = self.contexts.get(session_id) {
            if ctx.generation_id.is_none() && !matches!(event.kind, EventKind::GenerationStart) {
                return Some(Transition::Absorbed {
                    state: ctx.state,
                    trigger,
                });
            }
        }
        if let Some(block_id) = block_id_of(&event.kind) {
            if let Some(mut ctx) = self.contexts.get_mut(session_id) {
                ctx.block_ids_seen.insert(block_id.to_string());
            }
        }
        Some(self.apply(session_id, event.generation_id.as_deref(), trigger))
    }

    /// Snapshot of the session's active generation.
    pub fn active(&self, session_id: &str) -> Option<GenerationContext> {
        self.contexts
            .get(session_id)
            .filter(|ctx| ctx.state.is_active())
            .map(|ctx| ctx.clone())
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active(session_id).is_some()
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.contexts
            .iter()
            .filter(|entry| entry.state.is_active())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

fn block_id_of(kind: &EventKind) -> Option<&str> {
    match kind {
        EventKind::ContentDelta { block_id, .. }
        | EventKind::ThinkingStart { block_id, .. }
        | EventKind::ThinkingDelta { block_id, .. }
        | EventKind::ThinkingDone { block_id, .. }
        | EventKind::ToolCall { block_id, .. } => Some(block_id),
        EventKind::ToolResult { block_id, .. } => block_id.as_deref(),
        _ => None,
    }
}
