//! Rebuilds ordered timelines from the event stream.

use std::collections::HashMap;

use serde::Serialize;

use super::block::{BlockStatus, ResultMatching, TimelineBlock};
use crate::generation::{transition, GenerationState, GenerationTrigger};
use crate::protocol::{EventKind, StreamEvent};
use crate::store::FinalizedGeneration;
use crate::types::{GenerationId, SessionId, Usage};

/// An event that cannot be applied to the current timeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Violation {
    #[error("block '{0}' was never opened")]
    UnknownBlock(String),
    #[error("block '{0}' already exists")]
    DuplicateBlock(String),
    #[error("block '{0}' is not a {1} block")]
    WrongBlockKind(String, &'static str),
    #[error("tool call '{0}' already has a result")]
    AlreadyResolved(String),
    #[error("tool result for '{0}' carries no call id")]
    MissingResultId(String),
    #[error("no unresolved call matches result for '{0}'")]
    UnmatchedResult(String),
    #[error("block '{0}' is already finished")]
    BlockClosed(String),
    #[error("generation '{0}' already ended")]
    GenerationClosed(String),
    #[error("event carries no generation id")]
    MissingGeneration,
}

/// Timeline of one generation: ordered blocks plus the running content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationTimeline {
    pub generation_id: GenerationId,
    pub state: GenerationState,
    pub blocks: Vec<TimelineBlock>,
    pub content: String,
    pub usage: Usage,
    pub generation_time: Option<f64>,
    pub error: Option<String>,
    /// Events before the first one seen here were not observed.
    pub partial: bool,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl GenerationTimeline {
    pub fn new(generation_id: impl Into<GenerationId>) -> Self {
        Self {
            generation_id: generation_id.into(),
            state: GenerationState::Requested,
            blocks: Vec::new(),
            content: String::new(),
            usage: Usage::default(),
            generation_time: None,
            error: None,
            partial: false,
            index: HashMap::new(),
        }
    }

    /// Rebuild from a persisted record.
    pub fn from_finalized(record: &FinalizedGeneration) -> Self {
        let mut timeline = Self::new(record.generation_id.clone());
        timeline.state = record.state;
        timeline.content = record.content.clone();
        timeline.usage = record.usage;
        timeline.generation_time = record
            .state
            .is_terminal()
            .then(|| record.generation_time_ms as f64 / 1000.0);
        timeline.error = record.error.clone();
        for block in &record.timeline {
            timeline.push(block.clone());
        }
        timeline
    }

    /// How much of the stream this timeline has absorbed.
    fn progress(&self) -> (bool, usize, usize) {
        (self.is_closed(), self.blocks.len(), self.content.len())
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn block(&self, id: &str) -> Option<&TimelineBlock> {
        self.index.get(id).map(|&i| &self.blocks[i])
    }

    fn push(&mut self, block: TimelineBlock) {
        self.index.insert(block.id().to_string(), self.blocks.len());
        self.blocks.push(block);
    }

    fn thinking_mut(&mut self, id: &str) -> Result<(&mut String, &mut BlockStatus), Violation> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| Violation::UnknownBlock(id.to_string()))?;
        match &mut self.blocks[i] {
            TimelineBlock::Thinking {
                content, status, ..
            } => Ok((content, status)),
            TimelineBlock::ToolCall { .. } => {
                Err(Violation::WrongBlockKind(id.to_string(), "thinking"))
            }
        }
    }

    /// Apply one event of this generation.
    pub fn apply(&mut self, kind: &EventKind, matching: ResultMatching) -> Result<(), Violation> {
        if self.is_closed() {
            return Err(Violation::GenerationClosed(self.generation_id.clone()));
        }
        match kind {
            EventKind::ThinkingStart { block_id, .. } => {
                if self.index.contains_key(block_id) {
                    return Err(Violation::DuplicateBlock(block_id.clone()));
                }
                self.push(TimelineBlock::thinking(block_id.clone()));
            }
            EventKind::ThinkingDelta { block_id, text } => {
                let (content, status) = self.thinking_mut(block_id)?;
                if *status != BlockStatus::Pending {
                    return Err(Violation::BlockClosed(block_id.clone()));
                }
                content.push_str(text);
            }
            EventKind::ThinkingDone { block_id, .. } => {
                let (_, status) = self.thinking_mut(block_id)?;
                *status = BlockStatus::Done;
            }
            EventKind::ToolCall {
                block_id,
                name,
                args,
            } => {
                // Only a resolved call may share its id with a newer call.
                let reusable = |b: &TimelineBlock| matches!(b, TimelineBlock::ToolCall { .. })
                    && !b.is_unresolved_call();
                if self.block(block_id).is_some_and(|b| !reusable(b)) {
                    return Err(Violation::DuplicateBlock(block_id.clone()));
                }
                self.push(TimelineBlock::tool_call(block_id.clone(), name.clone(), args.clone()));
            }
            EventKind::ToolResult {
                block_id,
                name,
                result,
                is_error,
            } => self.resolve(block_id.as_deref(), name, result, *is_error, matching)?,
            EventKind::ContentDelta { text, .. } => self.content.push_str(text),
            EventKind::UsageReport { usage } => self.usage = *usage,
            EventKind::GenerationStart => {}
            EventKind::GenerationDone {
                generation_time,
                usage,
                ..
            } => {
                if let Some(usage) = usage {
                    self.usage = *usage;
                }
                self.generation_time = *generation_time;
            }
            EventKind::Error {
                message, terminal, ..
            } => {
                if *terminal {
                    self.error = Some(message.clone());
                }
            }
            EventKind::Connected { .. }
            | EventKind::Disconnected
            | EventKind::Ping
            | EventKind::Pong => {}
        }
        if let Some(trigger) = GenerationTrigger::for_event(kind) {
            self.advance(trigger);
        }
        Ok(())
    }

    /// Move the lifecycle state; illegal moves are ignored.
    pub fn advance(&mut self, trigger: GenerationTrigger) {
        self.state = transition(self.state, trigger).state();
    }

    /// Close locally (watchdog expiry or stop) with a surfaced error text.
    pub fn close(&mut self, trigger: GenerationTrigger, error: Option<String>) {
        let t = transition(self.state, trigger);
        if t.entered_terminal() {
            self.state = t.state();
            if error.is_some() {
                self.error = error;
            }
        }
    }

    fn resolve(
        &mut self,
        block_id: Option<&str>,
        name: &str,
        result: &serde_json::Value,
        is_error: bool,
        matching: ResultMatching,
    ) -> Result<(), Violation> {
        let position = match (block_id, matching) {
            (Some(id), _) => {
                let nearest = self
                    .blocks
                    .iter()
                    .rposition(|b| {
                        matches!(b, TimelineBlock::ToolCall { id: bid, .. } if bid == id)
                    });
                match nearest {
                    None => return Err(Violation::UnknownBlock(id.to_string())),
                    Some(i) if !self.blocks[i].is_unresolved_call() => {
                        return Err(Violation::AlreadyResolved(id.to_string()))
                    }
                    Some(i) => i,
                }
            }
            (None, ResultMatching::Strict) => {
                return Err(Violation::MissingResultId(name.to_string()))
            }
            (None, ResultMatching::NameFallback) => self
                .blocks
                .iter()
                .rposition(|b| {
                    matches!(b, TimelineBlock::ToolCall { name: n, result: None, .. } if n == name)
                })
                .ok_or_else(|| Violation::UnmatchedResult(name.to_string()))?,
        };

        if let TimelineBlock::ToolCall {
            result: slot,
            is_error: err,
            status,
            ..
        } = &mut self.blocks[position]
        {
            *slot = Some(result.clone());
            *err = is_error;
            *status = if is_error {
                BlockStatus::Error
            } else {
                BlockStatus::Success
            };
        }
        Ok(())
    }
}

/// All generations of one session, in start order.
#[derive(Debug, Clone, Serialize)]
pub struct SessionTimeline {
    pub session_id: SessionId,
    pub generations: Vec<GenerationTimeline>,
    matching: ResultMatching,
}

impl SessionTimeline {
    pub fn new(session_id: impl Into<SessionId>, matching: ResultMatching) -> Self {
        Self {
            session_id: session_id.into(),
            generations: Vec::new(),
            matching,
        }
    }

    pub fn generation(&self, generation_id: &str) -> Option<&GenerationTimeline> {
        self.generations.iter().find(|g| g.generation_id == generation_id)
    }

    pub fn generation_mut(&mut self, generation_id: &str) -> Option<&mut GenerationTimeline> {
        self.generations.iter_mut().find(|g| g.generation_id == generation_id)
    }

    pub fn latest(&self) -> Option<&GenerationTimeline> {
        self.generations.last()
    }

    /// Apply an event routed to this session.
    ///
    /// Events for an unseen generation open it; if that first event is not
    /// `generation_start` the generation is marked partial.
    pub fn apply(&mut self, event: &StreamEvent) -> Result<(), Violation> {
        if matches!(event.kind, EventKind::Error { terminal: false, .. }) {
            return Ok(());
        }
        let generation_id = event
            .generation_id
            .as_deref()
            .ok_or(Violation::MissingGeneration)?;
        let matching = self.matching;
        let existing = self
            .generations
            .iter()
            .position(|g| g.generation_id == generation_id);
        let generation = match existing {
            Some(i) => &mut self.generations[i],
            None => {
                let mut fresh = GenerationTimeline::new(generation_id);
                fresh.partial = !matches!(event.kind, EventKind::GenerationStart);
                self.generations.push(fresh);
                let last = self.generations.len() - 1;
                &mut self.generations[last]
            }
        };
        generation.apply(&event.kind, matching)
    }

    /// Apply and log violations instead of returning them.
    pub fn apply_logged(&mut self, event: &StreamEvent) {
        if let Err(violation) = self.apply(event) {
            tracing::warn!(
                session_id = %self.session_id,
                generation_id = event.generation_id.as_deref().unwrap_or("-"),
                event_type = %event.event_type(),
                %violation,
                "dropping event that violates the timeline"
            );
        }
    }

    /// Install persisted generations.
    ///
    /// Live generations the pull does not know about are kept, closed or
    /// not. When both sides hold a generation that is still running, the
    /// record and the live copy are prefixes of the same stream and the
    /// longer one wins.
    pub fn install(&mut self, records: &[FinalizedGeneration]) {
        let mut live: Vec<GenerationTimeline> = self.generations.drain(..).collect();
        let mut installed = Vec::with_capacity(records.len() + live.len());
        for record in records {
            let pulled = GenerationTimeline::from_finalized(record);
            let current = live
                .iter()
                .position(|g| g.generation_id == record.generation_id)
                .map(|i| live.remove(i));
            installed.push(match current {
                Some(current)
                    if !record.state.is_terminal() && current.progress() >= pulled.progress() =>
                {
                    current
                }
                _ => pulled,
            });
        }
        installed.append(&mut live);
        self.generations = installed;
    }
}
