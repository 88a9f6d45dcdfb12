//! Per-generation lifecycle as a pure transition function.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::protocol::EventKind;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GenerationState {
    #[default]
    Idle,
    Requested,
    Streaming,
    Completed,
    Errored,
    TimedOut,
    Cancelled,
}

impl GenerationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Errored | Self::TimedOut | Self::Cancelled
        )
    }

    /// Requested or Streaming.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Requested | Self::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GenerationTrigger {
    Start,
    /// Any non-terminal event of the generation (start ack, delta, tool traffic).
    Progress,
    Done,
    Error,
    WatchdogExpired,
    Stop,
}

impl GenerationTrigger {
    /// Trigger carried by an event, if any. Connection events and
    /// non-terminal notices do not move a generation.
    pub fn for_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::GenerationStart
            | EventKind::ContentDelta { .. }
            | EventKind::ThinkingStart { .. }
            | EventKind::ThinkingDelta { .. }
            | EventKind::ThinkingDone { .. }
            | EventKind::ToolCall { .. }
            | EventKind::ToolResult { .. }
            | EventKind::UsageReport { .. } => Some(Self::Progress),
            EventKind::GenerationDone { .. } => Some(Self::Done),
            EventKind::Error { terminal: true, .. } => Some(Self::Error),
            EventKind::Error { terminal: false, .. }
            | EventKind::Connected { .. }
            | EventKind::Disconnected
            | EventKind::Ping
            | EventKind::Pong => None,
        }
    }
}

impl GenerationTrigger {
    /// Trigger that moves an active generation into `state`, for terminal
    /// states only.
    pub fn ending_in(state: GenerationState) -> Option<Self> {
        match state {
            GenerationState::Completed => Some(Self::Done),
            GenerationState::Errored => Some(Self::Error),
            GenerationState::TimedOut => Some(Self::WatchdogExpired),
            GenerationState::Cancelled => Some(Self::Stop),
            GenerationState::Idle | GenerationState::Requested | GenerationState::Streaming => None,
        }
    }
}

/// Result of feeding a trigger to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: GenerationState,
        to: GenerationState,
    },
    /// The generation already ended; the trigger is reported, never applied.
    Absorbed {
        state: GenerationState,
        trigger: GenerationTrigger,
    },
    /// Not a legal move from this state.
    Rejected {
        state: GenerationState,
        trigger: GenerationTrigger,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// State after the transition.
    pub fn state(&self) -> GenerationState {
        match *self {
            Self::Applied { to, .. } => to,
            Self::Absorbed { state, .. } | Self::Rejected { state, .. } => state,
        }
    }

    /// True when this transition moved the generation into a terminal state.
    pub fn entered_terminal(&self) -> bool {
        matches!(self, Self::Applied { to, .. } if to.is_terminal())
    }
}

pub fn transition(state: GenerationState, trigger: GenerationTrigger) -> Transition {
    use GenerationState as S;
    use GenerationTrigger as T;

    if state.is_terminal() {
        return Transition::Absorbed { state, trigger };
    }
    let to = match (state, trigger) {
        (S::Idle, T::Start) => S::Requested,
        (S::Requested | S::Streaming, T::Progress) => S::Streaming,
        (S::Requested | S::Streaming, T::Done) => S::Completed,
        (S::Requested | S::Streaming, T::Error) => S::Errored,
        (S::Requested | S::Streaming, T::WatchdogExpired) => S::TimedOut,
        (S::Requested | S::Streaming, T::Stop) => S::Cancelled,
        _ => return Transition::Rejected { state, trigger },
    };
    Transition::Applied { from: state, to }
}
