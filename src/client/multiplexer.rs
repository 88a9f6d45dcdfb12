//! Receive-side routing of one shared event stream to many sessions.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::generation::{GenerationState, GenerationTrigger};
use crate::protocol::{EventKind, StreamEvent};
use crate::store::SessionStateSource;
use crate::timeline::{ResultMatching, SessionTimeline};
use crate::types::{GenerationId, SessionId, Usage};

/// Client bookkeeping for one session.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    pub session_id: SessionId,
    pub focused: bool,
    /// Set when a background session receives output.
    pub unread: bool,
    /// Sum of final usage over every generation seen for this session.
    pub usage: Usage,
    /// Live events may have been missed; pull before trusting the timeline.
    pub needs_refresh: bool,
    pub active_generation: Option<GenerationId>,
    /// Materialized only while focused.
    pub timeline: Option<SessionTimeline>,
    /// Events received while a refresh pull is in flight.
    buffered: Option<Vec<StreamEvent>>,
}

impl SessionChannel {
    fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            focused: false,
            unread: false,
            usage: Usage::default(),
            needs_refresh: false,
            active_generation: None,
            timeline: None,
            buffered: None,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.active_generation.is_some()
    }

    pub fn is_refreshing(&self) -> bool {
        self.buffered.is_some()
    }
}

/// What [`SessionMultiplexer::route`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Applied to the focused session's timeline.
    Applied,
    /// Held until the in-flight refresh installs.
    Buffered,
    /// Background session: counters only.
    Counted,
    /// Not addressed to a session.
    Ignored,
}

/// Per-session channels in a concurrent map, at most one of them focused.
pub struct SessionMultiplexer {
    channels: DashMap<SessionId, SessionChannel>,
    source: Arc<dyn SessionStateSource>,
    matching: ResultMatching,
}

impl SessionMultiplexer {
    pub fn new(source: Arc<dyn SessionStateSource>, matching: ResultMatching) -> Self {
        Self {
            channels: DashMap::new(),
            source,
            matching,
        }
    }

    /// Route one decoded event by its session id.
    pub fn route(&self, event: &StreamEvent) -> Routed {
        let Some(session_id) = event.session_id.as_deref() else {
            return Routed::Ignored;
        };
        let mut channel = self
            .channels
            .entry(session_id.to_string())
            .or_insert_with(|| SessionChannel::new(session_id));

        match &event.kind {
            EventKind::GenerationStart => channel.active_generation = event.generation_id.clone(),
            EventKind::GenerationDone { usage, .. } => {
                if let Some(usage) = usage {
                    channel.usage.merge(usage);
                }
                clear_active(&mut channel, event.generation_id.as_deref());
            }
            EventKind::Error { terminal: true, .. } => {
                clear_active(&mut channel, event.generation_id.as_deref());
            }
            _ => {}
        }

        if !channel.focused {
            if carries_output(&event.kind) {
                channel.unread = true;
            }
            return Routed::Counted;
        }
        if let Some(buffer) = channel.buffered.as_mut() {
            buffer.push(event.clone());
            return Routed::Buffered;
        }
        let matching = self.matching;
        channel
            .timeline
            .get_or_insert_with(|| SessionTimeline::new(session_id, matching))
            .apply_logged(event);
        Routed::Applied
    }

    /// Focus a session: drop every other session's timeline, then pull this
    /// one's persisted state and install it ahead of any live events that
    /// arrived meanwhile.
    pub async fn focus(&self, session_id: &str) -> Result<()> {
        for mut other in self.channels.iter_mut() {
            if other.focused && other.key() != session_id {
                blur_channel(&mut other);
            }
        }
        {
            let mut channel = self
                .channels
                .entry(session_id.to_string())
                .or_insert_with(|| SessionChannel::new(session_id));
            channel.focused = true;
            channel.unread = false;
        }
        tracing::debug!(session_id, "session focused");
        self.refresh(session_id).await
    }

    /// Return a session to the background. Its timeline is dropped.
    pub fn blur(&self, session_id: &str) {
        if let Some(mut channel) = self.channels.get_mut(session_id) {
            blur_channel(&mut channel);
        }
    }

    /// Pull a focused session's state. No-op for background sessions, which
    /// only get their `needs_refresh` flag cleared on their next focus.
    pub async fn refresh(&self, session_id: &str) -> Result<()> {
        {
            let Some(mut channel) = self.channels.get_mut(session_id) else {
                return Ok(());
            };
            if !channel.focused {
                return Ok(());
            }
            channel.buffered.get_or_insert_with(Vec::new);
        }

        let pulled = self.source.load_session(session_id).await;

        let Some(mut channel) = self.channels.get_mut(session_id) else {
            return pulled.map(|_| ());
        };
        let buffered = channel.buffered.take().unwrap_or_default();
        if !channel.focused {
            return pulled.map(|_| ());
        }
        let mut timeline = channel
            .timeline
            .take()
            .unwrap_or_else(|| SessionTimeline::new(session_id, self.matching));
        let result = match pulled {
            Ok(records) => {
                timeline.install(&records);
                channel.needs_refresh = false;
                tracing::debug!(session_id, generations = records.len(), "session state installed");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(session_id, error = %err, "session refresh failed");
                channel.needs_refresh = true;
                Err(err)
            }
        };
        for event in &buffered {
            timeline.apply_logged(event);
        }
        channel.timeline = Some(timeline);
        result
    }

    /// After a reconnect: every session may have missed events.
    pub fn mark_all_needs_refresh(&self) {
        for mut channel in self.channels.iter_mut() {
            channel.needs_refresh = true;
        }
    }

    pub fn focused(&self) -> Option<SessionId> {
        self.channels
            .iter()
            .find(|c| c.focused)
            .map(|c| c.key().clone())
    }

    /// End a generation locally (watchdog or stop) when no terminal event
    /// will arrive.
    pub fn close_generation(
        &self,
        session_id: &str,
        generation_id: Option<&str>,
        trigger: GenerationTrigger,
        message: Option<String>,
    ) {
        let Some(mut channel) = self.channels.get_mut(session_id) else {
            return;
        };
        let generation_id = generation_id
            .map(str::to_string)
            .or_else(|| channel.active_generation.clone());
        clear_active(&mut channel, generation_id.as_deref());
        if let (Some(timeline), Some(id)) = (channel.timeline.as_mut(), generation_id.as_deref()) {
            if let Some(generation) = timeline.generation_mut(id) {
                generation.close(trigger, message);
            }
        }
    }

    pub fn channel(&self, session_id: &str) -> Option<SessionChannel> {
        self.channels.get(session_id).map(|c| c.clone())
    }

    pub fn timeline(&self, session_id: &str) -> Option<SessionTimeline> {
        self.channels
            .get(session_id)
            .and_then(|c| c.timeline.clone())
    }

    pub fn unread_sessions(&self) -> Vec<SessionId> {
        self.channels
            .iter()
            .filter(|c| c.unread)
            .map(|c| c.key().clone())
            .collect()
    }

    /// State of the latest generation in the focused timeline.
    pub fn latest_state(&self, session_id: &str) -> Option<GenerationState> {
        self.channels
            .get(session_id)
            .and_then(|c| c.timeline.as_ref().and_then(|t| t.latest().map(|g| g.state)))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl std::fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("sessions", &self.channels.len())
            .field("focused", &self.focused())
            .field("matching", &self.matching)
            .finish()
    }
}

fn blur_channel(channel: &mut SessionChannel) {
    channel.focused = false;
    channel.timeline = None;
    channel.buffered = None;
    tracing::debug!(session_id = %channel.session_id, "session moved to background");
}

fn clear_active(channel: &mut SessionChannel, generation_id: Option<&str>) {
    if generation_id.is_none() || channel.active_generation.as_deref() == generation_id {
        channel.active_generation = None;
    }
}

fn carries_output(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::ContentDelta { .. }
            | EventKind::ThinkingDelta { .. }
            | EventKind::ToolCall { .. }
            | EventKind::ToolResult { .. }
            | EventKind::GenerationDone { .. }
            | EventKind::Error { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn delta(session: &str, text: &str) -> StreamEvent {
        StreamEvent::generation(
            session,
            "g",
            1,
            EventKind::ContentDelta {
                block_id: "c".into(),
                text: text.into(),
            },
        )
    }

    #[tokio::test]
    async fn background_sessions_only_count() {
        let mux = SessionMultiplexer::new(Arc::new(InMemoryStore::new()), ResultMatching::Strict);
        assert_eq!(mux.route(&delta("a", "hi")), Routed::Counted);
        let channel = mux.channel("a").expect("channel created on first event");
        assert!(channel.unread);
        assert!(channel.timeline.is_none());
    }

    #[tokio::test]
    async fn focus_is_exclusive() {
        let mux = SessionMultiplexer::new(Arc::new(InMemoryStore::new()), ResultMatching::Strict);
        mux.focus("a").await.expect("focus a");
        mux.focus("b").await.expect("focus b");
        assert_eq!(mux.focused().as_deref(), Some("b"));
        assert!(mux.channel("a").expect("a").timeline.is_none());
        assert_eq!(mux.route(&delta("b", "x")), Routed::Applied);
    }

    #[test]
    fn connection_events_are_ignored() {
        let mux = SessionMultiplexer::new(Arc::new(InMemoryStore::new()), ResultMatching::Strict);
        assert_eq!(mux.route(&StreamEvent::connection(EventKind::Ping)), Routed::Ignored);
        assert!(mux.is_empty());
    }
}
