//! Bijective mapping between [`StreamEvent`] and [`WireEnvelope`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::codes::{ContentType, EventType, MessageStatus};
use super::envelope::{
    BlockPayload, ErrorContent, EventData, TextContent, TitleContent, ToolCallContent,
    ToolResultContent, WireEnvelope,
};
use super::event::{EventKind, StreamEvent};
use crate::error::{MuxError, Result};
use crate::types::SessionId;

/// How `event_id` is assigned on an outbound connection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CounterMode {
    /// Resets to 0 whenever the event type changes in emission order on the
    /// connection and increments while it repeats. Wire compatible.
    #[default]
    PerEventType,
    /// Monotonic per-session sequence starting at 0.
    PerSession,
}

/// Assigns `event_id`s. Heartbeats get `0` and leave the state untouched.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    mode: CounterMode,
    last_type: Option<EventType>,
    current: u64,
    per_session: HashMap<SessionId, u64>,
}

impl SequenceCounter {
    pub fn new(mode: CounterMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    pub fn next(&mut self, event_type: EventType, session_id: Option<&str>) -> u64 {
        if event_type.is_heartbeat() {
            return 0;
        }
        match self.mode {
            CounterMode::PerEventType => {
                if self.last_type == Some(event_type) {
                    self.current += 1;
                } else {
                    self.last_type = Some(event_type);
                    self.current = 0;
                }
                self.current
            }
            CounterMode::PerSession => {
                let Some(session_id) = session_id else {
                    return 0;
                };
                let slot = self.per_session.entry(session_id.to_string()).or_insert(0);
                let id = *slot;
                *slot += 1;
                id
            }
        }
    }

    /// Drop per-session state for a session that will not emit again.
    pub fn forget_session(&mut self, session_id: &str) {
        self.per_session.remove(session_id);
    }
}

/// Stateful encoder for one outbound connection.
#[derive(Debug, Clone, Default)]
pub struct EventEncoder {
    counter: SequenceCounter,
}

impl EventEncoder {
    pub fn new(mode: CounterMode) -> Self {
        Self {
            counter: SequenceCounter::new(mode),
        }
    }

    pub fn counter_mut(&mut self) -> &mut SequenceCounter {
        &mut self.counter
    }

    /// Encode and advance the sequence counter.
    pub fn encode(&mut self, event: &StreamEvent) -> Result<WireEnvelope> {
        let event_type = event.event_type();
        let data = event_data(event)?;
        let event_id = self
            .counter
            .next(event_type, event.session_id.as_deref());
        Ok(WireEnvelope {
            event_type: event_type.code(),
            event_id: event_id.to_string(),
            event_data: serde_json::to_string(&data)?,
        })
    }

    /// Encode straight to a text frame.
    pub fn encode_frame(&mut self, event: &StreamEvent) -> Result<String> {
        Ok(serde_json::to_string(&self.encode(event)?)?)
    }
}

/// Outcome of decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event {
        event: StreamEvent,
        /// `event_id` parsed from the envelope.
        sequence: u64,
    },
    /// A well-formed envelope with an event type this build does not know.
    Unknown { code: i64 },
}

/// Decode a text frame.
///
/// Also accepts the bare control frames `{"type": "ping" | "pong" |
/// "connected"}` that older servers send outside the envelope.
pub fn decode_frame(frame: &str) -> Result<Decoded> {
    let value: serde_json::Value = serde_json::from_str(frame)
        .map_err(|e| MuxError::protocol(format!("frame is not JSON: {e}")))?;
    if value.get("event_type").is_none() {
        return decode_bare_control(&value);
    }
    let envelope: WireEnvelope = serde_json::from_value(value)
        .map_err(|e| MuxError::protocol(format!("malformed envelope: {e}")))?;
    decode(&envelope)
}

/// Decode an envelope.
pub fn decode(envelope: &WireEnvelope) -> Result<Decoded> {
    let Some(event_type) = EventType::from_code(envelope.event_type) else {
        tracing::warn!(code = envelope.event_type, "dropping event with unknown type");
        return Ok(Decoded::Unknown {
            code: envelope.event_type,
        });
    };
    let sequence = envelope
        .event_id
        .parse::<u64>()
        .map_err(|_| {
            MuxError::protocol(format!(
                "event_id '{}' is not a counter",
                envelope.event_id
            ))
        })?;
    let data: EventData = if envelope.event_data.trim().is_empty() {
        EventData::default()
    } else {
        serde_json::from_str(&envelope.event_data)
            .map_err(|e| MuxError::protocol(format!("malformed event_data: {e}")))?
    };

    let kind = decode_kind(event_type, &data)?;
    let event = StreamEvent {
        session_id: data.conversation_id,
        generation_id: data.message_id,
        message_index: data.message_index.unwrap_or(0),
        kind,
    };
    if event.session_id.is_none() && requires_session(event_type) {
        return Err(MuxError::protocol(format!(
            "{event_type} event without conversation_id"
        )));
    }
    if event.generation_id.is_none() && requires_generation(event_type) {
        return Err(MuxError::protocol(format!(
            "{event_type} event without message_id"
        )));
    }
    Ok(Decoded::Event { event, sequence })
}

fn requires_session(event_type: EventType) -> bool {
    !matches!(
        event_type,
        EventType::Connected | EventType::Disconnected | EventType::Ping | EventType::Pong
            | EventType::Error
    )
}

fn requires_generation(event_type: EventType) -> bool {
    requires_session(event_type)
}

fn decode_bare_control(value: &serde_json::Value) -> Result<Decoded> {
    let kind = match value.get("type").and_then(|t| t.as_str()) {
        Some("ping") => EventKind::Ping,
        Some("pong") => EventKind::Pong,
        Some("connected") => EventKind::Connected {
            connection_id: None,
        },
        Some("error") => EventKind::Error {
            block_id: None,
            message: value
                .get("error")
                .and_then(|e| e.as_str())
                .unwrap_or_default()
                .to_string(),
            terminal: false,
        },
        other => {
            return Err(MuxError::protocol(format!(
                "frame is neither an envelope nor a control frame (type {other:?})"
            )))
        }
    };
    Ok(Decoded::Event {
        event: StreamEvent::connection(kind),
        sequence: 0,
    })
}

fn block(
    id: Option<&str>,
    content_type: ContentType,
    content: &impl Serialize,
) -> Result<BlockPayload> {
    Ok(BlockPayload {
        id: id.map(str::to_string),
        content_type: content_type.code(),
        content: serde_json::to_string(content)?,
    })
}

fn event_data(event: &StreamEvent) -> Result<EventData> {
    let mut data = EventData {
        message_id: event.generation_id.clone(),
        conversation_id: event.session_id.clone(),
        ..EventData::default()
    };
    if event.session_id.is_some() {
        data.message_index = Some(event.message_index);
    }
    let pending = Some(MessageStatus::Pending.code());
    let completed = Some(MessageStatus::Completed.code());

    match &event.kind {
        EventKind::Connected { connection_id } => {
            data.connection_id = connection_id.clone();
        }
        EventKind::Disconnected | EventKind::Ping | EventKind::Pong => {}
        EventKind::Error {
            block_id,
            message,
            terminal,
        } => {
            data.message = Some(block(
                block_id.as_deref(),
                ContentType::Error,
                &ErrorContent {
                    error: message.clone(),
                },
            )?);
            data.status = Some(MessageStatus::Error.code());
            data.is_finish = Some(*terminal);
        }
        EventKind::GenerationStart => data.status = pending,
        EventKind::ContentDelta { block_id, text } => {
            data.message = Some(block(
                Some(block_id),
                ContentType::Text,
                &TextContent { text: text.clone() },
            )?);
            data.status = pending;
            data.is_delta = Some(true);
        }
        EventKind::GenerationDone {
            generation_time,
            context_info,
            usage,
        } => {
            data.status = completed;
            data.is_finish = Some(true);
            data.generation_time = *generation_time;
            data.context_info = *context_info;
            data.usage = *usage;
        }
        EventKind::ThinkingStart { block_id, title } => {
            data.message = Some(block(
                Some(block_id),
                ContentType::Thinking,
                &TitleContent {
                    finish_title: title.clone(),
                },
            )?);
            data.status = pending;
            data.is_delta = Some(true);
        }
        EventKind::ThinkingDelta { block_id, text } => {
            data.message = Some(block(
                Some(block_id),
                ContentType::Thinking,
                &TextContent { text: text.clone() },
            )?);
            data.status = pending;
            data.is_delta = Some(true);
        }
        EventKind::ThinkingDone { block_id, title } => {
            data.message = Some(block(
                Some(block_id),
                ContentType::Thinking,
                &TitleContent {
                    finish_title: title.clone(),
                },
            )?);
            data.status = completed;
            data.is_finish = Some(true);
        }
        EventKind::ToolCall {
            block_id,
            name,
            args,
        } => {
            data.message = Some(block(
                Some(block_id),
                ContentType::ToolCall,
                &ToolCallContent {
                    name: name.clone(),
                    args: args.clone(),
                },
            )?);
            data.status = pending;
        }
        EventKind::ToolResult {
            block_id,
            name,
            result,
            is_error,
        } => {
            data.message = Some(block(
                block_id.as_deref(),
                ContentType::ToolResult,
                &ToolResultContent {
                    name: name.clone(),
                    result: result.clone(),
                    is_error: *is_error,
                },
            )?);
            data.status = if *is_error {
                Some(MessageStatus::Error.code())
            } else {
                completed
            };
        }
        EventKind::UsageReport { usage } => {
            data.usage = Some(*usage);
            data.status = pending;
        }
    }
    Ok(data)
}

fn expect_block<'a>(
    event_type: EventType,
    data: &'a EventData,
    want: ContentType,
) -> Result<&'a BlockPayload> {
    let block = data
        .message
        .as_ref()
        .ok_or_else(|| MuxError::protocol(format!("{event_type} event without message block")))?;
    if block.content_type != want.code() {
        return Err(MuxError::protocol(format!(
            "{event_type} event carries content_type {} (expected {})",
            block.content_type,
            want.code()
        )));
    }
    Ok(block)
}

fn block_id(event_type: EventType, block: &BlockPayload) -> Result<String> {
    block
        .id
        .clone()
        .ok_or_else(|| MuxError::protocol(format!("{event_type} block without id")))
}

fn content<T: serde::de::DeserializeOwned>(
    event_type: EventType,
    block: &BlockPayload,
) -> Result<T> {
    serde_json::from_str(&block.content)
        .map_err(|e| MuxError::protocol(format!("{event_type} block content is malformed: {e}")))
}

fn decode_kind(event_type: EventType, data: &EventData) -> Result<EventKind> {
    Ok(match event_type {
        EventType::Connected => EventKind::Connected {
            connection_id: data.connection_id.clone(),
        },
        EventType::Disconnected => EventKind::Disconnected,
        EventType::Ping => EventKind::Ping,
        EventType::Pong => EventKind::Pong,
        EventType::Error => {
            let (block_id, message) = match &data.message {
                Some(block) => {
                    let body: ErrorContent = content(event_type, block)?;
                    (block.id.clone(), body.error)
                }
                None => (None, String::new()),
            };
            EventKind::Error {
                block_id,
                message,
                terminal: data.is_finish.unwrap_or(false) && data.message_id.is_some(),
            }
        }
        EventType::GenerationStart => EventKind::GenerationStart,
        EventType::ContentDelta => {
            let block = expect_block(event_type, data, ContentType::Text)?;
            let body: TextContent = content(event_type, block)?;
            EventKind::ContentDelta {
                block_id: block_id(event_type, block)?,
                text: body.text,
            }
        }
        EventType::GenerationDone => EventKind::GenerationDone {
            generation_time: data.generation_time,
            context_info: data.context_info,
            usage: data.usage,
        },
        EventType::ThinkingStart | EventType::ThinkingDone => {
            let block = expect_block(event_type, data, ContentType::Thinking)?;
            let body: TitleContent = content(event_type, block)?;
            let block_id = block_id(event_type, block)?;
            if event_type == EventType::ThinkingStart {
                EventKind::ThinkingStart {
                    block_id,
                    title: body.finish_title,
                }
            } else {
                EventKind::ThinkingDone {
                    block_id,
                    title: body.finish_title,
                }
            }
        }
        EventType::ThinkingDelta => {
            let block = expect_block(event_type, data, ContentType::Thinking)?;
            let body: TextContent = content(event_type, block)?;
            EventKind::ThinkingDelta {
                block_id: block_id(event_type, block)?,
                text: body.text,
            }
        }
        EventType::ToolCall => {
            let block = expect_block(event_type, data, ContentType::ToolCall)?;
            let body: ToolCallContent = content(event_type, block)?;
            EventKind::ToolCall {
                block_id: block_id(event_type, block)?,
                name: body.name,
                args: body.args,
            }
        }
        EventType::ToolResult => {
            let block = expect_block(event_type, data, ContentType::ToolResult)?;
            let body: ToolResultContent = content(event_type, block)?;
            let is_error =
                body.is_error || data.status == Some(MessageStatus::Error.code());
            EventKind::ToolResult {
                block_id: block.id.clone(),
                name: body.name,
                result: body.result,
                is_error,
            }
        }
        EventType::UsageReport => EventKind::UsageReport {
            usage: data
                .usage
                .ok_or_else(|| MuxError::protocol("usage_report event without usage"))?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Usage;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ev(kind: EventKind) -> StreamEvent {
        StreamEvent::generation("s1", "g1", 0, kind)
    }

    fn decoded(envelope: &WireEnvelope) -> StreamEvent {
        match decode(envelope).expect("envelope should decode") {
            Decoded::Event { event, .. } => event,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn counter_resets_on_type_change_and_increments_on_repeat() {
        let mut encoder = EventEncoder::new(CounterMode::PerEventType);
        let script = [
            ev(EventKind::GenerationStart),
            ev(EventKind::ThinkingStart { block_id: "t".into(), title: "x".into() }),
            ev(EventKind::ThinkingDelta { block_id: "t".into(), text: "a".into() }),
            ev(EventKind::ThinkingDelta { block_id: "t".into(), text: "b".into() }),
            ev(EventKind::ThinkingDelta { block_id: "t".into(), text: "c".into() }),
            StreamEvent::connection(EventKind::Ping),
            ev(EventKind::ThinkingDelta { block_id: "t".into(), text: "d".into() }),
            ev(EventKind::ContentDelta { block_id: "c".into(), text: "hi".into() }),
            ev(EventKind::ContentDelta { block_id: "c".into(), text: "!".into() }),
        ];
        let ids: Vec<String> = script
            .iter()
            .map(|e| encoder.encode(e).expect("encode").event_id)
            .collect();
        assert_eq!(ids, vec!["0", "0", "0", "1", "2", "0", "3", "0", "1"]);
    }

    #[test]
    fn counter_is_per_connection_not_per_session() {
        let mut encoder = EventEncoder::default();
        let delta = |block: &str, text: &str| EventKind::ContentDelta {
            block_id: block.into(),
            text: text.into(),
        };
        let a = StreamEvent::generation("a", "ga", 0, delta("x", "1"));
        let b = StreamEvent::generation("b", "gb", 0, delta("y", "2"));
        assert_eq!(encoder.encode(&a).expect("encode").event_id, "0");
        assert_eq!(encoder.encode(&b).expect("encode").event_id, "1");
    }

    #[test]
    fn per_session_counter_is_monotonic_per_session() {
        let mut encoder = EventEncoder::new(CounterMode::PerSession);
        let a = |k| StreamEvent::generation("a", "ga", 0, k);
        let b = |k| StreamEvent::generation("b", "gb", 0, k);
        let ids: Vec<String> = [
            a(EventKind::GenerationStart),
            b(EventKind::GenerationStart),
            a(EventKind::ContentDelta { block_id: "x".into(), text: "1".into() }),
            a(EventKind::ContentDelta { block_id: "x".into(), text: "2".into() }),
            b(EventKind::GenerationDone { generation_time: None, context_info: None, usage: None }),
        ]
        .iter()
        .map(|e| encoder.encode(e).expect("encode").event_id)
        .collect();
        assert_eq!(ids, vec!["0", "0", "1", "2", "1"]);
    }

    #[test]
    fn thinking_delta_matches_wire_shape() {
        let mut encoder = EventEncoder::default();
        let envelope = encoder
            .encode(&ev(EventKind::ThinkingDelta { block_id: "t1".into(), text: "foo".into() }))
            .expect("encode");
        assert_eq!(envelope.event_type, 3001);
        let data: serde_json::Value = serde_json::from_str(&envelope.event_data).expect("json");
        assert_eq!(
            data,
            json!({
                "message_id": "g1",
                "conversation_id": "s1",
                "message": { "id": "t1", "content_type": 10040, "content": "{\"text\":\"foo\"}" },
                "status": 4,
                "is_delta": true,
                "message_index": 0,
            })
        );
    }

    #[test]
    fn every_session_event_survives_encode_decode() {
        let mut encoder = EventEncoder::default();
        let kinds = vec![
            EventKind::GenerationStart,
            EventKind::ToolCall {
                block_id: "c1".into(),
                name: "x".into(),
                args: json!({ "y": 1 }),
            },
            EventKind::ToolResult {
                block_id: Some("c1".into()),
                name: "x".into(),
                result: json!("ok"),
                is_error: true,
            },
            EventKind::ThinkingDone { block_id: "t".into(), title: "done".into() },
            EventKind::UsageReport { usage: Usage::new(3, 4) },
            EventKind::GenerationDone {
                generation_time: Some(1.5),
                context_info: None,
                usage: Some(Usage::new(1, 2)),
            },
            EventKind::Error { block_id: Some("e".into()), message: "boom".into(), terminal: true },
        ];
        for kind in kinds {
            let event = ev(kind);
            assert_eq!(decoded(&encoder.encode(&event).expect("encode")), event);
        }
    }

    #[test]
    fn unknown_event_type_is_reported_not_failed() {
        let envelope = WireEnvelope {
            event_type: 7777,
            event_id: "0".into(),
            event_data: "{}".into(),
        };
        assert_eq!(decode(&envelope).expect("decode"), Decoded::Unknown { code: 7777 });
    }

    #[test]
    fn delta_without_block_id_is_a_protocol_error() {
        let envelope = WireEnvelope {
            event_type: 2001,
            event_id: "0".into(),
            event_data: json!({
                "message_id": "g",
                "conversation_id": "s",
                "message": { "content_type": 10000, "content": "{\"text\":\"x\"}" },
            })
            .to_string(),
        };
        let err = decode(&envelope).unwrap_err();
        assert!(matches!(err, MuxError::Protocol(_)));
    }

    #[test]
    fn session_event_without_conversation_id_is_rejected() {
        let envelope = WireEnvelope {
            event_type: 2000,
            event_id: "0".into(),
            event_data: json!({ "message_id": "g" }).to_string(),
        };
        assert!(decode(&envelope).is_err());
    }

    #[test]
    fn bare_control_frames_decode() {
        match decode_frame(r#"{"type":"ping"}"#).expect("ping decodes") {
            Decoded::Event { event, .. } => assert_eq!(event.kind, EventKind::Ping),
            other => panic!("unexpected {other:?}"),
        }
        assert!(decode_frame(r#"{"type":"mystery"}"#).is_err());
        assert!(decode_frame("not json").is_err());
    }

    #[test]
    fn rejection_notice_is_not_terminal() {
        let mut encoder = EventEncoder::default();
        let notice = StreamEvent::session_notice("s1", "generation already active");
        let event = decoded(&encoder.encode(&notice).expect("encode"));
        assert!(!event.kind.is_terminal());
        assert_eq!(event, notice);
    }
}
