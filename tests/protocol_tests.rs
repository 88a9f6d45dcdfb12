//! Wire-level tests against a live server connection.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use chatmux::engine::{EngineChunk, ScriptedEngine};
use chatmux::protocol::{
    decode, decode_frame, ClientCommand, CounterMode, Decoded, EventEncoder, EventKind, EventType,
    StreamEvent, WireEnvelope,
};
use chatmux::store::InMemoryStore;
use common::{server, test_config, text, RawClient};

fn thinking_then_answer() -> ScriptedEngine {
    ScriptedEngine::new().with_turn(vec![
        text("<think>foo"),
        text("bar</think>"),
        text("hi "),
        text("there"),
        EngineChunk::Done,
    ])
}

#[tokio::test]
async fn event_ids_reset_on_type_change_and_count_repeats() {
    let store = Arc::new(InMemoryStore::new());
    let server = server(test_config(), Arc::new(thinking_then_answer()), store);
    let mut raw = RawClient::connect(&server);

    let (seq, connected) = raw.next_event().await;
    assert_eq!((seq, connected.event_type()), (0, EventType::Connected));

    raw.send(ClientCommand::send_message("s1", "hello")).await;
    let events = raw.collect_generation("s1").await;
    let observed: Vec<(EventType, u64)> = events
        .iter()
        .map(|(seq, e)| (e.event_type(), *seq))
        .collect();
    assert_eq!(
        observed,
        vec![
            (EventType::GenerationStart, 0),
            (EventType::ThinkingStart, 0),
            (EventType::ThinkingDelta, 0),
            (EventType::ThinkingDelta, 1),
            (EventType::ThinkingDone, 0),
            (EventType::ContentDelta, 0),
            (EventType::ContentDelta, 1),
            (EventType::GenerationDone, 0),
        ]
    );

    let indexes: Vec<u64> = events.iter().map(|(_, e)| e.message_index).collect();
    assert_eq!(indexes, (0..8).collect::<Vec<_>>());
    let generation_id = &events[0].1.generation_id;
    assert!(events
        .iter()
        .all(|(_, e)| e.session_id.as_deref() == Some("s1") && &e.generation_id == generation_id));
}

#[tokio::test]
async fn per_session_counter_mode_is_monotonic() {
    let config = test_config().with_counter_mode(CounterMode::PerSession);
    let server = server(config, Arc::new(thinking_then_answer()), Arc::new(InMemoryStore::new()));
    let mut raw = RawClient::connect(&server);
    raw.next_event().await;

    raw.send(ClientCommand::send_message("s1", "hello")).await;
    let seqs: Vec<u64> = raw
        .collect_generation("s1")
        .await
        .into_iter()
        .map(|(seq, _)| seq)
        .collect();
    assert_eq!(seqs, (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn thinking_blocks_carry_titles_and_text_payloads() {
    let store = Arc::new(InMemoryStore::new());
    let server = server(test_config(), Arc::new(thinking_then_answer()), store);
    let mut raw = RawClient::connect(&server);
    raw.next_event().await;
    raw.send(ClientCommand::send_message("s1", "hello")).await;
    let events = raw.collect_generation("s1").await;

    match &events[1].1.kind {
        EventKind::ThinkingStart { title, .. } => assert_eq!(title, "深度思考中"),
        other => panic!("expected thinking start, got {other:?}"),
    }
    match &events[4].1.kind {
        EventKind::ThinkingDone { title, .. } => assert_eq!(title, "已完成思考"),
        other => panic!("expected thinking done, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_client_frames_are_dropped_and_connection_survives() {
    let store = Arc::new(InMemoryStore::new());
    let server = server(test_config(), Arc::new(thinking_then_answer()), store);
    let mut raw = RawClient::connect(&server);
    raw.next_event().await;

    raw.send_raw("{not json").await.expect("write should succeed");
    raw.send_raw(r#"{"type":"launch_rockets"}"#).await.expect("write should succeed");
    raw.send(ClientCommand::Ping).await;

    let (_, pong) = raw.next_raw().await.expect("connection should stay open");
    assert_eq!(pong.kind, EventKind::Pong);
}

#[test]
fn wire_frame_has_stringified_event_data() {
    let mut encoder = EventEncoder::default();
    let event = StreamEvent::generation(
        "s1",
        "g1",
        2,
        EventKind::ToolCall { block_id: "c1".into(), name: "x".into(), args: json!({ "y": 1 }) },
    );
    let frame = encoder.encode_frame(&event).expect("encode");
    let raw: serde_json::Value = serde_json::from_str(&frame).expect("frame is json");
    assert_eq!(raw["event_type"], 4000);
    assert_eq!(raw["event_id"], "0");
    let event_data = raw["event_data"].as_str().expect("event_data is a string");
    let data: serde_json::Value = serde_json::from_str(event_data).expect("inner json");
    assert_eq!(data["conversation_id"], "s1");
    assert_eq!(data["message_id"], "g1");
    assert_eq!(data["message_index"], 2);
    assert_eq!(data["status"], 4);
    assert_eq!(data["message"]["content_type"], 10050);
    let content = data["message"]["content"].as_str().expect("content is a string");
    let content: serde_json::Value = serde_json::from_str(content).expect("content json");
    assert_eq!(content, json!({ "name": "x", "args": { "y": 1 } }));

    match decode_frame(&frame).expect("decode") {
        Decoded::Event { event: decoded, sequence } => {
            assert_eq!(sequence, 0);
            assert_eq!(decoded, event);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn unknown_event_types_are_skipped_for_forward_compatibility() {
    let envelope = WireEnvelope {
        event_type: 6001,
        event_id: "4".into(),
        event_data: r#"{"anything": true}"#.into(),
    };
    assert_eq!(decode(&envelope).expect("decode"), Decoded::Unknown { code: 6001 });
}

#[test]
fn tool_result_without_id_decodes_for_legacy_producers() {
    let envelope = WireEnvelope {
        event_type: 4001,
        event_id: "0".into(),
        event_data: json!({
            "message_id": "g",
            "conversation_id": "s",
            "status": 1,
            "message": { "content_type": 10051, "content": "{\"name\":\"x\",\"result\":\"ok\"}" },
        })
        .to_string(),
    };
    match decode(&envelope).expect("decode") {
        Decoded::Event { event, .. } => assert_eq!(
            event.kind,
            EventKind::ToolResult {
                block_id: None,
                name: "x".into(),
                result: json!("ok"),
                is_error: false,
            }
        ),
        other => panic!("unexpected {other:?}"),
    }
}
