//! Client-to-server control frames.
//!
//! These travel as bare JSON objects tagged by `type`, not inside the
//! event envelope.

use serde::{Deserialize, Serialize};

use crate::error::{MuxError, Result};
use crate::types::SessionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start a generation for `session_id`.
    SendMessage {
        session_id: SessionId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model_id: Option<String>,
    },
    /// Cancel the active generation of `session_id`, if any.
    StopGeneration { session_id: SessionId },
    Ping,
    Pong,
}

impl ClientCommand {
    pub fn send_message(session_id: impl Into<SessionId>, content: impl Into<String>) -> Self {
        Self::SendMessage {
            session_id: session_id.into(),
            content: content.into(),
            model_id: None,
        }
    }

    pub fn stop(session_id: impl Into<SessionId>) -> Self {
        Self::StopGeneration {
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SendMessage { session_id, .. } | Self::StopGeneration { session_id } => {
                Some(session_id)
            }
            Self::Ping | Self::Pong => None,
        }
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_frame(frame: &str) -> Result<Self> {
        serde_json::from_str(frame)
            .map_err(|e| MuxError::protocol(format!("bad command frame: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_accepts_missing_model_id() {
        let cmd = ClientCommand::from_frame(
            r#"{"type":"send_message","session_id":"s1","content":"hello"}"#,
        )
        .expect("frame should parse");
        assert_eq!(cmd, ClientCommand::send_message("s1", "hello"));
        assert_eq!(cmd.session_id(), Some("s1"));
    }

    #[test]
    fn stop_generation_serializes_with_type_tag() {
        let frame = ClientCommand::stop("s9").to_frame().expect("serialize");
        assert_eq!(frame, r#"{"type":"stop_generation","session_id":"s9"}"#);
    }

    #[test]
    fn unknown_command_is_protocol_error() {
        let err = ClientCommand::from_frame(r#"{"type":"reboot"}"#).unwrap_err();
        assert!(matches!(err, MuxError::Protocol(_)));
    }
}
