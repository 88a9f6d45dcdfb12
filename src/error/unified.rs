//! Unified error classification and recovery.

use serde::{Deserialize, Serialize};

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed envelope, unknown tool or reconstruction violation.
    Protocol,
    /// A tool handler failed; surfaced as error content, never fatal.
    Tool,
    Timeout,
    Cancelled,
    ConnectionLoss,
    /// A start arrived while the session already had an active generation.
    DuplicateGeneration,
    Configuration,
    Engine,
    Unknown,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    DropFrame,
    CheckToolImplementation,
    IncreaseTimeout,
    ReconnectAndRefresh,
    WaitForActiveGeneration,
    CheckConfiguration,
    ContactSupport,
    None,
}

/// JSON-RPC style error codes used by the tool bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl BridgeErrorCode {
    /// Numeric wire code.
    pub fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }
}
