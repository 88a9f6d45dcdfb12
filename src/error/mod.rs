//! Error types for chatmux.

pub mod unified;

pub use unified::{BridgeErrorCode, ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all chatmux operations.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Invalid tool schema for '{tool_name}': {message}")]
    InvalidSchema { tool_name: String, message: String },

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Generation already active for session {session_id}")]
    GenerationAlreadyActive { session_id: String },

    #[error("Generation timed out after {0}ms")]
    GenerationTimeout(u64),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Reasoning engine error: {0}")]
    Engine(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl MuxError {
    /// Shorthand for a protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Shorthand for a tool handler failure.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Protocol(_) | Self::UnknownTool(_) | Self::Serialization(_) => {
                ErrorCategory::Protocol
            }
            Self::ToolExecution { .. } | Self::InvalidArgument(_) => ErrorCategory::Tool,
            Self::GenerationTimeout(_) | Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::ConnectionLost(_) | Self::Io(_) => ErrorCategory::ConnectionLoss,
            Self::GenerationAlreadyActive { .. } => ErrorCategory::DuplicateGeneration,
            Self::Configuration(_)
            | Self::ConfigParse(_)
            | Self::DuplicateTool(_)
            | Self::InvalidSchema { .. } => ErrorCategory::Configuration,
            Self::Engine(_) => ErrorCategory::Engine,
            Self::Storage(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Timeout | ErrorCategory::ConnectionLoss
        )
    }

    /// Whether the end user should see this error.
    ///
    /// Protocol violations stay in the logs; tool failures, terminal
    /// generation states and duplicate-start rejections reach the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Tool
                | ErrorCategory::Timeout
                | ErrorCategory::Cancelled
                | ErrorCategory::Engine
                | ErrorCategory::DuplicateGeneration
        )
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Protocol => RecoverySuggestion::DropFrame,
            ErrorCategory::Tool => RecoverySuggestion::CheckToolImplementation,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::ConnectionLoss => RecoverySuggestion::ReconnectAndRefresh,
            ErrorCategory::DuplicateGeneration => RecoverySuggestion::WaitForActiveGeneration,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Cancelled => RecoverySuggestion::None,
            _ => RecoverySuggestion::ContactSupport,
        }
    }

    /// Map onto a tool-bridge error code.
    pub fn bridge_code(&self) -> BridgeErrorCode {
        match self {
            Self::UnknownTool(_) | Self::InvalidArgument(_) => BridgeErrorCode::InvalidParams,
            Self::Serialization(_) => BridgeErrorCode::ParseError,
            Self::Protocol(_) => BridgeErrorCode::InvalidRequest,
            _ => BridgeErrorCode::InternalError,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, MuxError>;
