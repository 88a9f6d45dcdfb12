//! Tool invocation bridge: registry, schemas, built-in tools.

pub mod arguments;
pub mod builtin;
pub mod dynamic;
pub mod registry;
pub mod tool;
pub mod types;
pub mod validation;

pub use arguments::ToolArguments;
pub use dynamic::{DynamicToolAdapter, DynamicToolProvider};
pub use registry::{ExecutionMode, ToolRegistry};
pub use tool::{FnTool, Tool, ToolExecutionContext};
pub use types::{
    ParameterBuilder, ToolCallRequest, ToolCallResult, ToolContent, ToolDefinition,
    ToolParameters,
};
