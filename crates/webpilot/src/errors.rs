use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems with a tool call the model emitted, kept inside the message so the caller decides
/// whether they are fatal
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Invalid tool name: {0}")]
    InvalidName(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures of an inference operation that are not recovered locally
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model emitted an unusable tool call: {0}")]
    InvalidToolCall(#[from] ToolError),

    #[error("Arguments for tool {tool} do not match the expected shape: {source}")]
    ToolArguments {
        tool: String,
        source: serde_json::Error,
    },

    #[error("No structured response received for {operation}")]
    EmptyResponse { operation: &'static str },

    #[error("Response for {operation} does not match its schema: {source}")]
    InvalidResponse {
        operation: &'static str,
        source: serde_json::Error,
    },
}
