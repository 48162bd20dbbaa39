use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

use super::confirmation::{
    ConfirmationError,
    ConfirmationSettings,
};
use super::consts::{
    DEFAULT_MAX_ITERATIONS,
    TOOL_CONFIRMATION_TIMEOUT_MESSAGE,
    TOOL_DENIED_MESSAGE,
};
use super::context::{
    ContextError,
    ContextSettings,
};
use super::error::{
    ClassifiedError,
    ErrorKind,
};
use super::llm::model::ModelError;
use super::llm::types::ToolCall;
use super::mcp::McpManagerError;
use super::mcp::types::McpManagerSettings;

/// Configuration settings to alter agent behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// Maximum model requests per user turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub confirmation: ConfirmationSettings,
    #[serde(default)]
    pub mcp: McpManagerSettings,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context: ContextSettings::default(),
            confirmation: ConfirmationSettings::default(),
            mcp: McpManagerSettings::default(),
        }
    }
}

/// Represents a message from the agent to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "content")]
#[serde(rename_all = "camelCase")]
pub enum AgentEvent {
    /// A user turn has started.
    TurnStarted { session_id: String },
    /// Real-time updates about the turn.
    Update(UpdateEvent),
    /// The user turn has ended.
    EndTurn(TurnSummary),
}

impl From<UpdateEvent> for AgentEvent {
    fn from(value: UpdateEvent) -> Self {
        Self::Update(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateEvent {
    /// Text of an assistant response.
    AgentContent(String),
    /// Sent once at the beginning of a tool use.
    ToolCall(ToolCall),
    /// Sent once at the end of a tool use.
    ToolCallFinished {
        /// The tool that was executed
        tool_call: ToolCall,
        /// The tool execution result
        result: ToolCallResult,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolCallResult {
    /// The server's result, untouched.
    Success(Value),
    /// The user denied the call or did not answer in time.
    Denied { timed_out: bool },
    Error { kind: ErrorKind, message: String },
    Cancelled,
}

impl ToolCallResult {
    /// What the model sees as the tool's output.
    pub fn to_model_value(&self) -> Value {
        match self {
            ToolCallResult::Success(value) => value.clone(),
            ToolCallResult::Denied { timed_out: false } => Value::String(TOOL_DENIED_MESSAGE.to_string()),
            ToolCallResult::Denied { timed_out: true } => Value::String(TOOL_CONFIRMATION_TIMEOUT_MESSAGE.to_string()),
            ToolCallResult::Error { message, .. } => Value::String(format!("Tool execution failed: {message}")),
            ToolCallResult::Cancelled => Value::String("Tool execution was cancelled.".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStopReason {
    /// The model answered without requesting tools.
    EndTurn,
    /// The turn ended because the agent reached the maximum number of model requests.
    MaxIterations,
    /// The caller cancelled the turn.
    Cancelled,
}

/// One tool call of a turn and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool_call: ToolCall,
    pub result: ToolCallResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub stop_reason: AgentStopReason,
    /// Number of model requests made.
    pub iterations: usize,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Text of the last assistant message, if any.
    pub final_text: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Mcp(#[from] McpManagerError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    #[error("{}", .0)]
    Custom(String),
}

impl ClassifiedError for AgentError {
    fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Context(err) => err.kind(),
            AgentError::Mcp(err) => err.kind(),
            AgentError::Model(err) => err.kind(),
            AgentError::Confirmation(err) => err.kind(),
            AgentError::Custom(_) => ErrorKind::System,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: AgentSettings = serde_json::from_value(json!({"mcp": {"strict": true}})).unwrap();
        assert_eq!(settings.max_iterations, 10);
        assert!(settings.mcp.strict);
        assert_eq!(settings.confirmation.timeout_ms, 120_000);
        assert_eq!(settings.context.base64_threshold, 512);
    }

    #[test]
    fn test_tool_call_result_model_value() {
        assert_eq!(
            ToolCallResult::Denied { timed_out: true }.to_model_value(),
            json!(TOOL_CONFIRMATION_TIMEOUT_MESSAGE)
        );
        let result = json!({"content": [{"type": "text", "text": "4"}]});
        assert_eq!(ToolCallResult::Success(result.clone()).to_model_value(), result);
    }
}
