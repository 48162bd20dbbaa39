use std::collections::HashMap;

use rmcp::model::{
    Prompt as RmcpPrompt,
    PromptArgument as RmcpPromptArgument,
    Tool as RmcpTool,
};
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};

use crate::agent::llm::types::ToolDefinition;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

pub fn default_timeout() -> u64 {
    120 * 1000
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum McpServerConfig {
    Local(LocalMcpServerConfig),
    StreamableHttp(StreamableHttpMcpServerConfig),
}

impl McpServerConfig {
    pub fn local(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Local(LocalMcpServerConfig {
            command: command.into(),
            args,
            env: None,
            timeout_ms: default_timeout(),
            disabled: false,
        })
    }

    /// Timeout for each request sent to the server, in ms.
    pub fn timeout_ms(&self) -> u64 {
        match self {
            McpServerConfig::Local(config) => config.timeout_ms,
            McpServerConfig::StreamableHttp(config) => config.timeout_ms,
        }
    }

    pub fn is_disabled(&self) -> bool {
        match self {
            McpServerConfig::Local(config) => config.disabled,
            McpServerConfig::StreamableHttp(config) => config.disabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalMcpServerConfig {
    /// The command string used to launch the mcp server
    pub command: String,
    /// A list of arguments to be used to run the command with
    #[serde(default)]
    pub args: Vec<String>,
    /// A list of environment variables to run the command with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Timeout for each mcp request in ms
    #[serde(alias = "timeout", default = "default_timeout")]
    pub timeout_ms: u64,
    /// A boolean flag to denote whether or not to load this mcp server
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StreamableHttpMcpServerConfig {
    /// The URL endpoint for HTTP-based MCP servers
    pub url: String,
    /// HTTP headers to include when communicating with HTTP-based MCP servers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Timeout for each mcp request in ms
    #[serde(alias = "timeout", default = "default_timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct McpManagerSettings {
    /// Fail [super::McpManagerHandle::connect_server] instead of skipping a broken server.
    #[serde(default)]
    pub strict: bool,
    /// Upper bound on connecting to and initializing a single server.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Filesystem paths offered to servers through `roots/list`.
    #[serde(default)]
    pub roots: Vec<String>,
}

impl Default for McpManagerSettings {
    fn default() -> Self {
        Self {
            strict: false,
            connect_timeout_ms: default_connect_timeout(),
            roots: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "message")]
pub enum ServerState {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// What a connected server said it supports during initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub tools: bool,
    pub prompts: bool,
    pub resources: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub name: String,
    pub state: ServerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ServerCapabilities>,
}

impl From<RmcpTool> for ToolDefinition {
    fn from(value: RmcpTool) -> Self {
        Self {
            name: value.name.to_string(),
            description: value.description.map(String::from).unwrap_or_default(),
            input_schema: (*value.input_schema).clone(),
        }
    }
}

/// A tool in the aggregated namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    /// Unique name callers use with [super::McpManagerHandle::execute_tool].
    pub name: String,
    pub server_name: String,
    /// Name of the tool on its server.
    pub tool_name: String,
    pub description: String,
    pub input_schema: Map<String, Value>,
}

impl McpTool {
    /// The tool as presented to a model, under its unique name.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

/// A prompt that can be used to generate text from a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// The name of the prompt
    pub name: String,
    /// Optional description of what the prompt does
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional arguments that can be passed to customize the prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<PromptArgument>>,
}

impl Prompt {
    /// Names of required arguments missing from `args`.
    pub fn missing_arguments(&self, args: Option<&Map<String, Value>>) -> Vec<String> {
        self.arguments
            .iter()
            .flatten()
            .filter(|arg| arg.required == Some(true))
            .filter(|arg| !args.is_some_and(|args| args.contains_key(&arg.name)))
            .map(|arg| arg.name.clone())
            .collect()
    }
}

/// Represents a prompt argument that can be passed to customize the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptArgument {
    /// The name of the argument
    pub name: String,
    /// A description of what the argument is used for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether this argument is required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl From<RmcpPrompt> for Prompt {
    fn from(value: RmcpPrompt) -> Self {
        Self {
            name: value.name,
            description: value.description,
            arguments: value.arguments.map(|v| v.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<RmcpPromptArgument> for PromptArgument {
    fn from(value: RmcpPromptArgument) -> Self {
        Self {
            name: value.name,
            description: value.description,
            required: value.required,
        }
    }
}

/// A prompt in the aggregated namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpPrompt {
    pub name: String,
    pub server_name: String,
    pub prompt: Prompt,
}

/// Result of `prompts/get`. Messages are passed through in their MCP shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub messages: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// A resource in the aggregated namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpResource {
    /// Unique key callers use with [super::McpManagerHandle::read_resource]. Equal to the
    /// server's uri unless another server already exposes it.
    pub uri: String,
    pub server_name: String,
    pub resource: Resource,
}

/// One entry of a `resources/read` result. Exactly one of `text` and `blob` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 encoded binary contents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}
