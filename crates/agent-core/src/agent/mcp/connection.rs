//! Seams between the manager and a live MCP session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::ServiceError;
use rmcp::model::CallToolResult;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};
use tokio::sync::mpsc;
use tracing::{
    debug,
    warn,
};

use super::roots::Root;
use super::sampling::{
    SamplingError,
    SamplingHandler,
    SamplingRequest,
    SamplingResponse,
};
use super::types::{
    McpServerConfig,
    Prompt,
    PromptOutput,
    Resource,
    ResourceContent,
    ServerCapabilities,
};
use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};
use crate::agent::llm::types::ToolDefinition;

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum McpServerError {
    #[error("An error occurred with the service: {}", .message)]
    Service {
        message: String,
        #[serde(skip)]
        #[source]
        source: Option<Arc<ServiceError>>,
    },
    #[error("Failed to launch the server: {}", .0)]
    Launch(String),
    #[error("The request did not complete within {:?}", .0)]
    Timeout(Duration),
    #[error("The request was cancelled")]
    Cancelled,
    #[error("The server does not support {}", .0)]
    Unsupported(String),
    #[error("The channel has closed")]
    Channel,
    #[error("{}", .0)]
    Custom(String),
}

impl From<ServiceError> for McpServerError {
    fn from(value: ServiceError) -> Self {
        Self::Service {
            message: value.to_string(),
            source: Some(Arc::new(value)),
        }
    }
}

impl ClassifiedError for McpServerError {
    fn kind(&self) -> ErrorKind {
        match self {
            McpServerError::Timeout(_) => ErrorKind::Timeout,
            McpServerError::Cancelled => ErrorKind::Cancelled,
            McpServerError::Unsupported(_) => ErrorKind::User,
            McpServerError::Service { .. }
            | McpServerError::Launch(_)
            | McpServerError::Channel
            | McpServerError::Custom(_) => ErrorKind::System,
        }
    }
}

/// A live session with one MCP server.
///
/// Implementations must be cancel safe: dropping a request future abandons the request.
#[async_trait]
pub trait McpConnection: std::fmt::Debug + Send + Sync {
    fn capabilities(&self) -> ServerCapabilities;

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpServerError>;

    /// Returns the server's result untouched.
    async fn call_tool(&self, name: &str, args: Option<Map<String, Value>>) -> Result<CallToolResult, McpServerError>;

    async fn list_prompts(&self) -> Result<Vec<Prompt>, McpServerError>;

    async fn get_prompt(&self, name: &str, args: Option<Map<String, Value>>) -> Result<PromptOutput, McpServerError>;

    async fn list_resources(&self) -> Result<Vec<Resource>, McpServerError>;

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>, McpServerError>;

    /// Ends the session. Safe to call more than once.
    async fn close(&self);
}

/// Opens connections for server configs.
#[async_trait]
pub trait McpLauncher: std::fmt::Debug + Send + Sync {
    async fn launch(
        &self,
        server_name: &str,
        config: &McpServerConfig,
        client: ClientContext,
    ) -> Result<Arc<dyn McpConnection>, McpServerError>;
}

/// Server-originated notifications that invalidate cached listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChanged {
    Tools,
    Prompts,
    Resources,
}

/// Client side of a session: answers server-to-client requests and forwards notifications.
#[derive(Debug, Clone)]
pub struct ClientContext {
    server_name: String,
    roots: Arc<Vec<Root>>,
    sampler: Option<Arc<dyn SamplingHandler>>,
    list_changed_tx: mpsc::Sender<ListChanged>,
}

impl ClientContext {
    pub fn new(
        server_name: impl Into<String>,
        roots: Arc<Vec<Root>>,
        sampler: Option<Arc<dyn SamplingHandler>>,
        list_changed_tx: mpsc::Sender<ListChanged>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            roots,
            sampler,
            list_changed_tx,
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn supports_sampling(&self) -> bool {
        self.sampler.is_some()
    }

    /// Answer to `roots/list`.
    pub fn list_roots(&self) -> Vec<Root> {
        debug!(server_name = %self.server_name, "server requested roots");
        self.roots.as_ref().clone()
    }

    /// Answer to `sampling/createMessage`.
    pub async fn create_message(&self, request: SamplingRequest) -> Result<SamplingResponse, SamplingError> {
        match &self.sampler {
            Some(sampler) => sampler.create_message(&self.server_name, request).await,
            None => Err(SamplingError::Unsupported),
        }
    }

    pub async fn notify_list_changed(&self, kind: ListChanged) {
        if self.list_changed_tx.send(kind).await.is_err() {
            warn!(server_name = %self.server_name, ?kind, "server actor is gone, dropping notification");
        }
    }
}
