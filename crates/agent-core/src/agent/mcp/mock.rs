//! In-process MCP servers for tests.

use std::collections::HashMap;
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{
    CallToolResult,
    Content,
};
use serde_json::{
    Map,
    Value,
};
use tracing::debug;

use super::connection::{
    ClientContext,
    McpConnection,
    McpLauncher,
    McpServerError,
};
use super::types::{
    McpServerConfig,
    Prompt,
    PromptOutput,
    Resource,
    ResourceContent,
    ServerCapabilities,
};
use crate::agent::llm::types::ToolDefinition;

#[derive(Debug, Clone)]
struct MockTool {
    definition: ToolDefinition,
    result: Option<CallToolResult>,
}

#[derive(Debug, Default)]
struct Inner {
    tools: Vec<MockTool>,
    prompts: Vec<(Prompt, PromptOutput)>,
    resources: Vec<(Resource, Vec<ResourceContent>)>,
    connect_delay: Option<Duration>,
    connect_error: Option<String>,
    call_delay: Option<Duration>,
    close_delay: Option<Duration>,
    calls: Vec<(String, Option<Map<String, Value>>)>,
    closed: bool,
}

/// A scripted server. Clones share state, so a test can keep one clone to inspect calls or
/// change the tool list after the server has been handed to a [MockMcpLauncher].
///
/// Tools without a configured result echo their arguments back as text.
#[derive(Debug, Clone, Default)]
pub struct MockMcpServer {
    inner: Arc<Mutex<Inner>>,
}

impl MockMcpServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.add_tool(name, description);
        self
    }

    pub fn with_tool_result(self, name: impl Into<String>, result: CallToolResult) -> Self {
        let name = name.into();
        {
            let mut inner = self.lock();
            match inner.tools.iter_mut().find(|t| t.definition.name == name) {
                Some(tool) => tool.result = Some(result),
                None => inner.tools.push(MockTool {
                    definition: definition(name, String::new()),
                    result: Some(result),
                }),
            }
        }
        self
    }

    pub fn with_prompt(self, prompt: Prompt, output: PromptOutput) -> Self {
        self.lock().prompts.push((prompt, output));
        self
    }

    pub fn with_resource(self, resource: Resource, contents: Vec<ResourceContent>) -> Self {
        self.lock().resources.push((resource, contents));
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.lock().connect_delay = Some(delay);
        self
    }

    /// Makes every launch attempt fail with `message`.
    pub fn failing(self, message: impl Into<String>) -> Self {
        self.lock().connect_error = Some(message.into());
        self
    }

    pub fn with_call_delay(self, delay: Duration) -> Self {
        self.lock().call_delay = Some(delay);
        self
    }

    pub fn with_close_delay(self, delay: Duration) -> Self {
        self.lock().close_delay = Some(delay);
        self
    }

    pub fn add_tool(&self, name: impl Into<String>, description: impl Into<String>) {
        self.lock().tools.push(MockTool {
            definition: definition(name.into(), description.into()),
            result: None,
        });
    }

    /// Tool calls received so far, as `(tool_name, args)`.
    pub fn calls(&self) -> Vec<(String, Option<Map<String, Value>>)> {
        self.lock().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn definition(name: String, description: String) -> ToolDefinition {
    let mut input_schema = Map::new();
    input_schema.insert("type".to_string(), Value::String("object".to_string()));
    ToolDefinition {
        name,
        description,
        input_schema,
    }
}

#[async_trait]
impl McpConnection for MockMcpServer {
    fn capabilities(&self) -> ServerCapabilities {
        let inner = self.lock();
        ServerCapabilities {
            tools: !inner.tools.is_empty(),
            prompts: !inner.prompts.is_empty(),
            resources: !inner.resources.is_empty(),
        }
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpServerError> {
        Ok(self.lock().tools.iter().map(|t| t.definition.clone()).collect())
    }

    async fn call_tool(&self, name: &str, args: Option<Map<String, Value>>) -> Result<CallToolResult, McpServerError> {
        let (delay, tool) = {
            let mut inner = self.lock();
            inner.calls.push((name.to_string(), args.clone()));
            let tool = inner.tools.iter().find(|t| t.definition.name == name).cloned();
            (inner.call_delay, tool)
        };
        if let Some(delay) = delay {
            debug!(?delay, name, "delaying mock tool call");
            tokio::time::sleep(delay).await;
        }

        match tool {
            Some(MockTool {
                result: Some(result), ..
            }) => Ok(result),
            Some(_) => {
                let echo = Value::Object(args.unwrap_or_default()).to_string();
                Ok(CallToolResult::success(vec![Content::text(echo)]))
            },
            None => Err(McpServerError::Custom(format!("unknown tool: {name}"))),
        }
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, McpServerError> {
        Ok(self.lock().prompts.iter().map(|(p, _)| p.clone()).collect())
    }

    async fn get_prompt(&self, name: &str, _args: Option<Map<String, Value>>) -> Result<PromptOutput, McpServerError> {
        self.lock()
            .prompts
            .iter()
            .find(|(p, _)| p.name == name)
            .map(|(_, output)| output.clone())
            .ok_or_else(|| McpServerError::Custom(format!("unknown prompt: {name}")))
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpServerError> {
        Ok(self.lock().resources.iter().map(|(r, _)| r.clone()).collect())
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>, McpServerError> {
        self.lock()
            .resources
            .iter()
            .find(|(r, _)| r.uri == uri)
            .map(|(_, contents)| contents.clone())
            .ok_or_else(|| McpServerError::Custom(format!("unknown resource: {uri}")))
    }

    async fn close(&self) {
        let delay = self.lock().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.lock().closed = true;
    }
}

#[derive(Debug, Default)]
struct LauncherInner {
    servers: HashMap<String, MockMcpServer>,
    clients: HashMap<String, ClientContext>,
    launches: usize,
}

/// Launches [MockMcpServer]s by server name, ignoring the config.
#[derive(Debug, Clone, Default)]
pub struct MockMcpLauncher {
    inner: Arc<Mutex<LauncherInner>>,
}

impl MockMcpLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, name: impl Into<String>, server: MockMcpServer) -> Self {
        self.lock().servers.insert(name.into(), server);
        self
    }

    /// The client side handed to the most recent launch of `server_name`. Lets tests act as
    /// the server: request roots, ask for sampling, or send list changed notifications.
    pub fn client(&self, server_name: &str) -> Option<ClientContext> {
        self.lock().clients.get(server_name).cloned()
    }

    pub fn launch_count(&self) -> usize {
        self.lock().launches
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LauncherInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl McpLauncher for MockMcpLauncher {
    async fn launch(
        &self,
        server_name: &str,
        _config: &McpServerConfig,
        client: ClientContext,
    ) -> Result<Arc<dyn McpConnection>, McpServerError> {
        let server = {
            let mut inner = self.lock();
            inner.launches += 1;
            inner.clients.insert(server_name.to_string(), client);
            inner.servers.get(server_name).cloned()
        };
        let Some(server) = server else {
            return Err(McpServerError::Launch(format!("no mock server named {server_name}")));
        };

        let (delay, error) = {
            let mut inner = server.lock();
            inner.closed = false;
            (inner.connect_delay, inner.connect_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(message) => Err(McpServerError::Launch(message)),
            None => Ok(Arc::new(server)),
        }
    }
}
