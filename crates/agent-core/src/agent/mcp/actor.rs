use std::sync::Arc;
use std::time::{
    Duration,
    Instant,
};

use rmcp::model::CallToolResult;
use serde_json::{
    Map,
    Value,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    warn,
};

use super::connection::{
    ClientContext,
    ListChanged,
    McpConnection,
    McpLauncher,
    McpServerError,
};
use super::roots::Root;
use super::sampling::SamplingHandler;
use super::types::{
    McpServerConfig,
    Prompt,
    PromptOutput,
    Resource,
    ResourceContent,
    ServerCapabilities,
};
use crate::agent::llm::types::ToolDefinition;
use crate::agent::util::request_channel::{
    RequestReceiver,
    RequestSender,
    new_request_channel,
    respond,
};

pub type ExecuteToolResult = Result<CallToolResult, McpServerError>;
pub type GetPromptResult = Result<PromptOutput, McpServerError>;
pub type ReadResourceResult = Result<Vec<ResourceContent>, McpServerError>;

/// Represents a message from an MCP server to the client.
#[derive(Debug)]
pub enum McpMessage {
    Tools(Result<Vec<ToolDefinition>, McpServerError>),
    Prompts(Result<Vec<Prompt>, McpServerError>),
    Resources(Result<Vec<Resource>, McpServerError>),
}

/// Everything an actor needs to launch its server.
#[derive(Debug, Clone)]
pub struct LaunchParams {
    pub launcher: Arc<dyn McpLauncher>,
    pub roots: Arc<Vec<Root>>,
    pub sampler: Option<Arc<dyn SamplingHandler>>,
    pub connect_timeout: Duration,
}

#[derive(Debug)]
pub struct McpServerActorHandle {
    server_name: String,
    sender: RequestSender<McpServerActorRequest, McpServerActorResponse, McpServerError>,
    event_rx: mpsc::Receiver<McpServerActorEvent>,
}

impl McpServerActorHandle {
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub async fn recv(&mut self) -> Option<McpServerActorEvent> {
        self.event_rx.recv().await
    }

    pub async fn get_tools(&self) -> Result<Vec<ToolDefinition>, McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::GetTools)
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::Tools(tools) => Ok(tools),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn get_prompts(&self) -> Result<Vec<Prompt>, McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::GetPrompts)
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::Prompts(prompts) => Ok(prompts),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn get_resources(&self) -> Result<Vec<Resource>, McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::GetResources)
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::Resources(resources) => Ok(resources),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn execute_tool(
        &self,
        name: String,
        args: Option<Map<String, Value>>,
        cancel: CancellationToken,
    ) -> Result<oneshot::Receiver<ExecuteToolResult>, McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::ExecuteTool { name, args, cancel })
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::ExecuteTool(rx) => Ok(rx),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn get_prompt(
        &self,
        name: String,
        args: Option<Map<String, Value>>,
    ) -> Result<oneshot::Receiver<GetPromptResult>, McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::GetPrompt { name, args })
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::GetPrompt(rx) => Ok(rx),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn read_resource(&self, uri: String) -> Result<oneshot::Receiver<ReadResourceResult>, McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::ReadResource { uri })
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::ReadResource(rx) => Ok(rx),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Closes the connection and waits for the actor to exit. In-flight calls resolve with
    /// [McpServerError::Cancelled].
    pub async fn close(&self) -> Result<(), McpServerError> {
        match self
            .sender
            .send_recv(McpServerActorRequest::Close)
            .await
            .unwrap_or(Err(McpServerError::Channel))?
        {
            McpServerActorResponse::Closed => Ok(()),
            other => Err(McpServerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub enum McpServerActorRequest {
    GetTools,
    GetPrompts,
    GetResources,
    ExecuteTool {
        name: String,
        args: Option<Map<String, Value>>,
        cancel: CancellationToken,
    },
    GetPrompt {
        name: String,
        args: Option<Map<String, Value>>,
    },
    ReadResource {
        uri: String,
    },
    Close,
}

#[derive(Debug)]
pub enum McpServerActorResponse {
    Tools(Vec<ToolDefinition>),
    Prompts(Vec<Prompt>),
    Resources(Vec<Resource>),
    ExecuteTool(oneshot::Receiver<ExecuteToolResult>),
    GetPrompt(oneshot::Receiver<GetPromptResult>),
    ReadResource(oneshot::Receiver<ReadResourceResult>),
    Closed,
}

#[derive(Debug, Clone)]
pub enum McpServerActorEvent {
    /// The MCP server has launched successfully
    Initialized {
        capabilities: ServerCapabilities,
        /// Time taken to launch the server
        serve_duration: Duration,
        /// Time taken to list tools, prompts, and resources.
        list_duration: Duration,
    },
    /// The MCP server failed to initialize successfully
    InitializeError(McpServerError),
}

#[derive(Debug, Default)]
struct Listing {
    tools: Vec<ToolDefinition>,
    prompts: Vec<Prompt>,
    resources: Vec<Resource>,
}

impl Listing {
    /// Lists whatever the server advertises. A failed listing is logged and left empty.
    async fn fetch(server_name: &str, connection: &dyn McpConnection) -> Self {
        let capabilities = connection.capabilities();
        let mut listing = Self::default();
        if capabilities.tools {
            match connection.list_tools().await {
                Ok(tools) => listing.tools = tools,
                Err(err) => error!(?err, server_name, "failed to list tools during server initialization"),
            }
        }
        if capabilities.prompts {
            match connection.list_prompts().await {
                Ok(prompts) => listing.prompts = prompts,
                Err(err) => error!(?err, server_name, "failed to list prompts during server initialization"),
            }
        }
        if capabilities.resources {
            match connection.list_resources().await {
                Ok(resources) => listing.resources = resources,
                Err(err) => error!(?err, server_name, "failed to list resources during server initialization"),
            }
        }
        listing
    }
}

#[derive(Debug)]
pub struct McpServerActor {
    /// Name of the MCP server
    server_name: String,
    /// Bounds every request sent to the server.
    call_timeout: Duration,
    tools: Vec<ToolDefinition>,
    prompts: Vec<Prompt>,
    resources: Vec<Resource>,
    /// Handle to an MCP server
    connection: Arc<dyn McpConnection>,
    /// Cancelled when the actor exits, aborting in-flight calls.
    shutdown: CancellationToken,

    /// Receiver for actor requests
    req_rx: RequestReceiver<McpServerActorRequest, McpServerActorResponse, McpServerError>,
    /// Sender for actor events
    event_tx: mpsc::Sender<McpServerActorEvent>,
    message_tx: mpsc::Sender<McpMessage>,
    message_rx: mpsc::Receiver<McpMessage>,
    list_changed_rx: mpsc::Receiver<ListChanged>,
}

impl McpServerActor {
    /// Spawns an actor to manage the MCP server, returning a [McpServerActorHandle].
    pub fn spawn(server_name: String, config: McpServerConfig, params: LaunchParams) -> McpServerActorHandle {
        let (event_tx, event_rx) = mpsc::channel(32);
        let (req_tx, req_rx) = new_request_channel();

        let server_name_clone = server_name.clone();
        tokio::spawn(async move { Self::launch(server_name_clone, config, params, req_rx, event_tx).await });

        McpServerActorHandle {
            server_name,
            sender: req_tx,
            event_rx,
        }
    }

    async fn launch(
        server_name: String,
        config: McpServerConfig,
        params: LaunchParams,
        req_rx: RequestReceiver<McpServerActorRequest, McpServerActorResponse, McpServerError>,
        event_tx: mpsc::Sender<McpServerActorEvent>,
    ) {
        let (list_changed_tx, list_changed_rx) = mpsc::channel(8);
        let client = ClientContext::new(server_name.clone(), params.roots, params.sampler, list_changed_tx);
        let deadline = tokio::time::Instant::now() + params.connect_timeout;

        let start_time = Instant::now();
        let connection =
            match tokio::time::timeout_at(deadline, params.launcher.launch(&server_name, &config, client)).await {
                Ok(Ok(connection)) => connection,
                Ok(Err(err)) => {
                    warn!(target: "mcp", ?server_name, ?err, "failed to launch MCP server");
                    let _ = event_tx.send(McpServerActorEvent::InitializeError(err)).await;
                    return;
                },
                Err(_) => {
                    warn!(target: "mcp", ?server_name, timeout = ?params.connect_timeout, "timed out launching MCP server");
                    let _ = event_tx
                        .send(McpServerActorEvent::InitializeError(McpServerError::Timeout(
                            params.connect_timeout,
                        )))
                        .await;
                    return;
                },
            };
        let serve_duration = start_time.elapsed();

        let start_time = Instant::now();
        let listing = match tokio::time::timeout_at(deadline, Listing::fetch(&server_name, connection.as_ref())).await {
            Ok(listing) => listing,
            Err(_) => {
                warn!(target: "mcp", ?server_name, timeout = ?params.connect_timeout, "timed out listing MCP server capabilities");
                connection.close().await;
                let _ = event_tx
                    .send(McpServerActorEvent::InitializeError(McpServerError::Timeout(
                        params.connect_timeout,
                    )))
                    .await;
                return;
            },
        };
        let list_duration = start_time.elapsed();
        info!(target: "mcp", ?server_name, ?serve_duration, ?list_duration, "MCP server initialized");

        let (message_tx, message_rx) = mpsc::channel(32);
        let s = Self {
            server_name,
            call_timeout: Duration::from_millis(config.timeout_ms()),
            tools: listing.tools,
            prompts: listing.prompts,
            resources: listing.resources,
            connection,
            shutdown: CancellationToken::new(),
            req_rx,
            event_tx,
            message_tx,
            message_rx,
            list_changed_rx,
        };
        let _ = s
            .event_tx
            .send(McpServerActorEvent::Initialized {
                capabilities: s.connection.capabilities(),
                serve_duration,
                list_duration,
            })
            .await;
        s.main_loop().await;
    }

    async fn main_loop(mut self) {
        loop {
            tokio::select! {
                req = self.req_rx.recv() => {
                    let Some(req) = req else {
                        warn!(server_name = &self.server_name, "mcp request receiver channel has closed, exiting");
                        break;
                    };
                    let is_close = matches!(req.payload, McpServerActorRequest::Close);
                    let res = self.handle_actor_request(req.payload).await;
                    respond!(req, res);
                    if is_close {
                        return;
                    }
                },
                Some(msg) = self.message_rx.recv() => {
                    self.handle_mcp_message(msg);
                },
                Some(kind) = self.list_changed_rx.recv() => {
                    self.refresh(kind);
                },
            }
        }
        self.close_connection().await;
    }

    async fn close_connection(&self) {
        self.shutdown.cancel();
        self.connection.close().await;
        info!(target: "mcp", server_name = &self.server_name, "MCP server closed");
    }

    async fn handle_actor_request(
        &mut self,
        req: McpServerActorRequest,
    ) -> Result<McpServerActorResponse, McpServerError> {
        debug!(?self.server_name, ?req, "MCP actor received new request");
        match req {
            McpServerActorRequest::GetTools => Ok(McpServerActorResponse::Tools(self.tools.clone())),
            McpServerActorRequest::GetPrompts => Ok(McpServerActorResponse::Prompts(self.prompts.clone())),
            McpServerActorRequest::GetResources => Ok(McpServerActorResponse::Resources(self.resources.clone())),
            McpServerActorRequest::ExecuteTool { name, args, cancel } => {
                let connection = Arc::clone(&self.connection);
                Ok(McpServerActorResponse::ExecuteTool(self.spawn_call(cancel, async move {
                    connection.call_tool(&name, args).await
                })))
            },
            McpServerActorRequest::GetPrompt { name, args } => {
                let connection = Arc::clone(&self.connection);
                Ok(McpServerActorResponse::GetPrompt(self.spawn_call(
                    CancellationToken::new(),
                    async move { connection.get_prompt(&name, args).await },
                )))
            },
            McpServerActorRequest::ReadResource { uri } => {
                let connection = Arc::clone(&self.connection);
                Ok(McpServerActorResponse::ReadResource(self.spawn_call(
                    CancellationToken::new(),
                    async move { connection.read_resource(&uri).await },
                )))
            },
            McpServerActorRequest::Close => {
                self.close_connection().await;
                Ok(McpServerActorResponse::Closed)
            },
        }
    }

    /// Runs a server call off the actor loop, bounded by the per-request timeout, the caller's
    /// token, and the actor's lifetime.
    fn spawn_call<T, F>(&self, cancel: CancellationToken, fut: F) -> oneshot::Receiver<Result<T, McpServerError>>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, McpServerError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let shutdown = self.shutdown.clone();
        let timeout = self.call_timeout;
        let server_name = self.server_name.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = shutdown.cancelled() => Err(McpServerError::Cancelled),
                _ = cancel.cancelled() => {
                    debug!(?server_name, "MCP request cancelled by caller");
                    Err(McpServerError::Cancelled)
                },
                res = tokio::time::timeout(timeout, fut) => res.unwrap_or_else(|_| {
                    warn!(?server_name, ?timeout, "MCP request timed out");
                    Err(McpServerError::Timeout(timeout))
                }),
            };
            let _ = tx.send(result);
        });
        rx
    }

    fn handle_mcp_message(&mut self, msg: McpMessage) {
        debug!(?self.server_name, ?msg, "MCP actor received new message");
        match msg {
            McpMessage::Tools(res) => match res {
                Ok(tools) => self.tools = tools,
                Err(err) => {
                    error!(?err, server_name = &self.server_name, "failed to list tools");
                },
            },
            McpMessage::Prompts(res) => match res {
                Ok(prompts) => self.prompts = prompts,
                Err(err) => {
                    error!(?err, server_name = &self.server_name, "failed to list prompts");
                },
            },
            McpMessage::Resources(res) => match res {
                Ok(resources) => self.resources = resources,
                Err(err) => {
                    error!(?err, server_name = &self.server_name, "failed to list resources");
                },
            },
        }
    }

    /// Asynchronously re-lists whatever the server reported as changed.
    fn refresh(&self, kind: ListChanged) {
        debug!(?self.server_name, ?kind, "refreshing after list changed notification");
        let connection = Arc::clone(&self.connection);
        let tx = self.message_tx.clone();
        tokio::spawn(async move {
            let msg = match kind {
                ListChanged::Tools => McpMessage::Tools(connection.list_tools().await),
                ListChanged::Prompts => McpMessage::Prompts(connection.list_prompts().await),
                ListChanged::Resources => McpMessage::Resources(connection.list_resources().await),
            };
            let _ = tx.send(msg).await;
        });
    }
}
