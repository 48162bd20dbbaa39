//! Connections to MCP servers and the aggregated tool, prompt, and resource namespaces.
//!
//! [McpManager] is an actor that owns one [actor::McpServerActor] per server. Callers talk to
//! it through a cloneable [McpManagerHandle].

mod actor;
pub mod connection;
pub mod mock;
pub mod namespace;
pub mod roots;
pub mod sampling;
pub mod service;
pub mod types;

use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::Arc;
use std::time::Duration;

use actor::{
    LaunchParams,
    McpServerActor,
    McpServerActorEvent,
    McpServerActorHandle,
};
pub use actor::{
    ExecuteToolResult,
    GetPromptResult,
    ReadResourceResult,
};
pub use connection::{
    ClientContext,
    ListChanged,
    McpConnection,
    McpLauncher,
    McpServerError,
};
use futures::stream::FuturesUnordered;
use rmcp::model::CallToolResult;
use serde_json::{
    Map,
    Value,
};
use tokio::sync::oneshot;
use tokio_stream::StreamExt as _;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    warn,
};
use types::{
    McpManagerSettings,
    McpPrompt,
    McpResource,
    McpServerConfig,
    McpTool,
    PromptOutput,
    ResourceContent,
    ServerCapabilities,
    ServerState,
    ServerStatus,
};

use roots::{
    Root,
    resolve_roots,
};
use sampling::SamplingHandler;
use service::RmcpLauncher;
use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};
use crate::agent::util::providers::SystemProvider;
use crate::agent::util::request_channel::{
    RequestReceiver,
    RequestSender,
    new_request_channel,
    respond,
};

/// Result of [McpManagerHandle::connect_server] outside of strict mode.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Connected(ServerCapabilities),
    /// The server could not be connected. It is excluded from aggregation.
    Failed(McpManagerError),
    /// The config is disabled.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct McpManagerHandle {
    /// Sender for sending requests to the manager task
    sender: RequestSender<McpManagerRequest, McpManagerResponse, McpManagerError>,
    strict: bool,
}

impl McpManagerHandle {
    fn new(sender: RequestSender<McpManagerRequest, McpManagerResponse, McpManagerError>, strict: bool) -> Self {
        Self { sender, strict }
    }

    /// Connects `name`, replacing any existing connection with that name.
    ///
    /// Failures are reported as [ConnectOutcome::Failed] unless the manager is strict, in which
    /// case they are returned as errors.
    pub async fn connect_server(
        &self,
        name: impl Into<String>,
        config: McpServerConfig,
    ) -> Result<ConnectOutcome, McpManagerError> {
        let rx = match self
            .sender
            .send_recv(McpManagerRequest::LaunchServer {
                server_name: name.into(),
                config,
            })
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::LaunchServer(rx) => rx,
            McpManagerResponse::Skipped => return Ok(ConnectOutcome::Skipped),
            other => {
                return Err(McpManagerError::Custom(format!(
                    "received unexpected response: {:?}",
                    other
                )));
            },
        };

        match rx.await.unwrap_or(Err(McpManagerError::Channel)) {
            Ok(capabilities) => Ok(ConnectOutcome::Connected(capabilities)),
            Err(err) if self.strict => Err(err),
            Err(err) => Ok(ConnectOutcome::Failed(err)),
        }
    }

    /// Closes the connection. Safe to call while the server is still connecting or after it
    /// failed.
    pub async fn disconnect_server(&self, name: impl Into<String>) -> Result<(), McpManagerError> {
        match self
            .sender
            .send_recv(McpManagerRequest::DisconnectServer {
                server_name: name.into(),
            })
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::Disconnected(rx) => {
                let _ = rx.await;
                Ok(())
            },
            other => Err(McpManagerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn disconnect_all(&self) -> Result<(), McpManagerError> {
        match self
            .sender
            .send_recv(McpManagerRequest::DisconnectAll)
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::Disconnected(rx) => {
                let _ = rx.await;
                Ok(())
            },
            other => Err(McpManagerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Tools of every connected server, each under a unique name.
    pub async fn get_all_tools(&self) -> Result<Vec<McpTool>, McpManagerError> {
        match self
            .sender
            .send_recv(McpManagerRequest::GetAllTools)
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::Tools(tools) => Ok(tools),
            other => Err(McpManagerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Calls a tool by the name [Self::get_all_tools] exposed, or by its `<server>--<tool>`
    /// form. The server's result is returned untouched.
    pub async fn execute_tool(
        &self,
        name: impl Into<String>,
        args: Option<Map<String, Value>>,
        cancel: CancellationToken,
    ) -> Result<CallToolResult, McpManagerError> {
        let rx = match self
            .sender
            .send_recv(McpManagerRequest::ExecuteTool {
                name: name.into(),
                args,
                cancel,
            })
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::ExecuteTool(rx) => rx,
            other => {
                return Err(McpManagerError::Custom(format!(
                    "received unexpected response: {:?}",
                    other
                )));
            },
        };
        Ok(rx.await.unwrap_or(Err(McpServerError::Channel))?)
    }

    pub async fn list_all_prompts(&self) -> Result<Vec<McpPrompt>, McpManagerError> {
        match self
            .sender
            .send_recv(McpManagerRequest::ListAllPrompts)
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::Prompts(prompts) => Ok(prompts),
            other => Err(McpManagerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        args: Option<Map<String, Value>>,
    ) -> Result<PromptOutput, McpManagerError> {
        let rx = match self
            .sender
            .send_recv(McpManagerRequest::GetPrompt { name: name.into(), args })
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::GetPrompt(rx) => rx,
            other => {
                return Err(McpManagerError::Custom(format!(
                    "received unexpected response: {:?}",
                    other
                )));
            },
        };
        Ok(rx.await.unwrap_or(Err(McpServerError::Channel))?)
    }

    pub async fn list_all_resources(&self) -> Result<Vec<McpResource>, McpManagerError> {
        match self
            .sender
            .send_recv(McpManagerRequest::ListAllResources)
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::Resources(resources) => Ok(resources),
            other => Err(McpManagerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }

    /// Reads a resource by the key [Self::list_all_resources] exposed.
    pub async fn read_resource(&self, uri: impl Into<String>) -> Result<Vec<ResourceContent>, McpManagerError> {
        let rx = match self
            .sender
            .send_recv(McpManagerRequest::ReadResource { uri: uri.into() })
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::ReadResource(rx) => rx,
            other => {
                return Err(McpManagerError::Custom(format!(
                    "received unexpected response: {:?}",
                    other
                )));
            },
        };
        Ok(rx.await.unwrap_or(Err(McpServerError::Channel))?)
    }

    /// State of every server ever registered, in registration order.
    pub async fn server_states(&self) -> Result<Vec<ServerStatus>, McpManagerError> {
        match self
            .sender
            .send_recv(McpManagerRequest::ServerStates)
            .await
            .unwrap_or(Err(McpManagerError::Channel))?
        {
            McpManagerResponse::ServerStates(states) => Ok(states),
            other => Err(McpManagerError::Custom(format!(
                "received unexpected response: {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub struct McpManager {
    request_tx: RequestSender<McpManagerRequest, McpManagerResponse, McpManagerError>,
    request_rx: RequestReceiver<McpManagerRequest, McpManagerResponse, McpManagerError>,

    launcher: Arc<dyn McpLauncher>,
    roots: Arc<Vec<Root>>,
    sampler: Option<Arc<dyn SamplingHandler>>,
    strict: bool,
    connect_timeout: Duration,

    /// Server names in the order they were first registered. Drives collision resolution.
    registration_order: Vec<String>,
    statuses: HashMap<String, ServerStatus>,
    initializing_servers: HashMap<String, (McpServerActorHandle, oneshot::Sender<LaunchServerResult>)>,
    servers: HashMap<String, McpServerActorHandle>,
}

impl McpManager {
    pub fn new(launcher: Arc<dyn McpLauncher>, settings: &McpManagerSettings, roots: Vec<Root>) -> Self {
        let (request_tx, request_rx) = new_request_channel();
        Self {
            request_tx,
            request_rx,
            launcher,
            roots: Arc::new(roots),
            sampler: None,
            strict: settings.strict,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            registration_order: Vec::new(),
            statuses: HashMap::new(),
            initializing_servers: HashMap::new(),
            servers: HashMap::new(),
        }
    }

    /// A manager that launches real servers, with roots resolved from `settings`.
    pub fn from_settings(settings: &McpManagerSettings, provider: Arc<dyn SystemProvider>) -> Self {
        let roots = resolve_roots(&settings.roots, &provider);
        Self::new(Arc::new(RmcpLauncher::new(provider)), settings, roots)
    }

    /// Lets servers request completions through `sampling/createMessage`.
    pub fn with_sampler(mut self, sampler: Arc<dyn SamplingHandler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn spawn(self) -> McpManagerHandle {
        let request_tx = self.request_tx.clone();
        let strict = self.strict;

        tokio::spawn(async move {
            self.main_loop().await;
        });

        McpManagerHandle::new(request_tx, strict)
    }

    async fn main_loop(mut self) {
        loop {
            let mut initializing_servers = FuturesUnordered::new();
            for (name, (handle, _)) in &mut self.initializing_servers {
                let name_clone = name.clone();
                initializing_servers.push(async { (name_clone, handle.recv().await) });
            }
            let mut initialized_servers = FuturesUnordered::new();
            for (name, handle) in &mut self.servers {
                let name_clone = name.clone();
                initialized_servers.push(async { (name_clone, handle.recv().await) });
            }

            tokio::select! {
                req = self.request_rx.recv() => {
                    std::mem::drop(initializing_servers);
                    std::mem::drop(initialized_servers);
                    let Some(req) = req else {
                        warn!("MCP manager request channel has closed, exiting");
                        break;
                    };
                    let res = self.handle_mcp_manager_request(req.payload).await;
                    respond!(req, res);
                },
                res = initializing_servers.next(), if !initializing_servers.is_empty() => {
                    std::mem::drop(initializing_servers);
                    std::mem::drop(initialized_servers);
                    if let Some((name, evt)) = res {
                        self.handle_initializing_mcp_actor_event(name, evt);
                    }
                },
                res = initialized_servers.next(), if !initialized_servers.is_empty() => {
                    std::mem::drop(initializing_servers);
                    std::mem::drop(initialized_servers);
                    if let Some((name, evt)) = res {
                        self.handle_mcp_actor_event(name, evt);
                    }
                },
            }
        }
        let _ = close_in_background(self.detach_all()).await;
    }

    async fn handle_mcp_manager_request(
        &mut self,
        req: McpManagerRequest,
    ) -> Result<McpManagerResponse, McpManagerError> {
        debug!(?req, "MCP manager received new request");
        match req {
            McpManagerRequest::LaunchServer {
                server_name: name,
                config,
            } => self.launch_server(name, config),
            McpManagerRequest::DisconnectServer { server_name } => {
                if !self.statuses.contains_key(&server_name) {
                    return Err(McpManagerError::ServerNotFound { name: server_name });
                }
                let handles = self.detach(&server_name).into_iter().collect();
                Ok(McpManagerResponse::Disconnected(close_in_background(handles)))
            },
            McpManagerRequest::DisconnectAll => Ok(McpManagerResponse::Disconnected(close_in_background(
                self.detach_all(),
            ))),
            McpManagerRequest::GetAllTools => Ok(McpManagerResponse::Tools(self.all_tools().await)),
            McpManagerRequest::ExecuteTool { name, args, cancel } => {
                let tool = self
                    .resolve_tool(&name)
                    .await
                    .ok_or(McpManagerError::ToolNotFound { name })?;
                let handle = self.server(&tool.server_name)?;
                debug!(tool = %tool.name, server_name = %tool.server_name, "executing tool");
                Ok(McpManagerResponse::ExecuteTool(
                    handle.execute_tool(tool.tool_name, args, cancel).await?,
                ))
            },
            McpManagerRequest::ListAllPrompts => Ok(McpManagerResponse::Prompts(self.all_prompts().await)),
            McpManagerRequest::GetPrompt { name, args } => {
                let prompt = self
                    .resolve_prompt(&name)
                    .await
                    .ok_or(McpManagerError::PromptNotFound { name })?;
                let missing = prompt.prompt.missing_arguments(args.as_ref());
                if !missing.is_empty() {
                    return Err(McpManagerError::MissingArguments {
                        prompt: prompt.name,
                        missing,
                    });
                }
                let handle = self.server(&prompt.server_name)?;
                Ok(McpManagerResponse::GetPrompt(
                    handle.get_prompt(prompt.prompt.name, args).await?,
                ))
            },
            McpManagerRequest::ListAllResources => Ok(McpManagerResponse::Resources(self.all_resources().await)),
            McpManagerRequest::ReadResource { uri } => {
                let resource = self
                    .all_resources()
                    .await
                    .into_iter()
                    .find(|r| r.uri == uri)
                    .ok_or(McpManagerError::ResourceNotFound { uri })?;
                let handle = self.server(&resource.server_name)?;
                Ok(McpManagerResponse::ReadResource(
                    handle.read_resource(resource.resource.uri).await?,
                ))
            },
            McpManagerRequest::ServerStates => Ok(McpManagerResponse::ServerStates(
                self.registration_order
                    .iter()
                    .filter_map(|name| self.statuses.get(name).cloned())
                    .collect(),
            )),
        }
    }

    fn launch_server(&mut self, name: String, config: McpServerConfig) -> Result<McpManagerResponse, McpManagerError> {
        if self.initializing_servers.contains_key(&name) {
            return Err(McpManagerError::ServerCurrentlyInitializing { name });
        }
        if !self.statuses.contains_key(&name) {
            self.registration_order.push(name.clone());
        }
        if let Some(old) = self.servers.remove(&name) {
            info!(target: "mcp", server_name = %name, "replacing existing connection");
            tokio::spawn(async move {
                if let Err(err) = old.close().await {
                    warn!(target: "mcp", server_name = old.server_name(), ?err, "failed to close replaced server");
                }
            });
        }
        if config.is_disabled() {
            info!(target: "mcp", server_name = %name, "server is disabled, skipping");
            self.set_state(&name, ServerState::Disconnected, None);
            return Ok(McpManagerResponse::Skipped);
        }

        let (tx, rx) = oneshot::channel();
        let handle = McpServerActor::spawn(name.clone(), config, LaunchParams {
            launcher: Arc::clone(&self.launcher),
            roots: Arc::clone(&self.roots),
            sampler: self.sampler.clone(),
            connect_timeout: self.connect_timeout,
        });
        self.set_state(&name, ServerState::Connecting, None);
        self.initializing_servers.insert(name, (handle, tx));
        Ok(McpManagerResponse::LaunchServer(rx))
    }

    /// Removes `name` from aggregation and returns its live connection for the caller to close.
    fn detach(&mut self, name: &str) -> Option<McpServerActorHandle> {
        if let Some((_, tx)) = self.initializing_servers.remove(name) {
            // Dropping the actor handle makes the actor close the connection once launched.
            let _ = tx.send(Err(McpManagerError::ConnectAborted { name: name.to_string() }));
        }
        let handle = self.servers.remove(name);
        if self.statuses.contains_key(name) {
            self.set_state(name, ServerState::Disconnected, None);
            info!(target: "mcp", server_name = name, "server disconnected");
        }
        handle
    }

    fn detach_all(&mut self) -> Vec<McpServerActorHandle> {
        self.registration_order
            .clone()
            .iter()
            .filter_map(|name| self.detach(name))
            .collect()
    }

    fn server(&self, name: &str) -> Result<&McpServerActorHandle, McpManagerError> {
        self.servers
            .get(name)
            .ok_or_else(|| McpManagerError::ServerNotFound { name: name.to_string() })
    }

    /// Connected servers in registration order.
    fn connected(&self) -> impl Iterator<Item = &McpServerActorHandle> {
        self.registration_order.iter().filter_map(|name| self.servers.get(name))
    }

    async fn all_tools(&self) -> Vec<McpTool> {
        let mut entries = Vec::new();
        for handle in self.connected() {
            match handle.get_tools().await {
                Ok(tools) => entries.extend(tools.into_iter().map(|t| (handle.server_name().to_string(), t))),
                Err(err) => error!(target: "mcp", server_name = handle.server_name(), ?err, "failed to get tools, excluding server"),
            }
        }
        let names = namespace::assign_names(
            entries.iter().map(|(server, t)| (server.as_str(), t.name.as_str())),
            &self.server_names(),
        );
        entries
            .into_iter()
            .zip(names)
            .map(|((server_name, tool), name)| McpTool {
                name,
                server_name,
                tool_name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            })
            .collect()
    }

    /// Every registered server name, connected or not.
    fn server_names(&self) -> Vec<&str> {
        self.registration_order.iter().map(String::as_str).collect()
    }

    /// Looks `name` up as `<server>--<tool>` first, then as an exposed name.
    async fn resolve_tool(&self, name: &str) -> Option<McpTool> {
        let tools = self.all_tools().await;
        if let Some((server_name, _)) = namespace::split_qualified(name, &self.server_names()) {
            if let Some(tool) = tools.iter().find(|t| {
                t.server_name == server_name && namespace::qualified_name(&t.server_name, &t.tool_name) == name
            }) {
                return Some(tool.clone());
            }
        }
        tools.into_iter().find(|t| t.name == name)
    }

    async fn all_prompts(&self) -> Vec<McpPrompt> {
        let mut entries = Vec::new();
        for handle in self.connected() {
            match handle.get_prompts().await {
                Ok(prompts) => entries.extend(prompts.into_iter().map(|p| (handle.server_name().to_string(), p))),
                Err(err) => error!(target: "mcp", server_name = handle.server_name(), ?err, "failed to get prompts, excluding server"),
            }
        }
        let names = namespace::assign_names(
            entries.iter().map(|(server, p)| (server.as_str(), p.name.as_str())),
            &self.server_names(),
        );
        entries
            .into_iter()
            .zip(names)
            .map(|((server_name, prompt), name)| McpPrompt {
                name,
                server_name,
                prompt,
            })
            .collect()
    }

    async fn resolve_prompt(&self, name: &str) -> Option<McpPrompt> {
        let prompts = self.all_prompts().await;
        if let Some((server_name, _)) = namespace::split_qualified(name, &self.server_names()) {
            if let Some(prompt) = prompts.iter().find(|p| {
                p.server_name == server_name && namespace::qualified_name(&p.server_name, &p.prompt.name) == name
            }) {
                return Some(prompt.clone());
            }
        }
        prompts.into_iter().find(|p| p.name == name)
    }

    async fn all_resources(&self) -> Vec<McpResource> {
        let mut seen = HashSet::new();
        let mut resources = Vec::new();
        for handle in self.connected() {
            let server_name = handle.server_name();
            match handle.get_resources().await {
                Ok(list) => {
                    for resource in list {
                        let uri = if seen.insert(resource.uri.clone()) {
                            resource.uri.clone()
                        } else {
                            format!("mcp://{server_name}/{}", resource.uri)
                        };
                        resources.push(McpResource {
                            uri,
                            server_name: server_name.to_string(),
                            resource,
                        });
                    }
                },
                Err(err) => error!(target: "mcp", server_name, ?err, "failed to get resources, excluding server"),
            }
        }
        resources
    }

    fn set_state(&mut self, name: &str, state: ServerState, capabilities: Option<ServerCapabilities>) {
        self.statuses.insert(name.to_string(), ServerStatus {
            name: name.to_string(),
            state,
            capabilities,
        });
    }

    fn handle_mcp_actor_event(&mut self, server_name: String, evt: Option<McpServerActorEvent>) {
        debug!(?server_name, ?evt, "Received event from an MCP actor");
        if evt.is_none() {
            // The actor exited on its own; drop it so aggregation skips it.
            error!(target: "mcp", ?server_name, "MCP server actor exited unexpectedly");
            self.servers.remove(&server_name);
            self.set_state(&server_name, ServerState::Error("server actor exited".to_string()), None);
        }
    }

    fn handle_initializing_mcp_actor_event(&mut self, server_name: String, evt: Option<McpServerActorEvent>) {
        debug!(?server_name, ?evt, "Received event from initializing MCP actor");

        let Some((handle, tx)) = self.initializing_servers.remove(&server_name) else {
            warn!(?server_name, ?evt, "event was not from an initializing MCP server");
            return;
        };

        // Event should always exist, otherwise indicates a bug with the initialization logic.
        let Some(evt) = evt else {
            let err = McpManagerError::Custom("Server channel closed".to_string());
            self.set_state(&server_name, ServerState::Error(err.to_string()), None);
            let _ = tx.send(Err(err));
            return;
        };

        // First event from an initializing server should only be either of these Initialize variants.
        match evt {
            McpServerActorEvent::Initialized { capabilities, .. } => {
                info!(target: "mcp", ?server_name, ?capabilities, "server connected");
                self.set_state(&server_name, ServerState::Connected, Some(capabilities));
                self.servers.insert(server_name, handle);
                let _ = tx.send(Ok(capabilities));
            },
            McpServerActorEvent::InitializeError(source) => {
                warn!(target: "mcp", ?server_name, ?source, "server failed to connect");
                let err = McpManagerError::Connect {
                    name: server_name.clone(),
                    source,
                };
                self.set_state(&server_name, ServerState::Error(err.to_string()), None);
                let _ = tx.send(Err(err));
            },
        }
    }
}

/// Closes `handles` off the manager loop. The receiver resolves once every close finished.
fn close_in_background(handles: Vec<McpServerActorHandle>) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        futures::future::join_all(handles.iter().map(|handle| async move {
            if let Err(err) = handle.close().await {
                warn!(target: "mcp", server_name = handle.server_name(), ?err, "failed to close server");
            }
        }))
        .await;
        let _ = tx.send(());
    });
    rx
}

#[derive(Debug, Clone)]
pub enum McpManagerRequest {
    LaunchServer {
        /// Identifier for the server
        server_name: String,
        /// Config to use
        config: McpServerConfig,
    },
    DisconnectServer {
        server_name: String,
    },
    DisconnectAll,
    GetAllTools,
    ExecuteTool {
        name: String,
        args: Option<Map<String, Value>>,
        cancel: CancellationToken,
    },
    ListAllPrompts,
    GetPrompt {
        name: String,
        args: Option<Map<String, Value>>,
    },
    ListAllResources,
    ReadResource {
        uri: String,
    },
    ServerStates,
}

#[derive(Debug)]
pub enum McpManagerResponse {
    LaunchServer(oneshot::Receiver<LaunchServerResult>),
    Skipped,
    /// Resolves once the connections are closed.
    Disconnected(oneshot::Receiver<()>),
    Tools(Vec<McpTool>),
    ExecuteTool(oneshot::Receiver<ExecuteToolResult>),
    Prompts(Vec<McpPrompt>),
    GetPrompt(oneshot::Receiver<GetPromptResult>),
    Resources(Vec<McpResource>),
    ReadResource(oneshot::Receiver<ReadResourceResult>),
    ServerStates(Vec<ServerStatus>),
}

type LaunchServerResult = Result<ServerCapabilities, McpManagerError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum McpManagerError {
    #[error("No server with the name {}", .name)]
    ServerNotFound { name: String },
    #[error("Server with the name {} is currently initializing", .name)]
    ServerCurrentlyInitializing { name: String },
    #[error("Failed to connect to server {}: {}", .name, .source)]
    Connect {
        name: String,
        #[source]
        source: McpServerError,
    },
    #[error("Server {} was disconnected while connecting", .name)]
    ConnectAborted { name: String },
    #[error("No tool with the name {}", .name)]
    ToolNotFound { name: String },
    #[error("No prompt with the name {}", .name)]
    PromptNotFound { name: String },
    #[error("No resource with the uri {}", .uri)]
    ResourceNotFound { uri: String },
    #[error("Prompt {} is missing required arguments: {}", .prompt, .missing.join(", "))]
    MissingArguments { prompt: String, missing: Vec<String> },
    #[error(transparent)]
    McpServer(#[from] McpServerError),
    #[error("The channel has closed")]
    Channel,
    #[error("{}", .0)]
    Custom(String),
}

impl ClassifiedError for McpManagerError {
    fn kind(&self) -> ErrorKind {
        match self {
            McpManagerError::ServerNotFound { .. }
            | McpManagerError::ToolNotFound { .. }
            | McpManagerError::PromptNotFound { .. }
            | McpManagerError::ResourceNotFound { .. } => ErrorKind::NotFound,
            McpManagerError::MissingArguments { .. } | McpManagerError::ServerCurrentlyInitializing { .. } => {
                ErrorKind::User
            },
            McpManagerError::ConnectAborted { .. } => ErrorKind::Cancelled,
            McpManagerError::Connect { source, .. } => source.kind(),
            McpManagerError::McpServer(err) => err.kind(),
            McpManagerError::Channel | McpManagerError::Custom(_) => ErrorKind::System,
        }
    }
}
