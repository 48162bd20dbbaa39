use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{
    HeaderMap,
    HeaderName,
    HeaderValue,
};
use rmcp::model::{
    CallToolRequestParam,
    CallToolResult,
    ClientCapabilities,
    ClientInfo,
    ClientResult,
    GetPromptRequestParam,
    Implementation,
    LoggingLevel,
    ReadResourceRequestParam,
    ServerNotification,
    ServerRequest,
};
use rmcp::service::{
    Peer,
    RunningService,
};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{
    ConfigureCommandExt as _,
    StreamableHttpClientTransport,
    TokioChildProcess,
};
use rmcp::{
    RoleClient,
    ServiceExt as _,
};
use serde::de::DeserializeOwned;
use serde_json::{
    Map,
    Value,
    json,
};
use tokio::io::AsyncReadExt as _;
use tokio::process::{
    ChildStderr,
    Command,
};
use tokio::sync::Mutex;
use tracing::{
    debug,
    error,
    info,
    trace,
    warn,
};

use super::connection::{
    ClientContext,
    ListChanged,
    McpConnection,
    McpLauncher,
    McpServerError,
};
use super::sampling::{
    create_message_result,
    parse_create_message_params,
};
use super::types::{
    LocalMcpServerConfig,
    McpServerConfig,
    Prompt,
    PromptOutput,
    Resource,
    ResourceContent,
    ServerCapabilities,
    StreamableHttpMcpServerConfig,
};
use crate::agent::llm::types::ToolDefinition;
use crate::agent::util::path::{
    expand_env_vars,
    expand_path,
};
use crate::agent::util::providers::SystemProvider;

const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// This struct is consumed by the [rmcp] crate on server launch. The only purpose of this struct
/// is to handle server-to-client requests. The manager talks to the server through a
/// [RunningMcpService].
#[derive(Debug)]
pub struct McpService {
    client: ClientContext,
}

impl McpService {
    pub fn new(client: ClientContext) -> Self {
        Self { client }
    }

    fn server_name(&self) -> &str {
        self.client.server_name()
    }
}

impl rmcp::Service<RoleClient> for McpService {
    async fn handle_request(
        &self,
        request: <rmcp::RoleClient as rmcp::service::ServiceRole>::PeerReq,
        _context: rmcp::service::RequestContext<RoleClient>,
    ) -> Result<<RoleClient as rmcp::service::ServiceRole>::Resp, rmcp::ErrorData> {
        match request {
            ServerRequest::PingRequest(_) => Ok(ClientResult::empty(())),
            ServerRequest::CreateMessageRequest(req) => {
                let params = serde_json::to_value(&req.params)
                    .map_err(|err| rmcp::ErrorData::invalid_request(err.to_string(), None))?;
                let request = parse_create_message_params(&params)
                    .map_err(|err| rmcp::ErrorData::invalid_request(err.to_string(), None))?;
                match self.client.create_message(request).await {
                    Ok(response) => Ok(ClientResult::CreateMessageResult(wire(create_message_result(&response))?)),
                    Err(err) => {
                        warn!(server_name = self.server_name(), ?err, "sampling request failed");
                        Err(rmcp::ErrorData::invalid_request(err.to_string(), None))
                    },
                }
            },
            ServerRequest::ListRootsRequest(_) => {
                let roots = self.client.list_roots();
                Ok(ClientResult::ListRootsResult(wire(json!({ "roots": roots }))?))
            },
            ServerRequest::CreateElicitationRequest(_) => Err(rmcp::ErrorData::method_not_found::<
                rmcp::model::ElicitationCreateRequestMethod,
            >()),
        }
    }

    async fn handle_notification(
        &self,
        notification: <RoleClient as rmcp::service::ServiceRole>::PeerNot,
        _context: rmcp::service::NotificationContext<RoleClient>,
    ) -> Result<(), rmcp::ErrorData> {
        match notification {
            ServerNotification::ToolListChangedNotification(_) => {
                self.client.notify_list_changed(ListChanged::Tools).await;
            },
            ServerNotification::PromptListChangedNotification(_) => {
                self.client.notify_list_changed(ListChanged::Prompts).await;
            },
            ServerNotification::ResourceListChangedNotification(_) => {
                self.client.notify_list_changed(ListChanged::Resources).await;
            },
            ServerNotification::LoggingMessageNotification(notif) => {
                let level = notif.params.level;
                let data = notif.params.data;
                let server_name = self.server_name();
                match level {
                    LoggingLevel::Error | LoggingLevel::Critical | LoggingLevel::Emergency | LoggingLevel::Alert => {
                        error!(target: "mcp", "{}: {}", server_name, data);
                    },
                    LoggingLevel::Warning => {
                        warn!(target: "mcp", "{}: {}", server_name, data);
                    },
                    LoggingLevel::Info => {
                        info!(target: "mcp", "{}: {}", server_name, data);
                    },
                    LoggingLevel::Debug => {
                        debug!(target: "mcp", "{}: {}", server_name, data);
                    },
                    LoggingLevel::Notice => {
                        trace!(target: "mcp", "{}: {}", server_name, data);
                    },
                }
            },
            ServerNotification::CancelledNotification(_)
            | ServerNotification::ResourceUpdatedNotification(_)
            | ServerNotification::ProgressNotification(_) => (),
        }
        Ok(())
    }

    fn get_info(&self) -> <RoleClient as rmcp::service::ServiceRole>::Info {
        let capabilities = if self.client.supports_sampling() {
            ClientCapabilities::builder().enable_roots().enable_sampling().build()
        } else {
            ClientCapabilities::builder().enable_roots().build()
        };
        ClientInfo {
            protocol_version: Default::default(),
            capabilities,
            client_info: Implementation {
                name: CLIENT_NAME.to_string(),
                version: CLIENT_VERSION.to_string(),
                ..Default::default()
            },
        }
    }
}

fn wire<T: DeserializeOwned>(value: Value) -> Result<T, rmcp::ErrorData> {
    serde_json::from_value(value).map_err(|err| rmcp::ErrorData::internal_error(err.to_string(), None))
}

fn convert<T: serde::Serialize, U: DeserializeOwned>(value: &T) -> Result<U, McpServerError> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|err| McpServerError::Custom(format!("unexpected response shape: {err}")))
}

/// Launches servers over stdio or streamable HTTP using [rmcp].
#[derive(Debug, Clone)]
pub struct RmcpLauncher {
    provider: Arc<dyn SystemProvider>,
}

impl RmcpLauncher {
    pub fn new(provider: Arc<dyn SystemProvider>) -> Self {
        Self { provider }
    }

    fn command(&self, config: &LocalMcpServerConfig) -> Result<Command, McpServerError> {
        let cmd = expand_path(&config.command, &self.provider).map_err(|err| McpServerError::Launch(err.to_string()))?;
        let mut env_vars = config.env.clone();
        Ok(Command::new(cmd.as_ref() as &str).configure(|cmd| {
            if let Some(envs) = &mut env_vars {
                expand_env_vars(envs, &self.provider);
                cmd.envs(envs.iter());
            }
            cmd.args(&config.args);

            // Launch the MCP process in its own process group so that sigints won't kill
            // the server process.
            #[cfg(not(windows))]
            cmd.process_group(0);
        }))
    }

    fn http_client(config: &StreamableHttpMcpServerConfig) -> Result<reqwest::Client, McpServerError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| McpServerError::Launch(format!("invalid header name '{name}': {err}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| McpServerError::Launch(format!("invalid value for header '{name}': {err}")))?;
            headers.insert(name, value);
        }
        reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|err| McpServerError::Launch(err.to_string()))
    }
}

#[async_trait]
impl McpLauncher for RmcpLauncher {
    async fn launch(
        &self,
        server_name: &str,
        config: &McpServerConfig,
        client: ClientContext,
    ) -> Result<Arc<dyn McpConnection>, McpServerError> {
        let start_time = Instant::now();
        info!(?server_name, "Launching MCP server");
        let service = McpService::new(client);
        let (running, stderr) = match config {
            McpServerConfig::Local(config) => {
                let cmd = self.command(config)?;
                let (process, stderr) = TokioChildProcess::builder(cmd)
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|err| McpServerError::Launch(err.to_string()))?;
                let running = service
                    .serve(process)
                    .await
                    .map_err(|err| McpServerError::Launch(err.to_string()))?;
                (running, stderr)
            },
            McpServerConfig::StreamableHttp(config) => {
                let transport = StreamableHttpClientTransport::with_client(
                    Self::http_client(config)?,
                    StreamableHttpClientTransportConfig::with_uri(config.url.clone()),
                );
                let running = service
                    .serve(transport)
                    .await
                    .map_err(|err| McpServerError::Launch(err.to_string()))?;
                (running, None)
            },
        };
        let serve_time_taken = start_time.elapsed();
        info!(?serve_time_taken, ?server_name, "MCP server launched successfully");

        Ok(Arc::new(RunningMcpService::new(server_name.to_string(), running, stderr)))
    }
}

/// Represents a handle to a running MCP server.
pub struct RunningMcpService {
    server_name: String,
    capabilities: ServerCapabilities,
    /// Sends client requests (list tools, call tool, etc.)
    peer: Peer<RoleClient>,
    /// Owns the transport. Taken on close.
    running_service: Mutex<Option<RunningService<RoleClient, McpService>>>,
}

impl RunningMcpService {
    fn new(
        server_name: String,
        running_service: RunningService<RoleClient, McpService>,
        child_stderr: Option<ChildStderr>,
    ) -> Self {
        // The child's stderr pipe has to be drained or the server blocks once the buffer fills.
        if let Some(mut stderr) = child_stderr {
            let server_name_clone = server_name.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) => {
                            info!(target: "mcp", "{server_name_clone} stderr listening process exited due to EOF");
                            break;
                        },
                        Ok(size) => {
                            info!(target: "mcp", "{server_name_clone} logged to its stderr: {}", String::from_utf8_lossy(&buf[0..size]));
                        },
                        Err(e) => {
                            info!(target: "mcp", "{server_name_clone} stderr listening process exited due to error: {e}");
                            break;
                        },
                    }
                }
            });
        }

        let capabilities = match running_service.peer_info() {
            Some(info) => {
                debug!(?server_name, ?info, "peer info found");
                ServerCapabilities {
                    tools: info.capabilities.tools.is_some(),
                    prompts: info.capabilities.prompts.is_some(),
                    resources: info.capabilities.resources.is_some(),
                }
            },
            None => {
                warn!(?server_name, "no peer info found");
                ServerCapabilities::default()
            },
        };

        Self {
            server_name,
            capabilities,
            peer: running_service.peer().clone(),
            running_service: Mutex::new(Some(running_service)),
        }
    }
}

impl std::fmt::Debug for RunningMcpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningMcpService")
            .field("server_name", &self.server_name)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl McpConnection for RunningMcpService {
    fn capabilities(&self) -> ServerCapabilities {
        self.capabilities
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpServerError> {
        Ok(self.peer.list_all_tools().await?.into_iter().map(Into::into).collect())
    }

    async fn call_tool(&self, name: &str, args: Option<Map<String, Value>>) -> Result<CallToolResult, McpServerError> {
        Ok(self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: args,
            })
            .await?)
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, McpServerError> {
        Ok(self.peer.list_all_prompts().await?.into_iter().map(Into::into).collect())
    }

    async fn get_prompt(&self, name: &str, args: Option<Map<String, Value>>) -> Result<PromptOutput, McpServerError> {
        let result = self
            .peer
            .get_prompt(GetPromptRequestParam {
                name: name.to_string(),
                arguments: args,
            })
            .await?;
        convert(&result)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpServerError> {
        self.peer
            .list_all_resources()
            .await?
            .iter()
            .map(convert)
            .collect()
    }

    async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContent>, McpServerError> {
        let result = self
            .peer
            .read_resource(ReadResourceRequestParam { uri: uri.to_string() })
            .await?;
        result.contents.iter().map(convert).collect()
    }

    async fn close(&self) {
        let running = self.running_service.lock().await.take();
        if let Some(running) = running {
            if let Err(err) = running.cancel().await {
                warn!(server_name = %self.server_name, ?err, "failed to shut down MCP server cleanly");
            }
        }
    }
}
