//! Agent runtime core: conversation context, MCP servers, and tool confirmation, tied together by
//! [Agent].

pub mod confirmation;
pub mod consts;
pub mod context;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod protocol;
pub mod util;

use std::sync::Arc;

use confirmation::{
    ConfirmationDetails,
    ConfirmationError,
    ToolConfirmationProvider,
};
use context::{
    ContextManager,
    FileInput,
    ImageInput,
};
use error::ClassifiedError;
use llm::model::{
    Model,
    ModelError,
    ModelRequest,
};
use llm::types::{
    InternalMessage,
    Role,
    ToolCall,
    ToolDefinition,
};
use mcp::McpManagerHandle;
use mcp::types::McpTool;
use protocol::{
    AgentError,
    AgentEvent,
    AgentSettings,
    AgentStopReason,
    ToolCallRecord,
    ToolCallResult,
    TurnSummary,
    UpdateEvent,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    warn,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Input for one user turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    pub text: String,
    pub image: Option<ImageInput>,
    pub file: Option<FileInput>,
}

impl From<String> for UserInput {
    fn from(text: String) -> Self {
        Self {
            text,
            ..Default::default()
        }
    }
}

impl From<&str> for UserInput {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

/// Runs user turns for one session: model requests, tool confirmation, and tool execution over
/// MCP, with every message recorded through the session's [ContextManager].
#[derive(Debug)]
pub struct Agent {
    context: Arc<ContextManager>,
    /// The backend/model provider
    model: Arc<dyn Model>,
    mcp_manager_handle: McpManagerHandle,
    confirmation: Arc<dyn ToolConfirmationProvider>,
    /// Configuration settings to alter agent behavior.
    settings: AgentSettings,
    event_tx: broadcast::Sender<AgentEvent>,
}

/// How one tool call ended, before it is recorded.
enum ToolOutcome {
    Finished(ToolCallResult),
    Cancelled,
}

impl Agent {
    pub fn new(
        context: Arc<ContextManager>,
        model: Arc<dyn Model>,
        mcp_manager_handle: McpManagerHandle,
        confirmation: Arc<dyn ToolConfirmationProvider>,
        settings: AgentSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            context,
            model,
            mcp_manager_handle,
            confirmation,
            settings,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn context(&self) -> &Arc<ContextManager> {
        &self.context
    }

    pub fn mcp(&self) -> &McpManagerHandle {
        &self.mcp_manager_handle
    }

    fn emit(&self, event: impl Into<AgentEvent>) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event.into());
    }

    /// Runs one user turn to completion.
    ///
    /// Once `cancel` fires nothing more is appended to the history and pending confirmations
    /// for this turn are abandoned.
    pub async fn run_turn(
        &self,
        input: impl Into<UserInput>,
        cancel: CancellationToken,
    ) -> Result<TurnSummary, AgentError> {
        let input = input.into();
        let session_id = self.context.session_id().to_string();
        info!(%session_id, "starting user turn");
        self.emit(AgentEvent::TurnStarted {
            session_id: session_id.clone(),
        });

        let mut summary = TurnSummary {
            stop_reason: AgentStopReason::EndTurn,
            iterations: 0,
            tool_calls: Vec::new(),
            final_text: None,
        };

        if cancel.is_cancelled() {
            return Ok(self.end_turn(summary, AgentStopReason::Cancelled));
        }
        self.context
            .add_user_message(input.text, input.image, input.file)
            .await?;

        while summary.iterations < self.settings.max_iterations {
            summary.iterations += 1;

            let tools = self.mcp_manager_handle.get_all_tools().await?;
            let Some(messages) = self.send_request(&tools, &cancel).await? else {
                return Ok(self.end_turn(summary, AgentStopReason::Cancelled));
            };

            let mut tool_calls = Vec::new();
            for msg in messages.iter().filter(|m| m.role == Role::Assistant) {
                let text = msg.text();
                if !text.is_empty() {
                    self.emit(UpdateEvent::AgentContent(text.clone()));
                    summary.final_text = Some(text);
                }
                tool_calls.extend(msg.tool_calls.iter().cloned());
            }

            if tool_calls.is_empty() {
                return Ok(self.end_turn(summary, AgentStopReason::EndTurn));
            }

            for tool_call in tool_calls {
                let tool = tools.iter().find(|t| t.name == tool_call.function.name);
                match self.run_tool_call(&tool_call, tool, &cancel).await? {
                    ToolOutcome::Finished(result) => summary.tool_calls.push(ToolCallRecord { tool_call, result }),
                    ToolOutcome::Cancelled => {
                        summary.tool_calls.push(ToolCallRecord {
                            tool_call,
                            result: ToolCallResult::Cancelled,
                        });
                        return Ok(self.end_turn(summary, AgentStopReason::Cancelled));
                    },
                }
            }
        }

        warn!(%session_id, max_iterations = self.settings.max_iterations, "turn reached the iteration limit");
        Ok(self.end_turn(summary, AgentStopReason::MaxIterations))
    }

    /// Sends the formatted history to the model and records the response. Returns [None] when
    /// cancelled.
    async fn send_request(
        &self,
        tools: &[McpTool],
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<InternalMessage>>, AgentError> {
        let llm_context = self.context.context().clone();
        let prompt = self.context.get_formatted_messages(&llm_context).await?;
        let definitions: Vec<ToolDefinition> = tools.iter().map(McpTool::definition).collect();
        let request = ModelRequest {
            context: llm_context,
            messages: prompt.messages,
            system_prompt: prompt.system_prompt,
            tools: if definitions.is_empty() {
                Value::Null
            } else {
                self.context.format_tools(&definitions)
            },
        };
        debug!(tokens = prompt.tokens, tools = definitions.len(), "sending model request");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            res = self.model.complete(request, cancel.clone()) => res,
        };
        let response = match response {
            Ok(response) => response,
            Err(ModelError::Cancelled) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if cancel.is_cancelled() {
            return Ok(None);
        }
        Ok(Some(self.context.parse_response(&response).await?))
    }

    async fn run_tool_call(
        &self,
        tool_call: &ToolCall,
        tool: Option<&McpTool>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutcome, AgentError> {
        self.emit(UpdateEvent::ToolCall(tool_call.clone()));
        let name = tool_call.function.name.clone();
        let args = tool_call.function.arguments_object();

        let mut details =
            ConfirmationDetails::new(name.clone(), Value::Object(args.clone())).with_session(self.context.session_id());
        if let Some(tool) = tool.filter(|t| !t.description.is_empty()) {
            details = details.with_description(tool.description.clone());
        }

        // Dropping the confirmation future withdraws the pending request.
        let decision = tokio::select! {
            _ = cancel.cancelled() => return Ok(ToolOutcome::Cancelled),
            res = self.confirmation.request_confirmation(details) => res,
        };
        let result = match decision {
            Ok(true) => match self.execute_tool(&name, args, cancel).await {
                Some(result) => result,
                None => return Ok(ToolOutcome::Cancelled),
            },
            Ok(false) => {
                info!(tool_name = %name, "tool call denied");
                ToolCallResult::Denied { timed_out: false }
            },
            Err(ConfirmationError::Timeout { .. }) => {
                info!(tool_name = %name, "tool call was not approved in time");
                ToolCallResult::Denied { timed_out: true }
            },
            Err(ConfirmationError::Cancelled { .. }) => return Ok(ToolOutcome::Cancelled),
            Err(err) => return Err(err.into()),
        };

        if cancel.is_cancelled() {
            return Ok(ToolOutcome::Cancelled);
        }
        self.context
            .add_tool_result(&tool_call.id, &name, &result.to_model_value())
            .await?;
        self.emit(UpdateEvent::ToolCallFinished {
            tool_call: tool_call.clone(),
            result: result.clone(),
        });
        Ok(ToolOutcome::Finished(result))
    }

    /// Returns [None] when cancelled. Tool failures are reported to the model rather than
    /// ending the turn.
    async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Option<ToolCallResult> {
        match self
            .mcp_manager_handle
            .execute_tool(name, Some(args), cancel.clone())
            .await
        {
            Ok(output) => match serde_json::to_value(&output) {
                Ok(value) => Some(ToolCallResult::Success(value)),
                Err(err) => Some(ToolCallResult::Error {
                    kind: error::ErrorKind::System,
                    message: err.to_string(),
                }),
            },
            Err(err) if err.kind() == error::ErrorKind::Cancelled => None,
            Err(err) => {
                warn!(tool_name = name, ?err, "tool execution failed");
                Some(ToolCallResult::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                })
            },
        }
    }

    fn end_turn(&self, mut summary: TurnSummary, stop_reason: AgentStopReason) -> TurnSummary {
        info!(
            session_id = self.context.session_id(),
            ?stop_reason,
            iterations = summary.iterations,
            "user turn ended"
        );
        summary.stop_reason = stop_reason;
        self.emit(AgentEvent::EndTurn(summary.clone()));
        summary
    }
}
