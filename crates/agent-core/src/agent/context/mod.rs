pub mod compress;
pub mod filter;
pub mod history;
pub mod sanitize;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use history::{
    HistoryError,
    HistoryStore,
};
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{
    debug,
    trace,
};

use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};
use crate::agent::llm::LlmContext;
use crate::agent::llm::formatter::{
    Formatter,
    FormatterError,
    MessageFormatter,
};
use crate::agent::llm::registry;
use crate::agent::llm::tokenizer::{
    count_formatted,
    tokenizer_for,
};
use crate::agent::llm::types::{
    ContentPart,
    InternalMessage,
    MessageContent,
    Role,
    ToolCall,
    ToolDefinition,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextSettings {
    /// Caps the model's own input limit. The smaller of the two is used.
    #[serde(default)]
    pub max_input_tokens: Option<usize>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Strings in tool results longer than this are checked for raw base64 content.
    #[serde(default = "default_base64_threshold")]
    pub base64_threshold: usize,
}

fn default_base64_threshold() -> usize {
    sanitize::DEFAULT_BASE64_THRESHOLD
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_input_tokens: None,
            system_prompt: None,
            base64_threshold: default_base64_threshold(),
        }
    }
}

/// An image attached to a user message. `image` is base64 data or a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub image: String,
    pub mime_type: Option<String>,
}

/// A file attached to a user message. `data` is base64 data or a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
    pub data: String,
    pub mime_type: Option<String>,
    pub filename: Option<String>,
}

/// A provider ready payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedPrompt {
    pub messages: Vec<Value>,
    /// Out-of-band system prompt, [None] when the format embeds it in `messages`.
    pub system_prompt: Option<String>,
    /// Token count of the payload as measured for budget compliance.
    pub tokens: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Storage(#[from] HistoryError),
    #[error(transparent)]
    Formatter(#[from] FormatterError),
    #[error("invalid message: {}", .0)]
    InvalidMessage(String),
    #[error("tool result references unknown tool call '{}'", .0)]
    UnknownToolCall(String),
    #[error("the conversation needs {} tokens but the model accepts at most {}", .tokens, .max_tokens)]
    TokenBudgetExceeded { tokens: usize, max_tokens: usize },
}

impl ClassifiedError for ContextError {
    fn kind(&self) -> ErrorKind {
        match self {
            ContextError::Storage(_) => ErrorKind::System,
            ContextError::Formatter(err) => err.kind(),
            ContextError::InvalidMessage(_) | ContextError::UnknownToolCall(_) => ErrorKind::User,
            ContextError::TokenBudgetExceeded { .. } => ErrorKind::User,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    /// Ids of every tool call an assistant message has emitted in this session.
    tool_call_ids: HashSet<String>,
    system_prompt: Option<String>,
}

/// Conversation history of a single session.
///
/// Appends are serialized: the state lock is held across each store write, so concurrent
/// callers observe history in call order and a failed write aborts before anything later is
/// appended.
#[derive(Debug)]
pub struct ContextManager {
    session_id: String,
    context: LlmContext,
    /// Selected once for `context`.
    formatter: Formatter,
    store: Arc<dyn HistoryStore>,
    settings: ContextSettings,
    state: Mutex<State>,
}

impl ContextManager {
    /// Creates a manager for `session_id`, resuming whatever history `store` already holds.
    pub async fn new(
        session_id: impl Into<String>,
        context: LlmContext,
        store: Arc<dyn HistoryStore>,
        settings: ContextSettings,
    ) -> Result<Self, ContextError> {
        let session_id = session_id.into();
        let formatter = Formatter::for_context(&context)?;
        let history = store.load(&session_id).await?;
        let tool_call_ids = history
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
            .collect();
        debug!(%session_id, messages = history.len(), "loaded session history");

        Ok(Self {
            session_id,
            context,
            formatter,
            store,
            state: Mutex::new(State {
                tool_call_ids,
                system_prompt: settings.system_prompt.clone(),
            }),
            settings,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn context(&self) -> &LlmContext {
        &self.context
    }

    pub fn formatter(&self) -> Formatter {
        self.formatter
    }

    pub async fn system_prompt(&self) -> Option<String> {
        self.state.lock().await.system_prompt.clone()
    }

    pub async fn set_system_prompt(&self, system_prompt: Option<String>) {
        self.state.lock().await.system_prompt = system_prompt;
    }

    pub async fn add_user_message(
        &self,
        text: impl Into<String>,
        image: Option<ImageInput>,
        file: Option<FileInput>,
    ) -> Result<(), ContextError> {
        let text = text.into();
        let content = if image.is_none() && file.is_none() {
            MessageContent::Text(text)
        } else {
            let mut parts = Vec::new();
            if !text.is_empty() {
                parts.push(ContentPart::text(text));
            }
            if let Some(image) = image {
                let (mime_type, data) = split_attachment(&image.image, image.mime_type.as_deref(), "image/png");
                parts.push(ContentPart::image(data, mime_type));
            }
            if let Some(file) = file {
                let (mime_type, data) =
                    split_attachment(&file.data, file.mime_type.as_deref(), "application/octet-stream");
                parts.push(ContentPart::file(data, mime_type, file.filename));
            }
            MessageContent::Parts(parts)
        };

        let mut state = self.state.lock().await;
        self.append(&mut state, InternalMessage::user(content)).await
    }

    /// Appends an assistant turn. `tool_calls`, when given, must not be empty.
    pub async fn add_assistant_message(
        &self,
        text: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    ) -> Result<(), ContextError> {
        if tool_calls.as_ref().is_some_and(Vec::is_empty) {
            return Err(ContextError::InvalidMessage(
                "tool calls were provided but the list is empty".to_string(),
            ));
        }
        let msg = InternalMessage::assistant(text, tool_calls.unwrap_or_default());
        let mut state = self.state.lock().await;
        self.append(&mut state, msg).await
    }

    /// Sanitizes `result` into content parts and appends it as the answer to `tool_call_id`.
    pub async fn add_tool_result(
        &self,
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        result: &Value,
    ) -> Result<(), ContextError> {
        let parts = sanitize::sanitize_tool_result(result, self.settings.base64_threshold);
        let msg = InternalMessage::tool_result(tool_call_id, name, parts);
        let mut state = self.state.lock().await;
        self.append(&mut state, msg).await
    }

    /// Parses a raw provider response and appends every resulting message in order.
    pub async fn parse_response(&self, response: &Value) -> Result<Vec<InternalMessage>, ContextError> {
        let messages = self.formatter.parse_response(response)?;
        self.append_all(messages).await
    }

    /// Awaits a settled streaming response, then behaves like [Self::parse_response].
    pub async fn parse_stream_response<F, E>(&self, settled: F) -> Result<Vec<InternalMessage>, ContextError>
    where
        F: Future<Output = Result<Value, E>> + Send,
        E: std::fmt::Display,
    {
        let messages = self.formatter.parse_stream_response(settled).await?;
        self.append_all(messages).await
    }

    async fn append_all(&self, messages: Vec<InternalMessage>) -> Result<Vec<InternalMessage>, ContextError> {
        let mut state = self.state.lock().await;
        for msg in &messages {
            self.append(&mut state, msg.clone()).await?;
        }
        Ok(messages)
    }

    async fn append(&self, state: &mut State, msg: InternalMessage) -> Result<(), ContextError> {
        msg.validate().map_err(ContextError::InvalidMessage)?;
        if msg.role == Role::Tool {
            let id = msg.tool_call_id.as_deref().unwrap_or_default();
            if !state.tool_call_ids.contains(id) {
                return Err(ContextError::UnknownToolCall(id.to_string()));
            }
        }

        self.store.append(&self.session_id, &msg).await?;
        trace!(session_id = %self.session_id, role = %msg.role, "appended message");
        state
            .tool_call_ids
            .extend(msg.tool_calls.iter().map(|c| c.id.clone()));
        Ok(())
    }

    pub async fn get_history(&self) -> Result<Vec<InternalMessage>, ContextError> {
        // Wait for in-flight appends.
        let _state = self.state.lock().await;
        Ok(self.store.load(&self.session_id).await?)
    }

    /// Deletes the session's history.
    pub async fn reset(&self) -> Result<(), ContextError> {
        let mut state = self.state.lock().await;
        self.store.clear(&self.session_id).await?;
        state.tool_call_ids.clear();
        debug!(session_id = %self.session_id, "history reset");
        Ok(())
    }

    /// Tool definitions in the shape the session's format expects.
    pub fn format_tools(&self, tools: &[ToolDefinition]) -> Value {
        self.formatter.format_tools(tools)
    }

    /// Builds the payload for `context`: tool calls left without a result are closed,
    /// unsupported attachments are replaced with placeholders, history is compressed to fit the model's input limit, then formatted.
    ///
    /// Never returns a payload over the budget; [ContextError::TokenBudgetExceeded] is returned
    /// when even the latest turn cannot fit.
    pub async fn get_formatted_messages(&self, context: &LlmContext) -> Result<FormattedPrompt, ContextError> {
        let (history, system_prompt) = {
            let state = self.state.lock().await;
            (self.store.load(&self.session_id).await?, state.system_prompt.clone())
        };
        let formatter = self.formatter_for(context)?;
        let capabilities = registry::capabilities(context);
        let max_tokens = self
            .settings
            .max_input_tokens
            .map_or(capabilities.max_input_tokens, |m| m.min(capabilities.max_input_tokens));

        let history = compress::close_unanswered_tool_calls(history);
        let history = filter::filter_for_capabilities(history, &capabilities);
        let tokenizer = tokenizer_for(context);
        let out_of_band = formatter.format_system_prompt(system_prompt.as_deref());
        let measure = |history: &[InternalMessage]| -> Result<usize, FormatterError> {
            let messages = formatter.format(history, context, system_prompt.as_deref())?;
            Ok(count_formatted(&tokenizer, &messages, out_of_band.as_deref()))
        };
        let (history, stats) = compress::compress(history, max_tokens, measure)?;

        Ok(FormattedPrompt {
            messages: formatter.format(&history, context, system_prompt.as_deref())?,
            system_prompt: out_of_band,
            tokens: stats.tokens,
        })
    }

    /// Token count of the full, uncompressed history formatted for `context`.
    pub async fn count_tokens(&self, context: &LlmContext) -> Result<usize, ContextError> {
        let history = self.get_history().await?;
        let system_prompt = self.system_prompt().await;
        let formatter = self.formatter_for(context)?;
        let history = compress::close_unanswered_tool_calls(history);
        let history = filter::filter_for_capabilities(history, &registry::capabilities(context));
        let messages = formatter.format(&history, context, system_prompt.as_deref())?;
        let out_of_band = formatter.format_system_prompt(system_prompt.as_deref());
        Ok(count_formatted(&tokenizer_for(context), &messages, out_of_band.as_deref()))
    }

    fn formatter_for(&self, context: &LlmContext) -> Result<Formatter, ContextError> {
        if context.provider == self.context.provider && context.router == self.context.router {
            return Ok(self.formatter);
        }
        Ok(Formatter::for_context(context)?)
    }
}

/// Splits a possibly `data:` URL encoded attachment into its mime type and base64 payload.
fn split_attachment<'a>(data: &'a str, mime_type: Option<&'a str>, default_mime: &'a str) -> (&'a str, &'a str) {
    match sanitize::parse_data_uri(data) {
        Some((uri_mime, payload)) => (mime_type.unwrap_or(uri_mime), payload),
        None => (mime_type.unwrap_or(default_mime), data),
    }
}
