//! Conversion between [InternalMessage] history and provider wire formats.

mod anthropic;
mod openai;
mod vercel;

use std::future::Future;

pub use anthropic::AnthropicFormatter;
pub use openai::OpenAiFormatter;
use serde_json::Value;
pub use vercel::VercelFormatter;

use super::types::{
    InternalMessage,
    ToolDefinition,
};
use super::{
    LlmContext,
    Provider,
    Router,
};
use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};

/// Contract shared by every wire format.
pub trait MessageFormatter {
    /// Converts history into wire messages.
    ///
    /// Formats that take the system prompt in-band embed it here and return [None] from
    /// [MessageFormatter::format_system_prompt].
    fn format(
        &self,
        history: &[InternalMessage],
        context: &LlmContext,
        system_prompt: Option<&str>,
    ) -> Result<Vec<Value>, FormatterError>;

    /// The system prompt to send out-of-band, if this format takes one.
    fn format_system_prompt(&self, system_prompt: Option<&str>) -> Option<String>;

    /// Tool definitions in the shape this format expects.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Value;

    /// Converts a complete provider response into history messages.
    fn parse_response(&self, response: &Value) -> Result<Vec<InternalMessage>, FormatterError>;

    /// Waits for a streamed response to settle, then parses the final shape.
    fn parse_stream_response<F, E>(
        &self,
        settled: F,
    ) -> impl Future<Output = Result<Vec<InternalMessage>, FormatterError>> + Send
    where
        Self: Sync,
        F: Future<Output = Result<Value, E>> + Send,
        E: std::fmt::Display,
    {
        async move {
            let response = settled.await.map_err(|err| FormatterError::Stream(err.to_string()))?;
            self.parse_response(&response)
        }
    }
}

/// The supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formatter {
    OpenAi(OpenAiFormatter),
    Anthropic(AnthropicFormatter),
    Vercel(VercelFormatter),
}

impl Formatter {
    /// Picks the wire format for a provider and router pair.
    pub fn select(provider: Provider, router: Router) -> Result<Self, FormatterError> {
        match (router, provider) {
            (Router::Vercel, _) => Ok(Self::Vercel(VercelFormatter)),
            (Router::InBuilt, Provider::OpenAi | Provider::OpenAiCompatible | Provider::Groq | Provider::Xai) => {
                Ok(Self::OpenAi(OpenAiFormatter))
            },
            (Router::InBuilt, Provider::Anthropic) => Ok(Self::Anthropic(AnthropicFormatter)),
            (Router::InBuilt, provider @ (Provider::Google | Provider::Cohere)) => {
                Err(FormatterError::UnsupportedProvider { provider, router })
            },
        }
    }

    pub fn for_context(context: &LlmContext) -> Result<Self, FormatterError> {
        Self::select(context.provider, context.router)
    }
}

impl MessageFormatter for Formatter {
    fn format(
        &self,
        history: &[InternalMessage],
        context: &LlmContext,
        system_prompt: Option<&str>,
    ) -> Result<Vec<Value>, FormatterError> {
        match self {
            Formatter::OpenAi(f) => f.format(history, context, system_prompt),
            Formatter::Anthropic(f) => f.format(history, context, system_prompt),
            Formatter::Vercel(f) => f.format(history, context, system_prompt),
        }
    }

    fn format_system_prompt(&self, system_prompt: Option<&str>) -> Option<String> {
        match self {
            Formatter::OpenAi(f) => f.format_system_prompt(system_prompt),
            Formatter::Anthropic(f) => f.format_system_prompt(system_prompt),
            Formatter::Vercel(f) => f.format_system_prompt(system_prompt),
        }
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Value {
        match self {
            Formatter::OpenAi(f) => f.format_tools(tools),
            Formatter::Anthropic(f) => f.format_tools(tools),
            Formatter::Vercel(f) => f.format_tools(tools),
        }
    }

    fn parse_response(&self, response: &Value) -> Result<Vec<InternalMessage>, FormatterError> {
        match self {
            Formatter::OpenAi(f) => f.parse_response(response),
            Formatter::Anthropic(f) => f.parse_response(response),
            Formatter::Vercel(f) => f.parse_response(response),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormatterError {
    #[error("provider '{}' is not supported by the '{}' router", .provider, .router)]
    UnsupportedProvider { provider: Provider, router: Router },
    #[error("invalid message at index {}: {}", .index, .reason)]
    InvalidMessage { index: usize, reason: String },
    #[error("unexpected response shape: {}", .0)]
    InvalidResponse(String),
    #[error("response stream failed: {}", .0)]
    Stream(String),
}

impl ClassifiedError for FormatterError {
    fn kind(&self) -> ErrorKind {
        match self {
            FormatterError::UnsupportedProvider { .. } => ErrorKind::User,
            FormatterError::InvalidMessage { .. } | FormatterError::InvalidResponse(_) | FormatterError::Stream(_) => {
                ErrorKind::System
            },
        }
    }
}

/// Fails on the first message that breaks a structural invariant.
fn validate_history(history: &[InternalMessage]) -> Result<(), FormatterError> {
    for (index, msg) in history.iter().enumerate() {
        msg.validate()
            .map_err(|reason| FormatterError::InvalidMessage { index, reason })?;
    }
    Ok(())
}

/// Text used in place of attachments a wire format cannot carry in a given position.
fn attachment_placeholder(mime_type: &str) -> String {
    format!("[{mime_type} attachment omitted]")
}
