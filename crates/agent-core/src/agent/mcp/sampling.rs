//! `sampling/createMessage` support: servers asking the agent's model for a completion.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Value,
    json,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
};

use crate::agent::confirmation::{
    ConfirmationDetails,
    ConfirmationError,
    ToolConfirmationProvider,
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
use crate::agent::llm::model::{
    Model,
    ModelError,
    ModelRequest,
};
use crate::agent::llm::types::{
    InternalMessage,
    Role,
};

/// Prefix of the confirmation tool name used to gate sampling requests.
pub const SAMPLING_TOOL_PREFIX: &str = "sampling:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingRequest {
    pub messages: Vec<SamplingMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingResponse {
    pub model: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SamplingError {
    #[error("sampling request from '{}' was denied", .0)]
    Denied(String),
    #[error("sampling is not supported by this client")]
    Unsupported,
    #[error("invalid sampling request: {}", .0)]
    InvalidRequest(String),
    #[error(transparent)]
    Confirmation(#[from] ConfirmationError),
    #[error(transparent)]
    Formatter(#[from] FormatterError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl ClassifiedError for SamplingError {
    fn kind(&self) -> ErrorKind {
        match self {
            SamplingError::Denied(_) => ErrorKind::Forbidden,
            SamplingError::Unsupported | SamplingError::InvalidRequest(_) => ErrorKind::User,
            SamplingError::Confirmation(err) => err.kind(),
            SamplingError::Formatter(err) => err.kind(),
            SamplingError::Model(err) => err.kind(),
        }
    }
}

/// Answers sampling requests on behalf of servers.
#[async_trait]
pub trait SamplingHandler: std::fmt::Debug + Send + Sync {
    async fn create_message(&self, server_name: &str, request: SamplingRequest)
    -> Result<SamplingResponse, SamplingError>;
}

/// Asks for approval of every sampling request, then forwards it to the configured model.
#[derive(Debug, Clone)]
pub struct GatedSampler {
    confirmation: Arc<dyn ToolConfirmationProvider>,
    model: Arc<dyn Model>,
    context: LlmContext,
}

impl GatedSampler {
    pub fn new(confirmation: Arc<dyn ToolConfirmationProvider>, model: Arc<dyn Model>, context: LlmContext) -> Self {
        Self {
            confirmation,
            model,
            context,
        }
    }
}

#[async_trait]
impl SamplingHandler for GatedSampler {
    async fn create_message(
        &self,
        server_name: &str,
        request: SamplingRequest,
    ) -> Result<SamplingResponse, SamplingError> {
        let details = ConfirmationDetails::new(
            format!("{SAMPLING_TOOL_PREFIX}{server_name}"),
            serde_json::to_value(&request).unwrap_or(Value::Null),
        )
        .with_description(format!("'{server_name}' wants to send {} message(s) to the model", request.messages.len()));
        if !self.confirmation.request_confirmation(details).await? {
            info!(server_name, "sampling request denied");
            return Err(SamplingError::Denied(server_name.to_string()));
        }

        let history: Vec<InternalMessage> = request
            .messages
            .iter()
            .map(|msg| match msg.role {
                Role::Assistant => InternalMessage::assistant(Some(msg.text.clone()), Vec::new()),
                Role::User | Role::System | Role::Tool => InternalMessage::user(msg.text.clone()),
            })
            .collect();
        let formatter = Formatter::for_context(&self.context)?;
        let system_prompt = request.system_prompt.as_deref();
        let model_request = ModelRequest {
            context: self.context.clone(),
            messages: formatter.format(&history, &self.context, system_prompt)?,
            system_prompt: formatter.format_system_prompt(system_prompt),
            tools: Value::Null,
        };

        debug!(server_name, "forwarding sampling request to the model");
        let response = self.model.complete(model_request, CancellationToken::new()).await?;
        let text = formatter
            .parse_response(&response)?
            .iter()
            .filter(|msg| msg.role == Role::Assistant)
            .map(InternalMessage::text)
            .collect::<Vec<_>>()
            .join("\n");

        Ok(SamplingResponse {
            model: self.context.model.clone(),
            text,
            stop_reason: Some("endTurn".to_string()),
        })
    }
}

/// Wire shape of a sampling result as MCP expects it.
pub fn create_message_result(response: &SamplingResponse) -> Value {
    json!({
        "model": response.model,
        "stopReason": response.stop_reason,
        "role": "assistant",
        "content": { "type": "text", "text": response.text },
    })
}

/// Reads the params of a `sampling/createMessage` request. Only text content is accepted.
pub fn parse_create_message_params(params: &Value) -> Result<SamplingRequest, SamplingError> {
    let messages = params
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| SamplingError::InvalidRequest("missing messages".to_string()))?
        .iter()
        .map(|msg| {
            let role = match msg.get("role").and_then(Value::as_str) {
                Some("assistant") => Role::Assistant,
                Some("user") => Role::User,
                other => return Err(SamplingError::InvalidRequest(format!("unsupported role: {:?}", other))),
            };
            let content = msg.get("content").unwrap_or(&Value::Null);
            match (content.get("type").and_then(Value::as_str), content.get("text")) {
                (Some("text"), Some(Value::String(text))) => Ok(SamplingMessage {
                    role,
                    text: text.clone(),
                }),
                (kind, _) => Err(SamplingError::InvalidRequest(format!(
                    "unsupported content type: {}",
                    kind.unwrap_or("none")
                ))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SamplingRequest {
        messages,
        system_prompt: params.get("systemPrompt").and_then(Value::as_str).map(String::from),
        max_tokens: params
            .get("maxTokens")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::confirmation::AutoConfirmationProvider;
    use crate::agent::llm::model::MockModel;
    use crate::agent::llm::{
        Provider,
        Router,
    };

    fn request() -> SamplingRequest {
        SamplingRequest {
            messages: vec![SamplingMessage {
                role: Role::User,
                text: "Summarize the README".to_string(),
            }],
            system_prompt: Some("be brief".to_string()),
            max_tokens: Some(100),
        }
    }

    fn context() -> LlmContext {
        LlmContext::new(Provider::OpenAi, "gpt-4o").with_router(Router::InBuilt)
    }

    #[tokio::test]
    async fn test_approved_request_reaches_model() {
        let model = MockModel::new().with_response(json!({
            "choices": [{"message": {"role": "assistant", "content": "A short summary."}}]
        }));
        let sampler = GatedSampler::new(Arc::new(AutoConfirmationProvider::approve()), Arc::new(model.clone()), context());

        let response = sampler.create_message("docs", request()).await.unwrap();
        assert_eq!(response.text, "A short summary.");
        assert_eq!(response.model, "gpt-4o");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0]["role"], "system");
        assert_eq!(requests[0].messages[1]["content"], "Summarize the README");
    }

    #[tokio::test]
    async fn test_denied_request_never_reaches_model() {
        let model = MockModel::new();
        let sampler = GatedSampler::new(Arc::new(AutoConfirmationProvider::deny()), Arc::new(model.clone()), context());

        let err = sampler.create_message("docs", request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(model.requests().is_empty());
    }

    #[test]
    fn test_create_message_result_shape() {
        let value = create_message_result(&SamplingResponse {
            model: "gpt-4o".to_string(),
            text: "hi".to_string(),
            stop_reason: Some("endTurn".to_string()),
        });
        assert_eq!(value["content"]["text"], "hi");
        assert_eq!(value["role"], "assistant");
    }

    #[test]
    fn test_parse_create_message_params() {
        let request = parse_create_message_params(&json!({
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "Summarize the README"}}
            ],
            "systemPrompt": "be brief",
            "maxTokens": 100
        }))
        .unwrap();
        assert_eq!(request, self::request());

        let err = parse_create_message_params(&json!({
            "messages": [{"role": "user", "content": {"type": "image", "data": "AAAA", "mimeType": "image/png"}}]
        }))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);
    }
}
