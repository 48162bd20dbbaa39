use std::future::Future;
use std::pin::Pin;
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
};
use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
};

use super::LlmContext;
use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};

/// A request for one model completion, already in the provider's wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    pub context: LlmContext,
    pub messages: Vec<Value>,
    pub system_prompt: Option<String>,
    /// Tool definitions formatted for the provider, `null` when no tools are offered.
    pub tools: Value,
}

pub type ModelFuture = Pin<Box<dyn Future<Output = Result<Value, ModelError>> + Send + 'static>>;

/// Backend that sends a formatted request to an LLM and resolves to the raw provider response.
///
/// **Important** - implementations should be cancel safe
pub trait Model: std::fmt::Debug + Send + Sync + 'static {
    fn complete(&self, request: ModelRequest, cancel_token: CancellationToken) -> ModelFuture;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum ModelError {
    #[error("the model request was cancelled")]
    Cancelled,
    #[error("the model did not respond within {:?}", .0)]
    Timeout(Duration),
    #[error("the model request was rejected: {}", .0)]
    InvalidRequest(String),
    #[error("{}", .0)]
    Custom(String),
}

impl ClassifiedError for ModelError {
    fn kind(&self) -> ErrorKind {
        match self {
            ModelError::Cancelled => ErrorKind::Cancelled,
            ModelError::Timeout(_) => ErrorKind::Timeout,
            ModelError::InvalidRequest(_) => ErrorKind::User,
            ModelError::Custom(_) => ErrorKind::System,
        }
    }
}

/// Scripted [Model] that replays responses in order and records every request.
#[derive(Debug, Clone, Default)]
pub struct MockModel {
    inner: Arc<Mutex<mock::Inner>>,
}

impl MockModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, response: impl Into<MockResponse>) -> Self {
        self.lock().mock_responses.push(response.into());
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().received_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, mock::Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    result: Result<Value, ModelError>,
    /// Delay before the response resolves.
    delay: Option<Duration>,
}

impl MockResponse {
    pub fn error(err: ModelError) -> Self {
        Self {
            result: Err(err),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl From<Value> for MockResponse {
    fn from(value: Value) -> Self {
        Self {
            result: Ok(value),
            delay: None,
        }
    }
}

impl Model for MockModel {
    fn complete(&self, request: ModelRequest, cancel_token: CancellationToken) -> ModelFuture {
        let mut inner = self.lock();
        let Some(response) = inner.mock_responses.get(inner.response_index).cloned() else {
            error!(?request, "received an unexpected request");
            return Box::pin(async { Err(ModelError::Custom("no mock response configured".to_string())) });
        };
        inner.received_requests.push(request);
        inner.response_index += 1;

        Box::pin(async move {
            if let Some(delay) = response.delay {
                debug!(?delay, "delaying mock response");
                tokio::select! {
                    _ = cancel_token.cancelled() => return Err(ModelError::Cancelled),
                    _ = tokio::time::sleep(delay) => (),
                }
            }
            if cancel_token.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            response.result
        })
    }
}

mod mock {
    use super::*;

    #[derive(Debug, Default)]
    pub(super) struct Inner {
        /// Current index into [Self::mock_responses].
        pub response_index: usize,
        pub mock_responses: Vec<MockResponse>,
        pub received_requests: Vec<ModelRequest>,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::agent::llm::Provider;

    fn request() -> ModelRequest {
        ModelRequest {
            context: LlmContext::new(Provider::OpenAi, "gpt-4o"),
            messages: vec![json!({"role": "user", "content": "hi"})],
            system_prompt: None,
            tools: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_mock_model_replays_in_order() {
        let model = MockModel::new()
            .with_response(json!({"n": 1}))
            .with_response(MockResponse::error(ModelError::Custom("boom".into())));

        assert_eq!(
            model.complete(request(), CancellationToken::new()).await.unwrap(),
            json!({"n": 1})
        );
        assert!(model.complete(request(), CancellationToken::new()).await.is_err());
        assert!(model.complete(request(), CancellationToken::new()).await.is_err());
        assert_eq!(model.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_model_cancellation() {
        let model = MockModel::new().with_response(MockResponse::from(json!({})).with_delay(Duration::from_secs(60)));
        let token = CancellationToken::new();
        let fut = model.complete(request(), token.clone());
        token.cancel();
        let err = fut.await.unwrap_err();
        assert_eq!(err, ModelError::Cancelled);
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
