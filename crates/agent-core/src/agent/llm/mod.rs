pub mod formatter;
pub mod model;
pub mod registry;
pub mod tokenizer;
pub mod types;

use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};

/// LLM providers known to the runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Provider {
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    Anthropic,
    Google,
    Groq,
    Xai,
    Cohere,
    #[serde(rename = "openai-compatible")]
    #[strum(serialize = "openai-compatible")]
    OpenAiCompatible,
}

/// How requests reach the provider, which decides the wire format.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, strum::EnumString, strum::Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Router {
    /// Normalized multi-provider message format.
    #[default]
    Vercel,
    /// Native provider SDK format.
    InBuilt,
}

/// Identifies the model a request is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LlmContext {
    pub provider: Provider,
    pub model: String,
    #[serde(default)]
    pub router: Router,
}

impl LlmContext {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            router: Router::default(),
        }
    }

    pub fn with_router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }
}
