//! Static model capability table.

use tracing::warn;

use super::types::FileCategory;
use super::{
    LlmContext,
    Provider,
};

/// Max input tokens assumed for models missing from the table.
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 8_192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: &'static str,
    pub max_input_tokens: usize,
    pub supported_files: &'static [FileCategory],
}

/// Limits used when building a request for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub model: String,
    pub max_input_tokens: usize,
    pub supported_files: Vec<FileCategory>,
    /// False when the model was not found and defaults were applied.
    pub known: bool,
}

impl ModelCapabilities {
    pub fn supports(&self, category: FileCategory) -> bool {
        self.supported_files.contains(&category)
    }
}

const PDF_IMAGE: &[FileCategory] = &[FileCategory::Pdf, FileCategory::Image];
const IMAGE: &[FileCategory] = &[FileCategory::Image];
const ALL: &[FileCategory] = &[FileCategory::Pdf, FileCategory::Image, FileCategory::Audio];
const NONE: &[FileCategory] = &[];

macro_rules! models {
    ($($name:literal => $max:expr, $files:expr);* $(;)?) => {
        &[$(ModelInfo { name: $name, max_input_tokens: $max, supported_files: $files }),*]
    };
}

static OPENAI: &[ModelInfo] = models! {
    "gpt-4.1" => 1_047_576, PDF_IMAGE;
    "gpt-4.1-mini" => 1_047_576, PDF_IMAGE;
    "gpt-4.1-nano" => 1_047_576, PDF_IMAGE;
    "gpt-4o" => 128_000, PDF_IMAGE;
    "gpt-4o-mini" => 128_000, PDF_IMAGE;
    "gpt-4o-audio-preview" => 128_000, &[FileCategory::Audio];
    "gpt-4-turbo" => 128_000, IMAGE;
    "gpt-4" => 8_192, NONE;
    "gpt-3.5-turbo" => 16_385, NONE;
    "o1" => 200_000, PDF_IMAGE;
    "o3" => 200_000, PDF_IMAGE;
    "o3-mini" => 200_000, NONE;
    "o4-mini" => 200_000, PDF_IMAGE;
};

static ANTHROPIC: &[ModelInfo] = models! {
    "claude-opus-4" => 200_000, PDF_IMAGE;
    "claude-sonnet-4" => 200_000, PDF_IMAGE;
    "claude-3-7-sonnet" => 200_000, PDF_IMAGE;
    "claude-3-5-sonnet" => 200_000, PDF_IMAGE;
    "claude-3-5-haiku" => 200_000, PDF_IMAGE;
    "claude-3-opus" => 200_000, IMAGE;
    "claude-3-haiku" => 200_000, IMAGE;
};

static GOOGLE: &[ModelInfo] = models! {
    "gemini-2.5-pro" => 1_048_576, ALL;
    "gemini-2.5-flash" => 1_048_576, ALL;
    "gemini-2.0-flash" => 1_048_576, ALL;
    "gemini-1.5-pro" => 2_097_152, ALL;
    "gemini-1.5-flash" => 1_048_576, ALL;
};

static GROQ: &[ModelInfo] = models! {
    "llama-3.3-70b-versatile" => 128_000, NONE;
    "gemma2-9b-it" => 8_192, NONE;
};

static XAI: &[ModelInfo] = models! {
    "grok-4" => 256_000, IMAGE;
    "grok-3" => 131_072, NONE;
    "grok-3-mini" => 131_072, NONE;
};

static COHERE: &[ModelInfo] = models! {
    "command-a-03-2025" => 256_000, NONE;
    "command-r-plus" => 128_000, NONE;
    "command-r" => 128_000, NONE;
};

fn models_for(provider: Provider) -> &'static [ModelInfo] {
    match provider {
        Provider::OpenAi => OPENAI,
        Provider::Anthropic => ANTHROPIC,
        Provider::Google => GOOGLE,
        Provider::Groq => GROQ,
        Provider::Xai => XAI,
        Provider::Cohere => COHERE,
        Provider::OpenAiCompatible => NONE_MODELS,
    }
}

static NONE_MODELS: &[ModelInfo] = &[];

/// Finds a model by exact name, then by the longest known name that prefixes a dated or
/// suffixed variant (`gpt-4o-2024-08-06` resolves to `gpt-4o`).
pub fn lookup(provider: Provider, model: &str) -> Option<&'static ModelInfo> {
    let models = models_for(provider);
    if let Some(info) = models.iter().find(|m| m.name == model) {
        return Some(info);
    }
    models
        .iter()
        .filter(|m| model.strip_prefix(m.name).is_some_and(|rest| rest.starts_with('-')))
        .max_by_key(|m| m.name.len())
}

/// Capabilities for `context`, falling back to [DEFAULT_MAX_INPUT_TOKENS] and no attachment
/// support for unknown models.
pub fn capabilities(context: &LlmContext) -> ModelCapabilities {
    match lookup(context.provider, &context.model) {
        Some(info) => ModelCapabilities {
            model: context.model.clone(),
            max_input_tokens: info.max_input_tokens,
            supported_files: info.supported_files.to_vec(),
            known: true,
        },
        None => {
            warn!(
                provider = %context.provider,
                model = %context.model,
                max_input_tokens = DEFAULT_MAX_INPUT_TOKENS,
                "unknown model, using conservative defaults"
            );
            ModelCapabilities {
                model: context.model.clone(),
                max_input_tokens: DEFAULT_MAX_INPUT_TOKENS,
                supported_files: Vec::new(),
                known: false,
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_exact_and_dated() {
        assert_eq!(lookup(Provider::OpenAi, "gpt-4o").unwrap().name, "gpt-4o");
        assert_eq!(lookup(Provider::OpenAi, "gpt-4o-2024-08-06").unwrap().name, "gpt-4o");
        assert_eq!(lookup(Provider::OpenAi, "gpt-4o-mini-2024-07-18").unwrap().name, "gpt-4o-mini");
        assert_eq!(
            lookup(Provider::Anthropic, "claude-3-5-sonnet-20241022").unwrap().name,
            "claude-3-5-sonnet"
        );
        assert!(lookup(Provider::OpenAi, "gpt-4oo").is_none());
        assert!(lookup(Provider::Anthropic, "gpt-4o").is_none());
    }

    #[test]
    fn test_capabilities() {
        let caps = capabilities(&LlmContext::new(Provider::OpenAi, "gpt-4o"));
        assert!(caps.known);
        assert!(caps.supports(FileCategory::Pdf));
        assert_eq!(caps.max_input_tokens, 128_000);

        let caps = capabilities(&LlmContext::new(Provider::OpenAi, "gpt-3.5-turbo"));
        assert!(!caps.supports(FileCategory::Pdf));
        assert!(!caps.supports(FileCategory::Image));
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_unknown_model_falls_back() {
        let caps = capabilities(&LlmContext::new(Provider::OpenAiCompatible, "local-llama"));
        assert!(!caps.known);
        assert_eq!(caps.max_input_tokens, DEFAULT_MAX_INPUT_TOKENS);
        assert!(caps.supported_files.is_empty());
        assert!(logs_contain("unknown model"));
    }
}
