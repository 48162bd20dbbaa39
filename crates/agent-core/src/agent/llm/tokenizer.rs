use serde_json::Value;

use super::{
    LlmContext,
    Provider,
};

/// Fixed per-message cost covering role markers and framing.
pub const MESSAGE_TOKEN_OVERHEAD: usize = 4;

/// Counts tokens for a specific provider family.
pub trait Tokenizer: std::fmt::Debug + Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Character based estimate. Never fails, so unknown models always get a count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproxTokenizer {
    chars_per_token: f64,
}

impl ApproxTokenizer {
    pub fn new(chars_per_token: f64) -> Self {
        Self {
            chars_per_token: if chars_per_token > 0.0 { chars_per_token } else { 4.0 },
        }
    }
}

impl Tokenizer for ApproxTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        (chars as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Returns the tokenizer used for budget calculations for `context`.
pub fn tokenizer_for(context: &LlmContext) -> ApproxTokenizer {
    match context.provider {
        Provider::Anthropic => ApproxTokenizer::new(3.5),
        Provider::OpenAi
        | Provider::OpenAiCompatible
        | Provider::Google
        | Provider::Groq
        | Provider::Xai
        | Provider::Cohere => ApproxTokenizer::new(4.0),
    }
}

/// Token count of a formatted payload: every wire message serialized as JSON plus
/// [MESSAGE_TOKEN_OVERHEAD], and the out-of-band system prompt if any.
pub fn count_formatted(tokenizer: &dyn Tokenizer, messages: &[Value], system_prompt: Option<&str>) -> usize {
    let messages: usize = messages
        .iter()
        .map(|m| tokenizer.count_tokens(&m.to_string()) + MESSAGE_TOKEN_OVERHEAD)
        .sum();
    let system = system_prompt.map_or(0, |s| tokenizer.count_tokens(s) + MESSAGE_TOKEN_OVERHEAD);
    messages + system
}
