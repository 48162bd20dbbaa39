use serde_json::{
    Value,
    json,
};

use super::{
    FormatterError,
    MessageFormatter,
    attachment_placeholder,
    validate_history,
};
use crate::agent::llm::LlmContext;
use crate::agent::llm::types::{
    ContentPart,
    FileCategory,
    InternalMessage,
    Role,
    ToolCall,
    ToolDefinition,
};

/// Messages API format. The system prompt is sent out-of-band, tool results travel in `user`
/// turns, and consecutive turns with the same role are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AnthropicFormatter;

impl AnthropicFormatter {
    fn part_block(part: &ContentPart) -> Value {
        match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { image, mime_type } => json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime_type, "data": image },
            }),
            ContentPart::File { data, mime_type, .. } => match FileCategory::from_mime(mime_type) {
                FileCategory::Pdf => json!({
                    "type": "document",
                    "source": { "type": "base64", "media_type": mime_type, "data": data },
                }),
                FileCategory::Image => json!({
                    "type": "image",
                    "source": { "type": "base64", "media_type": mime_type, "data": data },
                }),
                FileCategory::Audio | FileCategory::Other => {
                    json!({ "type": "text", "text": attachment_placeholder(mime_type) })
                },
            },
        }
    }

    fn tool_result_block(msg: &InternalMessage) -> Value {
        let content: Vec<Value> = msg
            .parts()
            .iter()
            .map(|part| match part {
                ContentPart::File { mime_type, .. } if FileCategory::from_mime(mime_type) != FileCategory::Image => {
                    json!({ "type": "text", "text": attachment_placeholder(mime_type) })
                },
                other => Self::part_block(other),
            })
            .collect();
        json!({
            "type": "tool_result",
            "tool_use_id": msg.tool_call_id,
            "content": content,
        })
    }

    fn assistant_blocks(msg: &InternalMessage) -> Vec<Value> {
        let mut blocks = Vec::new();
        let text = msg.text();
        if !text.is_empty() {
            blocks.push(json!({ "type": "text", "text": text }));
        }
        for call in &msg.tool_calls {
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.function.name,
                "input": call.function.arguments_object(),
            }));
        }
        if blocks.is_empty() {
            blocks.push(json!({ "type": "text", "text": "(no content)" }));
        }
        blocks
    }

    /// Appends a turn, merging it into the previous one when the roles match.
    fn push_turn(messages: &mut Vec<Value>, role: &str, mut blocks: Vec<Value>) {
        if let Some(last) = messages.last_mut() {
            if last["role"] == role {
                if let Some(content) = last["content"].as_array_mut() {
                    content.append(&mut blocks);
                    return;
                }
            }
        }
        messages.push(json!({ "role": role, "content": blocks }));
    }
}

impl MessageFormatter for AnthropicFormatter {
    fn format(
        &self,
        history: &[InternalMessage],
        _context: &LlmContext,
        _system_prompt: Option<&str>,
    ) -> Result<Vec<Value>, FormatterError> {
        validate_history(history)?;

        let mut messages = Vec::with_capacity(history.len());
        for msg in history {
            match msg.role {
                // Only one system prompt is accepted, so extra system turns are sent as user text.
                Role::System => Self::push_turn(&mut messages, "user", vec![
                    json!({ "type": "text", "text": msg.text() }),
                ]),
                Role::User => {
                    let blocks = msg.parts().iter().map(Self::part_block).collect();
                    Self::push_turn(&mut messages, "user", blocks);
                },
                Role::Assistant => Self::push_turn(&mut messages, "assistant", Self::assistant_blocks(msg)),
                Role::Tool => Self::push_turn(&mut messages, "user", vec![Self::tool_result_block(msg)]),
            }
        }

        Ok(messages)
    }

    fn format_system_prompt(&self, system_prompt: Option<&str>) -> Option<String> {
        system_prompt.filter(|s| !s.is_empty()).map(String::from)
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Value {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect()
    }

    fn parse_response(&self, response: &Value) -> Result<Vec<InternalMessage>, FormatterError> {
        let blocks = response["content"]
            .as_array()
            .ok_or_else(|| FormatterError::InvalidResponse("missing content array".to_string()))?;

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        text.push(t.to_string());
                    }
                },
                Some("tool_use") => {
                    let id = block["id"]
                        .as_str()
                        .ok_or_else(|| FormatterError::InvalidResponse("tool_use block is missing an id".to_string()))?;
                    let name = block["name"].as_str().ok_or_else(|| {
                        FormatterError::InvalidResponse(format!("tool_use block {id} is missing a name"))
                    })?;
                    tool_calls.push(ToolCall::new(id, name, block["input"].clone()));
                },
                _ => (),
            }
        }

        let text = if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text.join("\n"))
        };
        Ok(vec![InternalMessage::assistant(text, tool_calls)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::Provider;

    fn ctx() -> LlmContext {
        LlmContext::new(Provider::Anthropic, "claude-3-5-sonnet")
    }

    #[test]
    fn test_system_prompt_out_of_band() {
        let history = vec![InternalMessage::user("hello")];
        let messages = AnthropicFormatter.format(&history, &ctx(), Some("Be brief")).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(AnthropicFormatter.format_system_prompt(Some("Be brief")).unwrap(), "Be brief");
        assert_eq!(AnthropicFormatter.format_system_prompt(Some("")), None);
    }

    #[test]
    fn test_parallel_tool_results_merge_into_one_user_turn() {
        let history = vec![
            InternalMessage::user("weather in two cities"),
            InternalMessage::assistant(Some("Checking both.".to_string()), vec![
                ToolCall::new("toolu_1", "weather", json!({"city": "Paris"})),
                ToolCall::new("toolu_2", "weather", json!("{\"city\":\"Oslo\"}")),
            ]),
            InternalMessage::tool_result("toolu_1", "weather", vec![ContentPart::text("sunny")]),
            InternalMessage::tool_result("toolu_2", "weather", vec![ContentPart::text("snow")]),
        ];
        let messages = AnthropicFormatter.format(&history, &ctx(), None).unwrap();
        assert_eq!(messages.len(), 3);

        let assistant = messages[1]["content"].as_array().unwrap();
        assert_eq!(assistant[0], json!({"type": "text", "text": "Checking both."}));
        assert_eq!(assistant[1]["type"], "tool_use");
        assert_eq!(assistant[2]["input"], json!({"city": "Oslo"}));

        let results = messages[2]["content"].as_array().unwrap();
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
        assert_eq!(results[1]["content"][0]["text"], "snow");
    }

    #[test]
    fn test_document_and_image_blocks() {
        let history = vec![InternalMessage::user(vec![
            ContentPart::file("JVBERi0=", "application/pdf", None),
            ContentPart::image("aGVsbG8=", "image/jpeg"),
            ContentPart::file("AAAA", "application/zip", None),
        ])];
        let messages = AnthropicFormatter.format(&history, &ctx(), None).unwrap();
        let blocks = messages[0]["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "document");
        assert_eq!(blocks[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(blocks[2]["text"], "[application/zip attachment omitted]");
    }

    #[test]
    fn test_parse_interleaved_response() {
        let response = json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "I'll search."},
                {"type": "tool_use", "id": "toolu_9", "name": "search", "input": {"q": "rust"}},
                {"type": "text", "text": "And read."},
                {"type": "tool_use", "id": "toolu_10", "name": "read", "input": {"path": "/a"}}
            ],
            "stop_reason": "tool_use"
        });
        let messages = AnthropicFormatter.parse_response(&response).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text(), "I'll search.\nAnd read.");
        assert_eq!(messages[0].tool_calls.len(), 2);
        assert_eq!(messages[0].tool_calls[1].function.arguments_object()["path"], "/a");
    }

    #[test]
    fn test_parse_tool_only_response_has_null_content() {
        let response = json!({"content": [{"type": "tool_use", "id": "t", "name": "n", "input": {}}]});
        let messages = AnthropicFormatter.parse_response(&response).unwrap();
        assert!(messages[0].content.is_none());
        assert!(AnthropicFormatter.parse_response(&json!({})).is_err());
    }
}
