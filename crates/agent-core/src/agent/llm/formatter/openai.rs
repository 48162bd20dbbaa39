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
    MessageContent,
    Role,
    ToolCall,
    ToolDefinition,
};

/// Chat Completions format. The system prompt is the leading `system` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenAiFormatter;

impl OpenAiFormatter {
    fn user_content(content: Option<&MessageContent>) -> Value {
        match content {
            None => Value::String(String::new()),
            Some(MessageContent::Text(text)) => Value::String(text.clone()),
            Some(MessageContent::Parts(parts)) => Value::Array(parts.iter().map(Self::user_part).collect()),
        }
    }

    fn user_part(part: &ContentPart) -> Value {
        match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { .. } => json!({
                "type": "image_url",
                "image_url": { "url": part.data_url() },
            }),
            ContentPart::File {
                data,
                mime_type,
                filename,
            } => match FileCategory::from_mime(mime_type) {
                FileCategory::Audio => json!({
                    "type": "input_audio",
                    "input_audio": {
                        "data": data,
                        "format": mime_type.rsplit('/').next().unwrap_or("wav"),
                    },
                }),
                _ => json!({
                    "type": "file",
                    "file": {
                        "filename": filename.clone().unwrap_or_else(|| "file".to_string()),
                        "file_data": part.data_url(),
                    },
                }),
            },
        }
    }

    /// Tool messages only accept text.
    fn tool_content(msg: &InternalMessage) -> String {
        msg.parts()
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.clone(),
                ContentPart::Image { mime_type, .. } | ContentPart::File { mime_type, .. } => {
                    attachment_placeholder(mime_type)
                },
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn tool_call(call: &ToolCall) -> Value {
        json!({
            "id": call.id,
            "type": "function",
            "function": {
                "name": call.function.name,
                "arguments": call.function.arguments_string(),
            },
        })
    }

    fn parse_tool_call(value: &Value) -> Result<ToolCall, FormatterError> {
        let id = value["id"]
            .as_str()
            .ok_or_else(|| FormatterError::InvalidResponse("tool call is missing an id".to_string()))?;
        let name = value["function"]["name"]
            .as_str()
            .ok_or_else(|| FormatterError::InvalidResponse(format!("tool call {id} is missing a function name")))?;
        Ok(ToolCall::new(id, name, value["function"]["arguments"].clone()))
    }
}

impl MessageFormatter for OpenAiFormatter {
    fn format(
        &self,
        history: &[InternalMessage],
        _context: &LlmContext,
        system_prompt: Option<&str>,
    ) -> Result<Vec<Value>, FormatterError> {
        validate_history(history)?;

        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(system_prompt) = system_prompt.filter(|s| !s.is_empty()) {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }

        for msg in history {
            match msg.role {
                Role::System => messages.push(json!({ "role": "system", "content": msg.text() })),
                Role::User => messages.push(json!({
                    "role": "user",
                    "content": Self::user_content(msg.content.as_ref()),
                })),
                Role::Assistant => {
                    let content = match &msg.content {
                        None => Value::Null,
                        Some(_) => Value::String(msg.text()),
                    };
                    let mut wire = json!({ "role": "assistant", "content": content });
                    if msg.has_tool_calls() {
                        wire["tool_calls"] = msg.tool_calls.iter().map(Self::tool_call).collect();
                    }
                    messages.push(wire);
                },
                Role::Tool => {
                    let mut wire = json!({
                        "role": "tool",
                        "tool_call_id": msg.tool_call_id,
                        "content": Self::tool_content(msg),
                    });
                    if let Some(name) = &msg.name {
                        wire["name"] = Value::String(name.clone());
                    }
                    messages.push(wire);
                },
            }
        }

        Ok(messages)
    }

    fn format_system_prompt(&self, _system_prompt: Option<&str>) -> Option<String> {
        None
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Value {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    },
                })
            })
            .collect()
    }

    fn parse_response(&self, response: &Value) -> Result<Vec<InternalMessage>, FormatterError> {
        let message = response
            .pointer("/choices/0/message")
            .ok_or_else(|| FormatterError::InvalidResponse("missing choices[0].message".to_string()))?;

        let text = match &message["content"] {
            Value::String(s) => Some(s.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join(""),
            ),
            _ => None,
        };

        let tool_calls = match &message["tool_calls"] {
            Value::Array(calls) => calls.iter().map(Self::parse_tool_call).collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };

        // An empty reply still produces a turn so the conversation alternates.
        let text = match (&text, tool_calls.is_empty()) {
            (None, true) => Some(String::new()),
            _ => text,
        };

        Ok(vec![InternalMessage::assistant(text, tool_calls)])
    }
}
