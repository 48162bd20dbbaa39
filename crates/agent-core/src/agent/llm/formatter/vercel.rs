use serde_json::{
    Map,
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
    InternalMessage,
    MessageContent,
    Role,
    ToolCall,
    ToolDefinition,
};

/// Normalized multi-provider format. Assistant turns carry `tool-call` parts and tool turns carry
/// `tool-result` parts; the system prompt is the leading `system` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VercelFormatter;

impl VercelFormatter {
    fn user_content(content: Option<&MessageContent>) -> Value {
        match content {
            None => Value::String(String::new()),
            Some(MessageContent::Text(text)) => Value::String(text.clone()),
            Some(MessageContent::Parts(parts)) => Value::Array(parts.iter().map(Self::part).collect()),
        }
    }

    fn part(part: &ContentPart) -> Value {
        match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::Image { image, mime_type } => json!({ "type": "image", "image": image, "mimeType": mime_type }),
            ContentPart::File {
                data,
                mime_type,
                filename,
            } => {
                let mut value = json!({ "type": "file", "data": data, "mimeType": mime_type });
                if let Some(filename) = filename {
                    value["filename"] = Value::String(filename.clone());
                }
                value
            },
        }
    }

    fn tool_result(msg: &InternalMessage) -> Value {
        let parts = msg.parts();
        let result = parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.clone(),
                ContentPart::Image { mime_type, .. } | ContentPart::File { mime_type, .. } => {
                    attachment_placeholder(mime_type)
                },
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut value = json!({
            "type": "tool-result",
            "toolCallId": msg.tool_call_id,
            "toolName": msg.name.clone().unwrap_or_default(),
            "result": result,
        });
        if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })) {
            value["experimental_content"] = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Image { image, mime_type } => json!({ "type": "image", "data": image, "mimeType": mime_type }),
                    other => Self::part(other),
                })
                .collect();
        }
        value
    }

    fn parse_tool_call(value: &Value) -> Result<ToolCall, FormatterError> {
        let id = value["toolCallId"]
            .as_str()
            .ok_or_else(|| FormatterError::InvalidResponse("tool call is missing a toolCallId".to_string()))?;
        let name = value["toolName"]
            .as_str()
            .ok_or_else(|| FormatterError::InvalidResponse(format!("tool call {id} is missing a toolName")))?;
        let args = match &value["args"] {
            Value::Null => value["input"].clone(),
            args => args.clone(),
        };
        Ok(ToolCall::new(id, name, args))
    }

    fn parse_assistant(value: &Value) -> Result<InternalMessage, FormatterError> {
        match &value["content"] {
            Value::String(text) => Ok(InternalMessage::assistant(Some(text.clone()), Vec::new())),
            Value::Array(parts) => {
                let mut text = Vec::new();
                let mut tool_calls = Vec::new();
                for part in parts {
                    match part["type"].as_str() {
                        Some("text") => text.extend(part["text"].as_str().map(String::from)),
                        Some("tool-call") => tool_calls.push(Self::parse_tool_call(part)?),
                        _ => (),
                    }
                }
                let text = if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text.join(""))
                };
                Ok(InternalMessage::assistant(text, tool_calls))
            },
            _ => Err(FormatterError::InvalidResponse(
                "assistant message has no content".to_string(),
            )),
        }
    }

    fn parse_tool(value: &Value) -> Result<Vec<InternalMessage>, FormatterError> {
        let parts = value["content"]
            .as_array()
            .ok_or_else(|| FormatterError::InvalidResponse("tool message has no content array".to_string()))?;
        parts
            .iter()
            .filter(|p| p["type"] == "tool-result")
            .map(|p| {
                let id = p["toolCallId"].as_str().ok_or_else(|| {
                    FormatterError::InvalidResponse("tool result is missing a toolCallId".to_string())
                })?;
                let name = p["toolName"].as_str().unwrap_or_default();
                let text = match &p["result"] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(InternalMessage::tool_result(id, name, vec![ContentPart::text(text)]))
            })
            .collect()
    }
}

impl MessageFormatter for VercelFormatter {
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
            let wire = match msg.role {
                Role::System => json!({ "role": "system", "content": msg.text() }),
                Role::User => json!({ "role": "user", "content": Self::user_content(msg.content.as_ref()) }),
                Role::Assistant if !msg.has_tool_calls() => json!({ "role": "assistant", "content": msg.text() }),
                Role::Assistant => {
                    let mut parts = Vec::with_capacity(msg.tool_calls.len() + 1);
                    let text = msg.text();
                    if !text.is_empty() {
                        parts.push(json!({ "type": "text", "text": text }));
                    }
                    for call in &msg.tool_calls {
                        parts.push(json!({
                            "type": "tool-call",
                            "toolCallId": call.id,
                            "toolName": call.function.name,
                            "args": call.function.arguments_object(),
                        }));
                    }
                    json!({ "role": "assistant", "content": parts })
                },
                Role::Tool => json!({ "role": "tool", "content": [Self::tool_result(msg)] }),
            };
            messages.push(wire);
        }

        Ok(messages)
    }

    fn format_system_prompt(&self, _system_prompt: Option<&str>) -> Option<String> {
        None
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Value {
        let mut map = Map::new();
        for tool in tools {
            map.insert(
                tool.name.clone(),
                json!({ "description": tool.description, "parameters": tool.input_schema }),
            );
        }
        Value::Object(map)
    }

    /// Accepts either a settled result with `response.messages` (assistant and tool turns, in
    /// order) or the flat `text` + `toolCalls` shape.
    fn parse_response(&self, response: &Value) -> Result<Vec<InternalMessage>, FormatterError> {
        if let Some(messages) = response.pointer("/response/messages").and_then(Value::as_array) {
            let mut parsed = Vec::with_capacity(messages.len());
            for msg in messages {
                match msg["role"].as_str() {
                    Some("assistant") => parsed.push(Self::parse_assistant(msg)?),
                    Some("tool") => parsed.extend(Self::parse_tool(msg)?),
                    other => {
                        return Err(FormatterError::InvalidResponse(format!(
                            "unexpected role in response messages: {:?}",
                            other
                        )));
                    },
                }
            }
            return Ok(parsed);
        }

        let text = response["text"].as_str().map(String::from);
        let tool_calls = match &response["toolCalls"] {
            Value::Array(calls) => calls.iter().map(Self::parse_tool_call).collect::<Result<Vec<_>, _>>()?,
            Value::Null => Vec::new(),
            _ => return Err(FormatterError::InvalidResponse("toolCalls is not an array".to_string())),
        };
        if text.is_none() && tool_calls.is_empty() {
            return Err(FormatterError::InvalidResponse(
                "response has neither text nor tool calls".to_string(),
            ));
        }
        let text = text.filter(|t| !t.is_empty() || tool_calls.is_empty());
        Ok(vec![InternalMessage::assistant(text, tool_calls)])
    }
}
