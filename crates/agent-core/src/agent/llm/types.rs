use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Map,
    Value,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumString, strum::Display, strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// The provider-agnostic unit of conversation history.
///
/// Messages are immutable once appended to a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalMessage {
    pub role: Role,
    /// `None` only for assistant messages that carry nothing but tool calls.
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced a tool-role message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InternalMessage {
    fn new(role: Role, content: Option<MessageContent>) -> Self {
        Self {
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Some(MessageContent::Text(text.into())))
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(Role::User, Some(content.into()))
    }

    /// Creates an assistant message. `tool_calls` may be empty for a plain text reply.
    pub fn assistant(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, text.map(MessageContent::Text));
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        let mut msg = Self::new(Role::Tool, Some(MessageContent::Parts(parts)));
        msg.tool_call_id = Some(tool_call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// Content normalized into parts. Plain text becomes a single text part.
    pub fn parts(&self) -> Vec<ContentPart> {
        match &self.content {
            None => Vec::new(),
            Some(MessageContent::Text(text)) => vec![ContentPart::text(text.clone())],
            Some(MessageContent::Parts(parts)) => parts.clone(),
        }
    }

    /// Concatenation of all text parts.
    pub fn text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(MessageContent::Text(text)) => text.clone(),
            Some(MessageContent::Parts(parts)) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Checks the structural invariants every formatter relies on.
    pub fn validate(&self) -> Result<(), String> {
        match self.role {
            Role::Tool => {
                if self.tool_call_id.as_deref().is_none_or(str::is_empty) {
                    return Err("tool message is missing a tool call id".to_string());
                }
            },
            Role::User => {
                if self.content.as_ref().is_none_or(MessageContent::is_empty) {
                    return Err("user message has no content".to_string());
                }
            },
            Role::Assistant => {
                if self.content.is_none() && self.tool_calls.is_empty() {
                    return Err("assistant message has neither content nor tool calls".to_string());
                }
                if self.tool_calls.iter().any(|c| c.id.is_empty()) {
                    return Err("assistant tool call is missing an id".to_string());
                }
            },
            Role::System => (),
        }
        if self.role != Role::Assistant && !self.tool_calls.is_empty() {
            return Err(format!("{} message cannot carry tool calls", self.role));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn is_empty(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.is_empty(),
            MessageContent::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(value: Vec<ContentPart>) -> Self {
        Self::Parts(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Image {
        /// Base64 encoded image data
        image: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    File {
        /// Base64 encoded file data
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn image(image: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self::Image {
            image: image.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn file(data: impl Into<String>, mime_type: impl Into<String>, filename: Option<String>) -> Self {
        Self::File {
            data: data.into(),
            mime_type: mime_type.into(),
            filename,
        }
    }

    /// The attachment category of this part, [None] for text.
    pub fn category(&self) -> Option<FileCategory> {
        match self {
            ContentPart::Text { .. } => None,
            ContentPart::Image { .. } => Some(FileCategory::Image),
            ContentPart::File { mime_type, .. } => Some(FileCategory::from_mime(mime_type)),
        }
    }

    /// Data URL form of an image or file part.
    pub fn data_url(&self) -> Option<String> {
        match self {
            ContentPart::Text { .. } => None,
            ContentPart::Image { image, mime_type } => Some(format!("data:{mime_type};base64,{image}")),
            ContentPart::File { data, mime_type, .. } => Some(format!("data:{mime_type};base64,{data}")),
        }
    }
}

/// Attachment categories that models declare support for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::EnumString, strum::Display, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileCategory {
    Pdf,
    Image,
    Audio,
    /// Any other binary attachment. No model accepts these directly.
    Other,
}

impl FileCategory {
    pub fn from_mime(mime_type: &str) -> Self {
        let mime_type = mime_type.to_ascii_lowercase();
        if mime_type == "application/pdf" {
            FileCategory::Pdf
        } else if mime_type.starts_with("image/") {
            FileCategory::Image
        } else if mime_type.starts_with("audio/") {
            FileCategory::Audio
        } else {
            FileCategory::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<Value>) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    pub name: String,
    /// Either a JSON encoded string or an object, depending on which provider produced it.
    #[serde(default)]
    pub arguments: Value,
}

impl FunctionCall {
    /// Arguments as a JSON object.
    ///
    /// A string that does not decode to an object is passed through under the `input` key.
    pub fn arguments_object(&self) -> Map<String, Value> {
        match &self.arguments {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            Value::String(s) if s.trim().is_empty() => Map::new(),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Object(map)) => map,
                _ => Map::from_iter([("input".to_string(), Value::String(s.clone()))]),
            },
            other => Map::from_iter([("input".to_string(), other.clone())]),
        }
    }

    /// Arguments as a JSON encoded string.
    pub fn arguments_string(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        }
    }
}

/// A tool as presented to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Map<String, Value>,
}
