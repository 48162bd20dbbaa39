//! Capability filtering of attachments before a history is formatted for a model.

use tracing::debug;

use crate::agent::llm::registry::ModelCapabilities;
use crate::agent::llm::types::{
    ContentPart,
    FileCategory,
    InternalMessage,
    MessageContent,
};

pub fn image_placeholder(model: &str) -> String {
    format!("[Image removed - not supported by {model}]")
}

pub fn file_placeholder(model: &str) -> String {
    format!("[File attachment removed - not supported by {model}]")
}

/// Replaces every attachment part the model cannot accept with a placeholder text part.
///
/// Turns are never emptied: each stripped part leaves its placeholder behind in place.
pub fn filter_for_capabilities(history: Vec<InternalMessage>, capabilities: &ModelCapabilities) -> Vec<InternalMessage> {
    let mut stripped = 0;
    let filtered = history
        .into_iter()
        .map(|mut msg| {
            msg.content = match msg.content.take() {
                Some(MessageContent::Parts(parts)) => Some(MessageContent::Parts(
                    parts
                        .into_iter()
                        .map(|part| match part.category() {
                            Some(category) if !capabilities.supports(category) => {
                                stripped += 1;
                                placeholder_for(category, &capabilities.model)
                            },
                            _ => part,
                        })
                        .collect(),
                )),
                other => other,
            };
            msg
        })
        .collect();

    if stripped > 0 {
        debug!(model = %capabilities.model, stripped, "removed unsupported attachments");
    }
    filtered
}

fn placeholder_for(category: FileCategory, model: &str) -> ContentPart {
    match category {
        FileCategory::Image => ContentPart::text(image_placeholder(model)),
        FileCategory::Pdf | FileCategory::Audio | FileCategory::Other => ContentPart::text(file_placeholder(model)),
    }
}
