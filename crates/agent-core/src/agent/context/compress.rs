//! Token budget compression.
//!
//! History is grouped into units that must be kept or dropped together: a user message, an
//! assistant message with every tool result answering its calls, or a standalone message. The
//! most recent user turn and everything after it is protected from dropping.

use std::collections::HashSet;

use tracing::debug;

use super::ContextError;
use crate::agent::consts::TOOL_INTERRUPTED_MESSAGE;
use crate::agent::llm::formatter::FormatterError;
use crate::agent::llm::types::{
    ContentPart,
    InternalMessage,
    MessageContent,
    Role,
};

/// Appended to text that was shortened to fit the budget.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Text parts at or below this many characters are never truncated.
const MIN_TRUNCATE_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    pub dropped_messages: usize,
    pub truncated_parts: usize,
    pub tokens: usize,
}

/// Shrinks `history` until `measure` reports at most `max_tokens`.
///
/// `measure` returns the token count of the fully formatted payload for a candidate history.
pub fn compress<F>(
    history: Vec<InternalMessage>,
    max_tokens: usize,
    measure: F,
) -> Result<(Vec<InternalMessage>, CompressionStats), ContextError>
where
    F: Fn(&[InternalMessage]) -> Result<usize, FormatterError>,
{
    let mut stats = CompressionStats {
        dropped_messages: 0,
        truncated_parts: 0,
        tokens: measure(&history)?,
    };
    if stats.tokens <= max_tokens {
        return Ok((history, stats));
    }

    let mut units = group_units(history);
    // Units before this index may be dropped. It shifts down with every removal.
    let mut protected_from = units
        .iter()
        .rposition(|u| u.starts_with_user())
        .unwrap_or(units.len().saturating_sub(1));
    while stats.tokens > max_tokens {
        let Some(idx) = units[..protected_from].iter().position(|u| !u.pinned) else {
            break;
        };
        stats.dropped_messages += units.remove(idx).messages.len();
        protected_from -= 1;

        // Never let the remaining history open on an assistant or tool turn.
        while let Some(idx) = units[..protected_from].iter().position(|u| !u.pinned) {
            if units[idx].starts_with_user() {
                break;
            }
            stats.dropped_messages += units.remove(idx).messages.len();
            protected_from -= 1;
        }

        stats.tokens = measure(&flatten(&units))?;
    }

    if stats.tokens > max_tokens {
        let mut messages = flatten(&units);
        let tail_start = messages.len() - units[protected_from..].iter().map(|u| u.messages.len()).sum::<usize>();
        while stats.tokens > max_tokens {
            if !truncate_largest(&mut messages[tail_start..]) {
                break;
            }
            stats.truncated_parts += 1;
            stats.tokens = measure(&messages)?;
        }
        if stats.tokens > max_tokens {
            return Err(ContextError::TokenBudgetExceeded {
                tokens: stats.tokens,
                max_tokens,
            });
        }
        debug!(?stats, max_tokens, "compressed history");
        return Ok((messages, stats));
    }

    debug!(?stats, max_tokens, "compressed history");
    Ok((flatten(&units), stats))
}

#[derive(Debug)]
struct Unit {
    messages: Vec<InternalMessage>,
    /// System messages are never dropped.
    pinned: bool,
}

impl Unit {
    fn starts_with_user(&self) -> bool {
        self.messages.first().is_some_and(|m| m.role == Role::User)
    }
}

fn group_units(history: Vec<InternalMessage>) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut open_calls: HashSet<String> = HashSet::new();

    for msg in history {
        match msg.role {
            Role::Tool if msg.tool_call_id.as_ref().is_some_and(|id| open_calls.contains(id)) => {
                if let Some(unit) = units.last_mut() {
                    unit.messages.push(msg);
                    continue;
                }
                units.push(Unit {
                    messages: vec![msg],
                    pinned: false,
                });
            },
            Role::Assistant if msg.has_tool_calls() => {
                open_calls = msg.tool_calls.iter().map(|c| c.id.clone()).collect();
                units.push(Unit {
                    messages: vec![msg],
                    pinned: false,
                });
            },
            role => {
                open_calls.clear();
                units.push(Unit {
                    messages: vec![msg],
                    pinned: role == Role::System,
                });
            },
        }
    }
    units
}

fn flatten(units: &[Unit]) -> Vec<InternalMessage> {
    units.iter().flat_map(|u| u.messages.iter().cloned()).collect()
}

/// Halves the largest truncatable text in `messages`. Returns false when nothing is left to cut.
fn truncate_largest(messages: &mut [InternalMessage]) -> bool {
    let mut largest: Option<(usize, Option<usize>, usize)> = None;
    for (msg_idx, msg) in messages.iter().enumerate() {
        match &msg.content {
            Some(MessageContent::Text(text)) => consider(&mut largest, msg_idx, None, text),
            Some(MessageContent::Parts(parts)) => {
                for (part_idx, part) in parts.iter().enumerate() {
                    if let ContentPart::Text { text } = part {
                        consider(&mut largest, msg_idx, Some(part_idx), text);
                    }
                }
            },
            None => (),
        }
    }

    let Some((msg_idx, part_idx, _)) = largest else {
        return false;
    };
    let text = match (&mut messages[msg_idx].content, part_idx) {
        (Some(MessageContent::Text(text)), None) => text,
        (Some(MessageContent::Parts(parts)), Some(part_idx)) => match parts.get_mut(part_idx) {
            Some(ContentPart::Text { text }) => text,
            _ => return false,
        },
        _ => return false,
    };
    *text = halve(text);
    true
}

fn consider(largest: &mut Option<(usize, Option<usize>, usize)>, msg_idx: usize, part_idx: Option<usize>, text: &str) {
    let len = text.chars().count();
    if len <= MIN_TRUNCATE_CHARS {
        return;
    }
    if largest.is_none_or(|(_, _, l)| len > l) {
        *largest = Some((msg_idx, part_idx, len));
    }
}

fn halve(text: &str) -> String {
    let body = text.strip_suffix(TRUNCATION_MARKER).unwrap_or(text);
    let keep = (body.chars().count() / 2).max(MIN_TRUNCATE_CHARS / 2);
    let mut truncated: String = body.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Gives every tool call without a recorded result a synthetic one, placed right after the
/// results that did arrive.
///
/// A turn that was cancelled or failed between tool calls leaves such calls behind, and the
/// wire formats reject a tool call with no answer.
pub fn close_unanswered_tool_calls(history: Vec<InternalMessage>) -> Vec<InternalMessage> {
    let mut closed = Vec::with_capacity(history.len());
    let mut pending: Vec<(String, String)> = Vec::new();

    for msg in history {
        if msg.role == Role::Tool {
            if let Some(id) = &msg.tool_call_id {
                pending.retain(|(pending_id, _)| pending_id != id);
            }
        } else {
            flush_unanswered(&mut closed, &mut pending);
        }
        if msg.role == Role::Assistant {
            pending.extend(
                msg.tool_calls
                    .iter()
                    .map(|call| (call.id.clone(), call.function.name.clone())),
            );
        }
        closed.push(msg);
    }
    flush_unanswered(&mut closed, &mut pending);
    closed
}

fn flush_unanswered(history: &mut Vec<InternalMessage>, pending: &mut Vec<(String, String)>) {
    if pending.is_empty() {
        return;
    }
    debug!(count = pending.len(), "closing tool calls that never received a result");
    for (id, name) in pending.drain(..) {
        history.push(InternalMessage::tool_result(id, name, vec![ContentPart::text(
            TOOL_INTERRUPTED_MESSAGE,
        )]));
    }
}
