//! Typed pub/sub channel between confirmation providers and whatever presents requests to a
//! human (a UI, a chat bot adapter).

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_BUS_CAPACITY: usize = 64;

/// Reason attached to denials the provider generates itself.
pub const TIMEOUT_REASON: &str = "timeout";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfirmationRequest {
    pub execution_id: String,
    pub tool_name: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfirmationResponse {
    pub execution_id: String,
    pub approved: bool,
    #[serde(default)]
    pub remember_choice: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Set on denials that no human gave, e.g. [TIMEOUT_REASON].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ToolConfirmationResponse {
    pub fn approve(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            approved: true,
            remember_choice: false,
            session_id: None,
            reason: None,
        }
    }

    pub fn deny(execution_id: impl Into<String>) -> Self {
        Self {
            approved: false,
            ..Self::approve(execution_id)
        }
    }

    pub fn remember(mut self) -> Self {
        self.remember_choice = true;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ConfirmationEvent {
    /// Emitted outward when a tool call needs a decision.
    #[serde(rename = "confirmation-requested")]
    Requested(ToolConfirmationRequest),
    /// Expected inward with the decision. Also emitted outward for timed out requests.
    #[serde(rename = "confirmation-response")]
    Response(ToolConfirmationResponse),
}

/// Broadcast bus shared by providers and their observers. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct ConfirmationBus {
    tx: broadcast::Sender<ConfirmationEvent>,
}

impl ConfirmationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationEvent> {
        self.tx.subscribe()
    }

    /// Publishes `event` to every current subscriber. Events with no subscribers are dropped.
    pub fn emit(&self, event: ConfirmationEvent) {
        trace!(?event, "emitting confirmation event");
        self.tx.send(event).ok();
    }

    /// Convenience for adapters answering a request.
    pub fn respond(&self, response: ToolConfirmationResponse) {
        self.emit(ConfirmationEvent::Response(response));
    }
}

impl Default for ConfirmationBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = ConfirmationEvent::Response(ToolConfirmationResponse::approve("e1").remember());
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "confirmation-response",
                "data": {"executionId": "e1", "approved": true, "rememberChoice": true}
            })
        );

        let inbound: ConfirmationEvent = serde_json::from_value(json!({
            "event": "confirmation-response",
            "data": {"executionId": "e2", "approved": false}
        }))
        .unwrap();
        assert_eq!(inbound, ConfirmationEvent::Response(ToolConfirmationResponse::deny("e2")));
    }

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = ConfirmationBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();
        bus.respond(ToolConfirmationResponse::deny("e1"));

        assert!(matches!(a.recv().await.unwrap(), ConfirmationEvent::Response(r) if r.execution_id == "e1"));
        assert!(matches!(b.recv().await.unwrap(), ConfirmationEvent::Response(r) if !r.approved));
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        ConfirmationBus::new().respond(ToolConfirmationResponse::approve("e1"));
    }
}
