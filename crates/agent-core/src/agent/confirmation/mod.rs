pub mod allowed_tools;
pub mod events;

use std::collections::HashMap;
use std::sync::{
    Arc,
    Mutex,
    PoisonError,
};
use std::time::Duration;

use allowed_tools::{
    AllowedToolScope,
    AllowedToolsError,
    AllowedToolsProvider,
    InMemoryAllowedToolsProvider,
    PatternAllowedToolsProvider,
};
use async_trait::async_trait;
use chrono::Utc;
use events::{
    ConfirmationBus,
    ConfirmationEvent,
    TIMEOUT_REASON,
    ToolConfirmationRequest,
    ToolConfirmationResponse,
};
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;
use tokio::sync::{
    broadcast,
    oneshot,
};
use tokio_util::sync::{
    CancellationToken,
    DropGuard,
};
use tracing::{
    debug,
    info,
    warn,
};
use uuid::Uuid;

use crate::agent::error::{
    ClassifiedError,
    ErrorKind,
};

pub const DEFAULT_CONFIRMATION_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ConfirmationMode {
    /// Ask over the confirmation bus.
    #[default]
    Event,
    AutoApprove,
    AutoDeny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationSettings {
    #[serde(default)]
    pub mode: ConfirmationMode,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Tool name glob patterns that never need confirmation.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT_MS
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            mode: ConfirmationMode::default(),
            timeout_ms: default_timeout_ms(),
            allowed_tools: Vec::new(),
        }
    }
}

/// What is being asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationDetails {
    pub tool_name: String,
    pub args: Value,
    pub description: Option<String>,
    pub session_id: Option<String>,
}

impl ConfirmationDetails {
    pub fn new(tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            args,
            description: None,
            session_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfirmationError {
    #[error("'{}' was not approved within {:?}", .tool_name, .timeout)]
    Timeout { tool_name: String, timeout: Duration },
    #[error("confirmation {} was cancelled", .execution_id)]
    Cancelled { execution_id: String },
    #[error(transparent)]
    AllowedTools(#[from] AllowedToolsError),
}

impl ClassifiedError for ConfirmationError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConfirmationError::Timeout { .. } => ErrorKind::Timeout,
            ConfirmationError::Cancelled { .. } => ErrorKind::Cancelled,
            ConfirmationError::AllowedTools(err) => err.kind(),
        }
    }
}

/// Human-in-the-loop gate in front of tool execution.
///
/// Every pending request ends in exactly one of approved, denied, timed out, or cancelled.
#[async_trait]
pub trait ToolConfirmationProvider: std::fmt::Debug + Send + Sync {
    /// Resolves `Ok(true)` when approved and `Ok(false)` when denied.
    async fn request_confirmation(&self, details: ConfirmationDetails) -> Result<bool, ConfirmationError>;

    /// Rejects one pending request with [ConfirmationError::Cancelled]. Returns false if it was
    /// not pending.
    fn cancel_confirmation(&self, execution_id: &str) -> bool;

    /// Cancels every pending request, returning how many there were.
    fn cancel_all_confirmations(&self) -> usize;

    fn allowed_tools(&self) -> Arc<dyn AllowedToolsProvider>;
}

#[derive(Debug)]
enum Resolution {
    Response(ToolConfirmationResponse),
    Cancelled,
}

#[derive(Debug)]
struct Pending {
    tool_name: String,
    tx: oneshot::Sender<Resolution>,
}

#[derive(Debug)]
struct Shared {
    bus: ConfirmationBus,
    allowed_tools: Arc<dyn AllowedToolsProvider>,
    timeout: Duration,
    pending: Mutex<HashMap<String, Pending>>,
}

impl Shared {
    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self, execution_id: &str) -> Option<Pending> {
        self.pending().remove(execution_id)
    }

    /// Routes a response to its waiting request. Unknown and already resolved ids are ignored.
    fn resolve(&self, response: ToolConfirmationResponse) {
        let Some(pending) = self.take(&response.execution_id) else {
            debug!(execution_id = %response.execution_id, "ignoring response for unknown or resolved confirmation");
            return;
        };
        debug!(
            execution_id = %response.execution_id,
            tool_name = %pending.tool_name,
            approved = response.approved,
            "confirmation resolved"
        );
        pending.tx.send(Resolution::Response(response)).ok();
    }
}

/// Removes the pending entry when the waiting future finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    execution_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.take(self.execution_id);
    }
}

/// Interactive provider that asks over a [ConfirmationBus] and waits for a matching response.
#[derive(Debug)]
pub struct EventConfirmationProvider {
    shared: Arc<Shared>,
    _listener: DropGuard,
}

impl EventConfirmationProvider {
    /// Must be called within a tokio runtime; spawns the task listening for responses.
    pub fn new(bus: ConfirmationBus, allowed_tools: Arc<dyn AllowedToolsProvider>, timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            bus,
            allowed_tools,
            timeout,
            pending: Mutex::new(HashMap::new()),
        });
        let cancel_token = CancellationToken::new();
        let rx = shared.bus.subscribe();
        tokio::spawn(listen(Arc::clone(&shared), rx, cancel_token.clone()));
        Self {
            shared,
            _listener: cancel_token.drop_guard(),
        }
    }

    pub fn from_settings(
        bus: ConfirmationBus,
        allowed_tools: Arc<dyn AllowedToolsProvider>,
        settings: &ConfirmationSettings,
    ) -> Self {
        Self::new(bus, allowed_tools, Duration::from_millis(settings.timeout_ms))
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending().len()
    }
}

async fn listen(shared: Arc<Shared>, mut rx: broadcast::Receiver<ConfirmationEvent>, cancel_token: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            event = rx.recv() => match event {
                Ok(ConfirmationEvent::Response(response)) => shared.resolve(response),
                Ok(ConfirmationEvent::Requested(_)) => (),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "confirmation listener fell behind, responses may have been missed");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("confirmation listener exiting");
}

#[async_trait]
impl ToolConfirmationProvider for EventConfirmationProvider {
    async fn request_confirmation(&self, details: ConfirmationDetails) -> Result<bool, ConfirmationError> {
        let shared = &self.shared;
        if shared
            .allowed_tools
            .is_tool_allowed(&details.tool_name, details.session_id.as_deref())
            .await?
        {
            debug!(tool_name = %details.tool_name, "tool is pre-approved");
            return Ok(true);
        }

        let execution_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();
        shared.pending().insert(execution_id.clone(), Pending {
            tool_name: details.tool_name.clone(),
            tx,
        });
        let _guard = PendingGuard {
            shared,
            execution_id: &execution_id,
        };

        shared.bus.emit(ConfirmationEvent::Requested(ToolConfirmationRequest {
            execution_id: execution_id.clone(),
            tool_name: details.tool_name.clone(),
            args: details.args.clone(),
            description: details.description.clone(),
            session_id: details.session_id.clone(),
            timestamp: Utc::now(),
        }));

        let resolution = match tokio::time::timeout(shared.timeout, &mut rx).await {
            Ok(resolution) => resolution,
            Err(_) => {
                if shared.take(&execution_id).is_some() {
                    warn!(%execution_id, tool_name = %details.tool_name, timeout = ?shared.timeout, "confirmation timed out");
                    let mut denial = ToolConfirmationResponse::deny(execution_id.clone());
                    denial.session_id = details.session_id.clone();
                    denial.reason = Some(TIMEOUT_REASON.to_string());
                    shared.bus.emit(ConfirmationEvent::Response(denial));
                    return Err(ConfirmationError::Timeout {
                        tool_name: details.tool_name,
                        timeout: shared.timeout,
                    });
                }
                // Resolved at the deadline, the resolution is already in flight.
                rx.await
            },
        };

        match resolution {
            Ok(Resolution::Response(response)) => {
                if response.approved && response.remember_choice {
                    let scope = AllowedToolScope::for_session(details.session_id.as_deref());
                    match shared.allowed_tools.allow_tool(&details.tool_name, &scope).await {
                        Ok(()) => info!(tool_name = %details.tool_name, scope = %scope.key(), "remembering approval"),
                        Err(err) => warn!(?err, tool_name = %details.tool_name, "failed to remember approval"),
                    }
                }
                Ok(response.approved)
            },
            Ok(Resolution::Cancelled) | Err(_) => Err(ConfirmationError::Cancelled {
                execution_id: execution_id.clone(),
            }),
        }
    }

    fn cancel_confirmation(&self, execution_id: &str) -> bool {
        match self.shared.take(execution_id) {
            Some(pending) => {
                debug!(execution_id, "cancelling confirmation");
                pending.tx.send(Resolution::Cancelled).ok();
                true
            },
            None => false,
        }
    }

    fn cancel_all_confirmations(&self) -> usize {
        let drained: Vec<_> = self.shared.pending().drain().collect();
        let count = drained.len();
        for (_, pending) in drained {
            pending.tx.send(Resolution::Cancelled).ok();
        }
        if count > 0 {
            debug!(count, "cancelled all pending confirmations");
        }
        count
    }

    fn allowed_tools(&self) -> Arc<dyn AllowedToolsProvider> {
        Arc::clone(&self.shared.allowed_tools)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoDecision {
    Approve,
    Deny,
}

/// Non-interactive provider for headless runs. Never emits events.
#[derive(Debug)]
pub struct AutoConfirmationProvider {
    decision: AutoDecision,
    allowed_tools: Arc<dyn AllowedToolsProvider>,
}

impl AutoConfirmationProvider {
    pub fn new(decision: AutoDecision, allowed_tools: Arc<dyn AllowedToolsProvider>) -> Self {
        Self {
            decision,
            allowed_tools,
        }
    }

    pub fn approve() -> Self {
        Self::new(AutoDecision::Approve, Arc::new(InMemoryAllowedToolsProvider::new()))
    }

    pub fn deny() -> Self {
        Self::new(AutoDecision::Deny, Arc::new(InMemoryAllowedToolsProvider::new()))
    }
}

#[async_trait]
impl ToolConfirmationProvider for AutoConfirmationProvider {
    async fn request_confirmation(&self, details: ConfirmationDetails) -> Result<bool, ConfirmationError> {
        if self
            .allowed_tools
            .is_tool_allowed(&details.tool_name, details.session_id.as_deref())
            .await?
        {
            return Ok(true);
        }
        debug!(tool_name = %details.tool_name, decision = ?self.decision, "auto confirmation");
        Ok(self.decision == AutoDecision::Approve)
    }

    fn cancel_confirmation(&self, _execution_id: &str) -> bool {
        false
    }

    fn cancel_all_confirmations(&self) -> usize {
        0
    }

    fn allowed_tools(&self) -> Arc<dyn AllowedToolsProvider> {
        Arc::clone(&self.allowed_tools)
    }
}

/// Builds the provider `settings` selects. The bus is only used in [ConfirmationMode::Event].
///
/// Configured `allowed_tools` patterns are layered over `allowed_tools` and never ask.
pub fn provider_from_settings(
    settings: &ConfirmationSettings,
    bus: ConfirmationBus,
    allowed_tools: Arc<dyn AllowedToolsProvider>,
) -> Result<Arc<dyn ToolConfirmationProvider>, AllowedToolsError> {
    let allowed_tools: Arc<dyn AllowedToolsProvider> = if settings.allowed_tools.is_empty() {
        allowed_tools
    } else {
        Arc::new(PatternAllowedToolsProvider::new(allowed_tools, &settings.allowed_tools)?)
    };
    Ok(match settings.mode {
        ConfirmationMode::Event => Arc::new(EventConfirmationProvider::from_settings(bus, allowed_tools, settings)),
        ConfirmationMode::AutoApprove => Arc::new(AutoConfirmationProvider::new(AutoDecision::Approve, allowed_tools)),
        ConfirmationMode::AutoDeny => Arc::new(AutoConfirmationProvider::new(AutoDecision::Deny, allowed_tools)),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;

    fn provider(timeout: Duration) -> (EventConfirmationProvider, ConfirmationBus) {
        let bus = ConfirmationBus::new();
        let provider = EventConfirmationProvider::new(
            bus.clone(),
            Arc::new(InMemoryAllowedToolsProvider::new()),
            timeout,
        );
        (provider, bus)
    }

    async fn next_request(rx: &mut broadcast::Receiver<ConfirmationEvent>) -> ToolConfirmationRequest {
        loop {
            if let ConfirmationEvent::Requested(req) = rx.recv().await.unwrap() {
                return req;
            }
        }
    }

    #[tokio::test]
    async fn test_approve_and_deny() {
        let (provider, bus) = provider(Duration::from_secs(5));
        let mut rx = bus.subscribe();

        let details = ConfirmationDetails::new("deleteFile", json!({"path": "/tmp/x"}));
        let (approved, _) = tokio::join!(provider.request_confirmation(details.clone()), async {
            let req = next_request(&mut rx).await;
            assert_eq!(req.tool_name, "deleteFile");
            assert_eq!(req.args, json!({"path": "/tmp/x"}));
            bus.respond(ToolConfirmationResponse::approve(req.execution_id));
        });
        assert!(approved.unwrap());

        let (denied, _) = tokio::join!(provider.request_confirmation(details), async {
            let req = next_request(&mut rx).await;
            bus.respond(ToolConfirmationResponse::deny(req.execution_id));
        });
        assert!(!denied.unwrap());
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_emits_synthetic_denial() {
        let (provider, bus) = provider(Duration::from_millis(50));
        let mut rx = bus.subscribe();

        let err = provider
            .request_confirmation(ConfirmationDetails::new("deleteFile", json!({"path": "/tmp/x"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);

        let ConfirmationEvent::Requested(req) = rx.recv().await.unwrap() else {
            panic!("expected a request first");
        };
        let ConfirmationEvent::Response(denial) = rx.recv().await.unwrap() else {
            panic!("expected a synthetic denial");
        };
        assert_eq!(denial.execution_id, req.execution_id);
        assert!(!denial.approved);
        assert_eq!(denial.reason.as_deref(), Some(TIMEOUT_REASON));
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_remember_choice_skips_future_events() {
        let (provider, bus) = provider(Duration::from_secs(5));
        let mut rx = bus.subscribe();
        let details = ConfirmationDetails::new("deleteFile", json!({})).with_session("s1");

        let (approved, _) = tokio::join!(provider.request_confirmation(details.clone()), async {
            let req = next_request(&mut rx).await;
            assert_eq!(req.session_id.as_deref(), Some("s1"));
            bus.respond(ToolConfirmationResponse::approve(req.execution_id).remember().with_session("s1"));
        });
        assert!(approved.unwrap());
        // Drain the response the test itself sent.
        while rx.try_recv().is_ok() {}

        assert!(provider.request_confirmation(details).await.unwrap());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let other_session = ConfirmationDetails::new("deleteFile", json!({})).with_session("s2");
        let (approved, _) = tokio::join!(provider.request_confirmation(other_session), async {
            let req = next_request(&mut rx).await;
            bus.respond(ToolConfirmationResponse::deny(req.execution_id));
        });
        assert!(!approved.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_responses_are_ignored() {
        let (provider, bus) = provider(Duration::from_secs(5));
        let mut rx = bus.subscribe();

        let (approved, _) = tokio::join!(provider.request_confirmation(ConfirmationDetails::new("t", json!({}))), async {
            let req = next_request(&mut rx).await;
            bus.respond(ToolConfirmationResponse::approve(req.execution_id.clone()));
            bus.respond(ToolConfirmationResponse::deny(req.execution_id));
            bus.respond(ToolConfirmationResponse::deny("unknown"));
        });
        assert!(approved.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_confirmation() {
        let (provider, bus) = provider(Duration::from_secs(5));
        let mut rx = bus.subscribe();

        let (result, _) = tokio::join!(provider.request_confirmation(ConfirmationDetails::new("t", json!({}))), async {
            let req = next_request(&mut rx).await;
            assert!(provider.cancel_confirmation(&req.execution_id));
            assert!(!provider.cancel_confirmation(&req.execution_id));
            bus.respond(ToolConfirmationResponse::approve(req.execution_id));
        });
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_all_confirmations() {
        let (provider, bus) = provider(Duration::from_secs(5));
        let mut rx = bus.subscribe();

        let (a, b, cancelled) = tokio::join!(
            provider.request_confirmation(ConfirmationDetails::new("a", json!({}))),
            provider.request_confirmation(ConfirmationDetails::new("b", json!({}))),
            async {
                next_request(&mut rx).await;
                next_request(&mut rx).await;
                provider.cancel_all_confirmations()
            }
        );
        assert_eq!(cancelled, 2);
        assert!(matches!(a, Err(ConfirmationError::Cancelled { .. })));
        assert!(matches!(b, Err(ConfirmationError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_dropped_request_clears_pending() {
        let (provider, _bus) = provider(Duration::from_secs(5));
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            provider.request_confirmation(ConfirmationDetails::new("t", json!({}))),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(provider.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_auto_providers_never_emit() {
        let bus = ConfirmationBus::new();
        let mut rx = bus.subscribe();
        let settings = ConfirmationSettings {
            mode: ConfirmationMode::AutoDeny,
            ..Default::default()
        };
        let deny =
            provider_from_settings(&settings, bus.clone(), Arc::new(InMemoryAllowedToolsProvider::new())).unwrap();
        assert!(!deny.request_confirmation(ConfirmationDetails::new("t", json!({}))).await.unwrap());

        deny.allowed_tools().allow_tool("t", &AllowedToolScope::Global).await.unwrap();
        assert!(deny.request_confirmation(ConfirmationDetails::new("t", json!({}))).await.unwrap());

        assert!(AutoConfirmationProvider::approve()
            .request_confirmation(ConfirmationDetails::new("t", json!({})))
            .await
            .unwrap());
        assert_eq!(deny.cancel_all_confirmations(), 0);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_configured_patterns_skip_confirmation() {
        let bus = ConfirmationBus::new();
        let mut rx = bus.subscribe();
        let settings = ConfirmationSettings {
            mode: ConfirmationMode::Event,
            timeout_ms: 50,
            allowed_tools: vec!["fs_*".to_string()],
        };
        let provider =
            provider_from_settings(&settings, bus.clone(), Arc::new(InMemoryAllowedToolsProvider::new())).unwrap();

        assert!(provider
            .request_confirmation(ConfirmationDetails::new("fs_read", json!({"path": "/tmp/a"})))
            .await
            .unwrap());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        let err = provider
            .request_confirmation(ConfirmationDetails::new("execute_bash", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfirmationError::Timeout { .. }));
        assert!(matches!(rx.try_recv(), Ok(ConfirmationEvent::Requested(_))));
    }

    #[test]
    fn test_invalid_configured_pattern_is_a_user_error() {
        let settings = ConfirmationSettings {
            allowed_tools: vec!["a{".to_string()],
            ..Default::default()
        };
        let err = provider_from_settings(
            &settings,
            ConfirmationBus::new(),
            Arc::new(InMemoryAllowedToolsProvider::new()),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::User);
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ConfirmationSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings, ConfirmationSettings::default());
        assert_eq!(settings.timeout_ms, 120_000);

        let settings: ConfirmationSettings =
            serde_json::from_value(json!({"mode": "autoApprove", "allowedTools": ["fs_*"]})).unwrap();
        assert_eq!(settings.mode, ConfirmationMode::AutoApprove);
    }
}
