#![allow(dead_code)]

use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{
    Arc,
    Mutex,
};
use std::time::Duration;

use agent_core::agent::confirmation::allowed_tools::InMemoryAllowedToolsProvider;
use agent_core::agent::confirmation::events::{
    ConfirmationBus,
    ConfirmationEvent,
    ToolConfirmationResponse,
};
use agent_core::agent::confirmation::{
    ConfirmationMode,
    ConfirmationSettings,
    provider_from_settings,
};
use agent_core::agent::context::ContextManager;
use agent_core::agent::context::history::InMemoryHistoryStore;
use agent_core::agent::llm::model::{
    MockModel,
    MockResponse,
    ModelRequest,
};
use agent_core::agent::llm::{
    LlmContext,
    Provider,
    Router,
};
use agent_core::agent::mcp::mock::{
    MockMcpLauncher,
    MockMcpServer,
};
use agent_core::agent::mcp::types::McpServerConfig;
use agent_core::agent::mcp::{
    ConnectOutcome,
    McpManager,
};
use agent_core::agent::protocol::{
    AgentError,
    AgentEvent,
    AgentSettings,
    TurnSummary,
};
use agent_core::agent::{
    Agent,
    UserInput,
};
use eyre::Result;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const SESSION_ID: &str = "test-session";

/// How the scripted user answers the next confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    ApproveAndRemember,
    Deny,
    /// Never answer, so the request times out.
    Ignore,
}

pub struct TestCaseBuilder {
    test_name: Option<String>,
    llm_context: LlmContext,
    settings: AgentSettings,
    servers: Vec<(String, MockMcpServer)>,
    mock_responses: Vec<MockResponse>,
    approvals: Vec<Approval>,
}

impl Default for TestCaseBuilder {
    fn default() -> Self {
        Self {
            test_name: None,
            llm_context: LlmContext::new(Provider::OpenAi, "gpt-4o").with_router(Router::InBuilt),
            settings: AgentSettings::default(),
            servers: Vec::new(),
            mock_responses: Vec::new(),
            approvals: Vec::new(),
        }
    }
}

impl TestCaseBuilder {
    pub fn test_name<'a>(mut self, name: impl Into<Cow<'a, str>>) -> Self {
        self.test_name = Some(name.into().to_string());
        self
    }

    pub fn with_llm_context(mut self, llm_context: LlmContext) -> Self {
        self.llm_context = llm_context;
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_confirmation(mut self, mode: ConfirmationMode, timeout: Duration) -> Self {
        self.settings.confirmation = ConfirmationSettings {
            mode,
            timeout_ms: timeout.as_millis() as u64,
            ..self.settings.confirmation
        };
        self
    }

    pub fn with_server(mut self, name: impl Into<String>, server: MockMcpServer) -> Self {
        self.servers.push((name.into(), server));
        self
    }

    pub fn with_responses(mut self, responses: impl IntoIterator<Item = Value>) -> Self {
        for response in responses {
            self.mock_responses.push(response.into());
        }
        self
    }

    pub fn with_response(mut self, response: impl Into<MockResponse>) -> Self {
        self.mock_responses.push(response.into());
        self
    }

    pub fn with_tool_use_approvals(mut self, approvals: impl IntoIterator<Item = Approval>) -> Self {
        self.approvals.extend(approvals);
        self
    }

    pub async fn build(self) -> Result<TestCase> {
        let mut model = MockModel::new();
        for response in self.mock_responses {
            model = model.with_response(response);
        }

        let mut launcher = MockMcpLauncher::new();
        for (name, server) in &self.servers {
            launcher = launcher.with_server(name.clone(), server.clone());
        }
        let mcp = McpManager::new(Arc::new(launcher.clone()), &self.settings.mcp, Vec::new()).spawn();
        let mut connect_outcomes = Vec::new();
        for (name, _) in &self.servers {
            let outcome = mcp
                .connect_server(name.clone(), McpServerConfig::local("mock-server", Vec::new()))
                .await?;
            connect_outcomes.push((name.clone(), outcome));
        }

        let context = ContextManager::new(
            SESSION_ID,
            self.llm_context,
            Arc::new(InMemoryHistoryStore::new()),
            self.settings.context.clone(),
        )
        .await?;

        let bus = ConfirmationBus::new();
        let confirmation = provider_from_settings(
            &self.settings.confirmation,
            bus.clone(),
            Arc::new(InMemoryAllowedToolsProvider::new()),
        )?;

        let agent = Agent::new(
            Arc::new(context),
            Arc::new(model.clone()),
            mcp,
            confirmation,
            self.settings,
        );
        let agent_rx = agent.subscribe();

        let confirmation_events = Arc::new(Mutex::new(Vec::new()));
        let responder = tokio::spawn(respond_to_confirmations(
            bus.clone(),
            bus.subscribe(),
            self.approvals.into(),
            Arc::clone(&confirmation_events),
        ));

        Ok(TestCase {
            test_name: self.test_name.unwrap_or_else(|| "agent_test".to_string()),
            agent,
            model,
            launcher,
            connect_outcomes,
            agent_rx,
            agent_events: Vec::new(),
            confirmation_events,
            responder,
        })
    }
}

/// Plays the user side of the confirmation bus.
async fn respond_to_confirmations(
    bus: ConfirmationBus,
    mut rx: broadcast::Receiver<ConfirmationEvent>,
    mut approvals: VecDeque<Approval>,
    events: Arc<Mutex<Vec<ConfirmationEvent>>>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };
        events.lock().unwrap().push(event.clone());

        let ConfirmationEvent::Requested(request) = event else {
            continue;
        };
        let response = match approvals.pop_front().unwrap_or(Approval::Ignore) {
            Approval::Approve => ToolConfirmationResponse::approve(&request.execution_id),
            Approval::ApproveAndRemember => ToolConfirmationResponse::approve(&request.execution_id).remember(),
            Approval::Deny => ToolConfirmationResponse::deny(&request.execution_id),
            Approval::Ignore => continue,
        };
        let response = match &request.session_id {
            Some(session_id) => response.with_session(session_id),
            None => response,
        };
        bus.respond(response);
    }
}

#[derive(Debug)]
pub struct TestCase {
    test_name: String,

    agent: Agent,
    model: MockModel,
    launcher: MockMcpLauncher,
    connect_outcomes: Vec<(String, ConnectOutcome)>,

    agent_rx: broadcast::Receiver<AgentEvent>,
    /// History of all events emitted by the agent
    agent_events: Vec<AgentEvent>,
    /// Everything seen on the confirmation bus, in order
    confirmation_events: Arc<Mutex<Vec<ConfirmationEvent>>>,
    responder: JoinHandle<()>,
}

impl TestCase {
    pub fn builder() -> TestCaseBuilder {
        TestCaseBuilder::default()
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub async fn run_turn(&mut self, input: impl Into<UserInput>) -> Result<TurnSummary, AgentError> {
        self.run_turn_with_cancel(input, CancellationToken::new()).await
    }

    pub async fn run_turn_with_cancel(
        &mut self,
        input: impl Into<UserInput>,
        cancel: CancellationToken,
    ) -> Result<TurnSummary, AgentError> {
        let result = tokio::time::timeout(Duration::from_secs(5), self.agent.run_turn(input, cancel))
            .await
            .expect("turn timed out");
        // Let the responder record whatever the turn left on the bus.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.collect_agent_events();
        result
    }

    /// Requests sent to the model so far.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.model.requests()
    }

    pub fn agent_events(&self) -> &[AgentEvent] {
        &self.agent_events
    }

    pub fn confirmation_events(&self) -> Vec<ConfirmationEvent> {
        self.confirmation_events.lock().unwrap().clone()
    }

    pub fn confirmation_requests(&self) -> usize {
        self.confirmation_events()
            .iter()
            .filter(|e| matches!(e, ConfirmationEvent::Requested(_)))
            .count()
    }

    pub fn connect_outcome(&self, server_name: &str) -> Option<&ConnectOutcome> {
        self.connect_outcomes
            .iter()
            .find(|(name, _)| name == server_name)
            .map(|(_, outcome)| outcome)
    }

    pub fn launcher(&self) -> &MockMcpLauncher {
        &self.launcher
    }

    fn collect_agent_events(&mut self) {
        while let Ok(evt) = self.agent_rx.try_recv() {
            self.agent_events.push(evt);
        }
    }

    fn create_test_output(&self) -> TestOutput {
        TestOutput {
            sent_requests: self.model.requests(),
            agent_events: self.agent_events.clone(),
            confirmation_events: self
                .confirmation_events
                .lock()
                .map(|events| events.clone())
                .unwrap_or_default(),
        }
    }
}

impl Drop for TestCase {
    fn drop(&mut self) {
        self.responder.abort();
        if std::thread::panicking() {
            let Ok(test_output) = serde_json::to_string_pretty(&self.create_test_output()) else {
                eprintln!("failed to create test output for test: {}", self.test_name);
                return;
            };
            let test_name = self.test_name.replace(" ", "_");
            let file_name = PathBuf::from(format!("{}_debug_output.json", test_name));
            let _ = std::fs::write(&file_name, test_output);
            println!("Test debug output written to: '{}'", file_name.to_string_lossy());
        }
    }
}

#[derive(Debug, Serialize)]
struct TestOutput {
    sent_requests: Vec<ModelRequest>,
    agent_events: Vec<AgentEvent>,
    confirmation_events: Vec<ConfirmationEvent>,
}

/// Parses one model response per non-empty line.
pub fn parse_responses(content: &str) -> Result<Vec<Value>> {
    let mut responses = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        responses.push(serde_json::from_str(line)?);
    }
    Ok(responses)
}

/// An OpenAI chat completion that only carries text.
pub fn text_response(text: &str) -> Value {
    serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": text } }]
    })
}

/// An OpenAI chat completion requesting a single tool call.
pub fn tool_call_response(id: &str, name: &str, args: Value) -> Value {
    serde_json::json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": { "name": name, "arguments": args.to_string() }
                }]
            }
        }]
    })
}
