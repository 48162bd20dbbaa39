mod common;

use std::sync::Arc;
use std::time::Duration;

use agent_core::agent::confirmation::{
    ConfirmationMode,
    ConfirmationSettings,
};
use agent_core::agent::confirmation::events::{
    ConfirmationEvent,
    TIMEOUT_REASON,
};
use agent_core::agent::consts::{
    TOOL_CONFIRMATION_TIMEOUT_MESSAGE,
    TOOL_DENIED_MESSAGE,
    TOOL_INTERRUPTED_MESSAGE,
};
use agent_core::agent::context::filter::file_placeholder;
use agent_core::agent::context::history::InMemoryHistoryStore;
use agent_core::agent::context::{
    ContextManager,
    ContextSettings,
    FileInput,
};
use agent_core::agent::error::ErrorKind;
use agent_core::agent::llm::model::MockResponse;
use agent_core::agent::llm::types::{
    ContentPart,
    Role,
};
use agent_core::agent::llm::{
    LlmContext,
    Provider,
    Router,
};
use agent_core::agent::mcp::ConnectOutcome;
use agent_core::agent::mcp::mock::MockMcpServer;
use agent_core::agent::protocol::{
    AgentEvent,
    AgentSettings,
    AgentStopReason,
    ToolCallResult,
    UpdateEvent,
};
use common::*;
use rmcp::model::{
    CallToolResult,
    Content,
};
use serde_json::{
    Value,
    json,
};
use tokio_util::sync::CancellationToken;

fn tool_message(messages: &[Value]) -> &Value {
    messages
        .iter()
        .find(|m| m["role"] == "tool")
        .expect("a tool message should exist")
}

#[tokio::test]
async fn test_calculator_turn() {
    let _ = tracing_subscriber::fmt::try_init();

    let calculator = MockMcpServer::new()
        .with_tool("calculator", "Evaluates arithmetic expressions")
        .with_tool_result("calculator", CallToolResult::success(vec![Content::text("4")]));

    let mut test = TestCase::builder()
        .test_name("calculator turn")
        .with_server("calc", calculator.clone())
        .with_responses(parse_responses(include_str!("./mock_responses/calculator.jsonl")).unwrap())
        .with_tool_use_approvals([Approval::Approve])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("What is 2+2?").await.unwrap();

    assert_eq!(summary.stop_reason, AgentStopReason::EndTurn);
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.final_text.as_deref(), Some("2 + 2 = 4"));
    assert_eq!(summary.tool_calls.len(), 1);
    assert!(matches!(summary.tool_calls[0].result, ToolCallResult::Success(_)));

    let calls = calculator.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "calculator");
    assert_eq!(calls[0].1.clone().map(Value::Object), Some(json!({ "expression": "2+2" })));

    let requests = test.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools[0]["function"]["name"], "calculator");

    // The tool call and its result stay adjacent.
    let messages = &requests[1].messages;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["tool_calls"][0]["id"], "call_1");
    assert_eq!(messages[2]["role"], "tool");
    assert_eq!(messages[2]["tool_call_id"], "call_1");
    assert_eq!(messages[2]["content"], "4");

    let confirmation_events = test.confirmation_events();
    match &confirmation_events[0] {
        ConfirmationEvent::Requested(request) => {
            assert_eq!(request.tool_name, "calculator");
            assert_eq!(request.session_id.as_deref(), Some(SESSION_ID));
            assert_eq!(request.description.as_deref(), Some("Evaluates arithmetic expressions"));
        },
        other => panic!("expected a confirmation request, got {:?}", other),
    }

    let events = test.agent_events();
    assert!(matches!(events.first(), Some(AgentEvent::TurnStarted { .. })));
    assert!(matches!(events.last(), Some(AgentEvent::EndTurn(_))));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, AgentEvent::Update(UpdateEvent::ToolCallFinished { .. })))
    );
}

#[tokio::test]
async fn test_confirmation_timeout_denies_tool() {
    let _ = tracing_subscriber::fmt::try_init();

    let fs = MockMcpServer::new().with_tool("deleteFile", "Deletes a file");

    let mut test = TestCase::builder()
        .test_name("confirmation timeout")
        .with_server("fs", fs.clone())
        .with_confirmation(ConfirmationMode::Event, Duration::from_millis(50))
        .with_responses([
            tool_call_response("call_1", "deleteFile", json!({ "path": "/tmp/a" })),
            text_response("I was not allowed to delete the file."),
        ])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("delete /tmp/a").await.unwrap();

    assert_eq!(summary.tool_calls[0].result, ToolCallResult::Denied { timed_out: true });
    assert!(fs.calls().is_empty(), "a timed out tool must not run");

    let events = test.confirmation_events();
    assert_eq!(events.len(), 2, "{:?}", events);
    let ConfirmationEvent::Requested(request) = &events[0] else {
        panic!("expected a request first, got {:?}", events[0]);
    };
    let ConfirmationEvent::Response(response) = &events[1] else {
        panic!("expected a synthetic denial, got {:?}", events[1]);
    };
    assert_eq!(response.execution_id, request.execution_id);
    assert!(!response.approved);
    assert_eq!(response.reason.as_deref(), Some(TIMEOUT_REASON));

    let requests = test.requests();
    assert_eq!(tool_message(&requests[1].messages)["content"], TOOL_CONFIRMATION_TIMEOUT_MESSAGE);
}

#[tokio::test]
async fn test_configured_allowed_tools_skip_confirmation() {
    let _ = tracing_subscriber::fmt::try_init();

    let fs = MockMcpServer::new().with_tool("fs_read", "Reads a file");

    let mut test = TestCase::builder()
        .test_name("configured allowed tools")
        .with_server("fs", fs.clone())
        .with_settings(AgentSettings {
            confirmation: ConfirmationSettings {
                mode: ConfirmationMode::Event,
                timeout_ms: 50,
                allowed_tools: vec!["fs_*".to_string()],
            },
            ..Default::default()
        })
        .with_responses([
            tool_call_response("call_1", "fs_read", json!({ "path": "/tmp/a" })),
            text_response("Read it."),
        ])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("read /tmp/a").await.unwrap();

    assert!(matches!(summary.tool_calls[0].result, ToolCallResult::Success(_)));
    assert_eq!(fs.calls().len(), 1);
    assert_eq!(test.confirmation_requests(), 0);
    assert!(test.confirmation_events().is_empty());
}

#[tokio::test]
async fn test_remembered_approval_skips_confirmation() {
    let _ = tracing_subscriber::fmt::try_init();

    let fs = MockMcpServer::new().with_tool("deleteFile", "Deletes a file");

    let mut test = TestCase::builder()
        .test_name("remembered approval")
        .with_server("fs", fs.clone())
        .with_responses([
            tool_call_response("call_1", "deleteFile", json!({ "path": "/tmp/a" })),
            text_response("Deleted."),
            tool_call_response("call_2", "deleteFile", json!({ "path": "/tmp/b" })),
            text_response("Deleted again."),
        ])
        .with_tool_use_approvals([Approval::ApproveAndRemember])
        .build()
        .await
        .unwrap();

    let first = test.run_turn("delete /tmp/a").await.unwrap();
    assert!(matches!(first.tool_calls[0].result, ToolCallResult::Success(_)));
    assert_eq!(test.confirmation_requests(), 1);

    let second = test.run_turn("delete /tmp/b").await.unwrap();
    assert!(matches!(second.tool_calls[0].result, ToolCallResult::Success(_)));
    assert_eq!(test.confirmation_requests(), 1, "the second call should not ask again");
    assert_eq!(fs.calls().len(), 2);
}

#[tokio::test]
async fn test_denied_tool_is_reported_to_model() {
    let _ = tracing_subscriber::fmt::try_init();

    let fs = MockMcpServer::new().with_tool("deleteFile", "Deletes a file");

    let mut test = TestCase::builder()
        .test_name("denied tool")
        .with_server("fs", fs.clone())
        .with_confirmation(ConfirmationMode::AutoDeny, Duration::from_secs(1))
        .with_responses([
            tool_call_response("call_1", "deleteFile", json!({ "path": "/" })),
            text_response("Understood."),
        ])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("delete everything").await.unwrap();

    assert_eq!(summary.tool_calls[0].result, ToolCallResult::Denied { timed_out: false });
    assert!(fs.calls().is_empty());
    assert_eq!(test.confirmation_requests(), 0);
    assert_eq!(tool_message(&test.requests()[1].messages)["content"], TOOL_DENIED_MESSAGE);
}

#[tokio::test]
async fn test_data_uri_tool_result_becomes_image() {
    let _ = tracing_subscriber::fmt::try_init();

    let screenshots = MockMcpServer::new()
        .with_tool("screenshot", "Captures the screen")
        .with_tool_result(
            "screenshot",
            CallToolResult::success(vec![Content::text("data:image/png;base64,iVBORw0KGgoAAAANSUhEUg==")]),
        );

    let mut test = TestCase::builder()
        .test_name("data uri tool result")
        .with_server("screen", screenshots)
        .with_confirmation(ConfirmationMode::AutoApprove, Duration::from_secs(1))
        .with_responses([
            tool_call_response("call_1", "screenshot", json!({})),
            text_response("The screen is blank."),
        ])
        .build()
        .await
        .unwrap();

    test.run_turn("what is on my screen?").await.unwrap();

    let history = test.agent().context().get_history().await.unwrap();
    let tool_result = history
        .iter()
        .find(|m| m.role == Role::Tool)
        .expect("tool result should be recorded");
    assert_eq!(tool_result.parts(), vec![ContentPart::image(
        "iVBORw0KGgoAAAANSUhEUg==",
        "image/png"
    )]);
}

#[tokio::test]
async fn test_pdf_attachment_depends_on_model() {
    let pdf = FileInput {
        data: "JVBERi0xLjQK".to_string(),
        mime_type: Some("application/pdf".to_string()),
        filename: Some("report.pdf".to_string()),
    };

    let mut formatted = Vec::new();
    for model in ["gpt-3.5-turbo", "gpt-4o"] {
        let llm_context = LlmContext::new(Provider::OpenAi, model).with_router(Router::InBuilt);
        let context = ContextManager::new(
            "pdf-session",
            llm_context.clone(),
            Arc::new(InMemoryHistoryStore::new()),
            ContextSettings::default(),
        )
        .await
        .unwrap();
        context
            .add_user_message("summarize this", None, Some(pdf.clone()))
            .await
            .unwrap();
        let prompt = context.get_formatted_messages(&llm_context).await.unwrap();

        // The stored history keeps the attachment either way.
        let history = context.get_history().await.unwrap();
        assert!(
            history[0]
                .parts()
                .iter()
                .any(|p| matches!(p, ContentPart::File { .. }))
        );
        formatted.push(prompt.messages);
    }

    let stripped = &formatted[0][0]["content"];
    assert_eq!(stripped[0], json!({ "type": "text", "text": "summarize this" }));
    assert_eq!(stripped[1], json!({ "type": "text", "text": file_placeholder("gpt-3.5-turbo") }));

    let kept = &formatted[1][0]["content"];
    assert_eq!(kept[1]["type"], "file");
    assert_eq!(kept[1]["file"]["filename"], "report.pdf");
}

#[tokio::test]
async fn test_colliding_tools_are_routed_by_server() {
    let _ = tracing_subscriber::fmt::try_init();

    let docs = MockMcpServer::new().with_tool("search", "Searches the docs");
    let web = MockMcpServer::new().with_tool("search", "Searches the web");

    let mut test = TestCase::builder()
        .test_name("tool collision")
        .with_server("docs", docs.clone())
        .with_server("web", web.clone())
        .with_confirmation(ConfirmationMode::AutoApprove, Duration::from_secs(1))
        .with_responses([
            tool_call_response("call_1", "web--search", json!({ "query": "rust" })),
            text_response("Found it."),
        ])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("search the web for rust").await.unwrap();
    assert!(matches!(summary.tool_calls[0].result, ToolCallResult::Success(_)));

    // The first server keeps the plain name.
    let offered: Vec<_> = test.requests()[0]
        .tools
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["function"]["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(offered, vec!["search".to_string(), "web--search".to_string()]);

    assert!(docs.calls().is_empty());
    assert_eq!(web.calls().len(), 1);
    assert_eq!(web.calls()[0].0, "search", "the server sees its own tool name");
}

#[tokio::test]
async fn test_failed_server_does_not_block_others() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut test = TestCase::builder()
        .test_name("failed server isolation")
        .with_server("good", MockMcpServer::new().with_tool("echo", "Echoes its input"))
        .with_server("broken", MockMcpServer::new().failing("no such binary"))
        .with_confirmation(ConfirmationMode::AutoApprove, Duration::from_secs(1))
        .with_responses([text_response("hello")])
        .build()
        .await
        .unwrap();

    assert!(matches!(test.connect_outcome("good"), Some(ConnectOutcome::Connected(_))));
    assert!(matches!(test.connect_outcome("broken"), Some(ConnectOutcome::Failed(_))));

    let summary = test.run_turn("hi").await.unwrap();
    assert_eq!(summary.stop_reason, AgentStopReason::EndTurn);

    let tools = test.requests()[0].tools.clone();
    assert_eq!(tools.as_array().map(Vec::len), Some(1));
    assert_eq!(tools[0]["function"]["name"], "echo");
}

#[tokio::test]
async fn test_unknown_tool_error_is_fed_back() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut test = TestCase::builder()
        .test_name("unknown tool")
        .with_server("good", MockMcpServer::new().with_tool("echo", "Echoes its input"))
        .with_confirmation(ConfirmationMode::AutoApprove, Duration::from_secs(1))
        .with_responses([
            tool_call_response("call_1", "teleport", json!({})),
            text_response("That tool does not exist."),
        ])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("teleport me").await.unwrap();

    assert_eq!(summary.stop_reason, AgentStopReason::EndTurn);
    match &summary.tool_calls[0].result {
        ToolCallResult::Error { kind, .. } => assert_eq!(*kind, ErrorKind::NotFound),
        other => panic!("expected an error result, got {:?}", other),
    }
    let content = tool_message(&test.requests()[1].messages)["content"].clone();
    assert!(content.as_str().unwrap().starts_with("Tool execution failed"), "{}", content);
}

#[tokio::test]
async fn test_cancelled_turn_appends_nothing_more() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut test = TestCase::builder()
        .test_name("cancelled turn")
        .with_response(MockResponse::from(text_response("too late")).with_delay(Duration::from_secs(2)))
        .build()
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    });

    let summary = test.run_turn_with_cancel("slow question", cancel).await.unwrap();

    assert_eq!(summary.stop_reason, AgentStopReason::Cancelled);
    let history = test.agent().context().get_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn test_cancel_between_tool_calls_keeps_next_turn_valid() {
    let _ = tracing_subscriber::fmt::try_init();

    let fs = MockMcpServer::new()
        .with_tool("readFile", "Reads a file")
        .with_tool("deleteFile", "Deletes a file");

    let mut test = TestCase::builder()
        .test_name("cancel between tool calls")
        .with_server("fs", fs.clone())
        .with_confirmation(ConfirmationMode::Event, Duration::from_secs(4))
        .with_responses([
            json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [
                            {
                                "id": "call_a",
                                "type": "function",
                                "function": { "name": "readFile", "arguments": "{\"path\":\"/tmp/a\"}" }
                            },
                            {
                                "id": "call_b",
                                "type": "function",
                                "function": { "name": "deleteFile", "arguments": "{\"path\":\"/tmp/a\"}" }
                            }
                        ]
                    }
                }]
            }),
            text_response("Stopped as requested."),
        ])
        .with_tool_use_approvals([Approval::Approve, Approval::Ignore])
        .build()
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        }
    });

    let summary = test.run_turn_with_cancel("read then delete /tmp/a", cancel).await.unwrap();
    assert_eq!(summary.stop_reason, AgentStopReason::Cancelled);
    assert_eq!(summary.tool_calls.len(), 2);
    assert_eq!(summary.tool_calls[1].result, ToolCallResult::Cancelled);
    assert_eq!(fs.calls().len(), 1, "only the approved call runs");

    let summary = test.run_turn("never mind").await.unwrap();
    assert_eq!(summary.stop_reason, AgentStopReason::EndTurn);

    // Every tool call in the follow-up request is answered before the next user message.
    let requests = test.requests();
    assert_eq!(requests.len(), 2);
    let messages = &requests[1].messages;
    let roles: Vec<_> = messages.iter().map(|m| m["role"].as_str().unwrap_or_default()).collect();
    assert_eq!(roles, ["user", "assistant", "tool", "tool", "user"]);
    assert_eq!(messages[2]["tool_call_id"], "call_a");
    assert_eq!(messages[3]["tool_call_id"], "call_b");
    assert_eq!(messages[3]["content"], TOOL_INTERRUPTED_MESSAGE);
}

#[tokio::test]
async fn test_max_iterations_ends_turn() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut test = TestCase::builder()
        .test_name("max iterations")
        .with_server("good", MockMcpServer::new().with_tool("echo", "Echoes its input"))
        .with_settings(AgentSettings {
            max_iterations: 2,
            ..Default::default()
        })
        .with_confirmation(ConfirmationMode::AutoApprove, Duration::from_secs(1))
        .with_responses([
            tool_call_response("call_1", "echo", json!({ "n": 1 })),
            tool_call_response("call_2", "echo", json!({ "n": 2 })),
        ])
        .build()
        .await
        .unwrap();

    let summary = test.run_turn("loop forever").await.unwrap();

    assert_eq!(summary.stop_reason, AgentStopReason::MaxIterations);
    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.tool_calls.len(), 2);
    assert_eq!(test.requests().len(), 2);

    // Every call has its result recorded, so the next turn can still be formatted.
    let history = test.agent().context().get_history().await.unwrap();
    assert_eq!(history.iter().filter(|m| m.role == Role::Tool).count(), 2);
}
