use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use super::Agent;
use crate::application::events::{AgentEvent, EventSink};
use crate::config::AgentConfig;
use crate::domain::types::{Message, MessageRole, ToolInfo, ToolParamType, ToolParameter};
use crate::infrastructure::llm::{ChatBackend, LlmError};

struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    async fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: &[Message],
    ) -> Result<String, LlmError> {
        self.requests.lock().await.push(messages.to_vec());
        self.replies
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::invalid_response("scripted transcript exhausted"))
    }
}

struct FlakyBackend {
    failures_left: Mutex<usize>,
    reply: String,
}

#[async_trait]
impl ChatBackend for FlakyBackend {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: &[Message],
    ) -> Result<String, LlmError> {
        let mut left = self.failures_left.lock().await;
        if *left > 0 {
            *left -= 1;
            return Err(LlmError::invalid_response("scripted failure"));
        }
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: std::sync::Mutex<Vec<&'static str>>,
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &AgentEvent) {
        self.events
            .lock()
            .expect("sink lock")
            .push(event.event_type());
    }
}

fn agent_with(replies: Vec<&str>) -> (Agent, Arc<ScriptedBackend>) {
    let backend = ScriptedBackend::new(replies);
    let agent = Agent::with_backend(AgentConfig::default().silent(), backend.clone());
    (agent, backend)
}

fn echo_tool(calls: Arc<AtomicUsize>) -> ToolInfo {
    ToolInfo::new("echo_text", "Echo the provided text back")
        .with_parameters(vec![ToolParameter::new("text", ToolParamType::String)])
        .with_sync_callback(move |args| {
            calls.fetch_add(1, Ordering::SeqCst);
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(json!({ "status": "success", "echo": text }))
        })
}

#[tokio::test]
async fn plain_chat_answers_in_one_step() {
    let (mut agent, _backend) = agent_with(vec![
        r#"{"thought": "no tools needed", "goal": "reply", "answer": "pong"}"#,
    ]);

    let outcome = agent.process_query("Reply with the single word: pong", None).await;

    assert!(outcome.result.to_lowercase().contains("pong"));
    assert_eq!(outcome.steps_taken, 1);
    assert!(outcome.steps_taken <= outcome.steps_limit);
}

#[tokio::test]
async fn conversational_reply_becomes_the_final_answer() {
    let (mut agent, _backend) = agent_with(vec!["Hi there! How can I help?"]);

    let outcome = agent.process_query("hello", None).await;

    assert_eq!(outcome.result, "Hi there! How can I help?");
    assert_eq!(outcome.steps_taken, 1);
}

#[tokio::test]
async fn single_tool_call_feeds_the_result_back() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (mut agent, backend) = agent_with(vec![
        r#"{"thought": "echo it", "goal": "echo", "tool": "echo_text", "tool_args": {"text": "cpp_integration_marker"}}"#,
        r#"{"thought": "done", "goal": "done", "answer": "Echoed: cpp_integration_marker"}"#,
    ]);
    agent.register_tool(echo_tool(calls.clone())).expect("register");

    let outcome = agent
        .process_query("Please echo the text: cpp_integration_marker", None)
        .await;

    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert!(outcome.result.contains("cpp_integration_marker"));

    // the second request saw the tool result spliced into the conversation
    let requests = backend.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .iter()
        .any(|msg| msg.role == MessageRole::Tool && msg.content.contains("cpp_integration_marker")));
}

#[tokio::test]
async fn arithmetic_tool_produces_the_sum() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let (mut agent, _backend) = agent_with(vec![
        r#"{"thought": "use add", "goal": "compute", "tool": "add", "tool_args": {"a": 6, "b": 7}}"#,
        r#"{"thought": "got it", "goal": "done", "answer": "The sum is 13."}"#,
    ]);
    agent
        .register_tool(
            ToolInfo::new("add", "Add two integers")
                .with_parameters(vec![
                    ToolParameter::new("a", ToolParamType::Integer),
                    ToolParameter::new("b", ToolParamType::Integer),
                ])
                .with_sync_callback(move |args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
                    let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
                    Ok(json!({ "sum": a + b }))
                }),
        )
        .expect("register");

    let outcome = agent.process_query("What is 6 + 7?", None).await;

    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert!(outcome.result.contains("13"));
}

#[tokio::test]
async fn repeated_tool_requests_stop_the_loop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let same_call =
        r#"{"thought": "again", "goal": "spin", "tool": "spin", "tool_args": {}}"#;
    let (mut agent, _backend) =
        agent_with(vec![same_call, same_call, same_call, same_call]);
    agent
        .register_tool(ToolInfo::new("spin", "Do nothing useful").with_sync_callback(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "status": "success" }))
            },
        ))
        .expect("register");

    let outcome = agent.process_query("spin forever", None).await;

    assert!(outcome.result.contains("repeated tool call loop"));
    // the fourth identical request trips the detector before dispatch
    assert!(calls.load(Ordering::SeqCst) < 4);
    assert!(outcome.steps_taken <= outcome.steps_limit);
}

#[tokio::test]
async fn step_limit_bounds_the_loop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (mut agent, _backend) = agent_with(vec![
        r#"{"thought": "step one", "goal": "echo", "tool": "echo_text", "tool_args": {"text": "a"}}"#,
        r#"{"thought": "step two", "goal": "echo", "tool": "echo_text", "tool_args": {"text": "b"}}"#,
    ]);
    agent.register_tool(echo_tool(calls)).expect("register");

    let outcome = agent.process_query("multi-step task", Some(1)).await;

    assert_eq!(outcome.steps_taken, 1);
    assert_eq!(outcome.steps_limit, 1);
    assert!(outcome.result.contains("Reached maximum steps limit (1 steps)"));
}

#[tokio::test]
async fn history_contains_no_tool_messages_after_a_turn() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (mut agent, _backend) = agent_with(vec![
        r#"{"thought": "echo", "goal": "echo", "tool": "echo_text", "tool_args": {"text": "hi"}}"#,
        r#"{"thought": "done", "goal": "done", "answer": "done"}"#,
    ]);
    agent.register_tool(echo_tool(calls)).expect("register");

    agent.process_query("echo hi", None).await;

    assert!(agent
        .history()
        .iter()
        .all(|msg| msg.role != MessageRole::Tool));
    assert!(agent
        .history()
        .iter()
        .any(|msg| msg.role == MessageRole::User
            && msg.content.starts_with("[Result from echo_text]: ")));
}

#[tokio::test]
async fn history_is_trimmed_to_the_configured_ceiling() {
    let backend = ScriptedBackend::new(vec![
        r#"{"thought": "a", "goal": "b", "answer": "first"}"#,
        r#"{"thought": "a", "goal": "b", "answer": "second"}"#,
    ]);
    let mut config = AgentConfig::default().silent();
    config.max_history_messages = 2;
    let mut agent = Agent::with_backend(config, backend);

    agent.process_query("first question", None).await;
    agent.process_query("second question", None).await;

    assert_eq!(agent.history().len(), 2);
    // the newest exchange survives the trim
    assert_eq!(agent.history()[1].content, r#"{"thought": "a", "goal": "b", "answer": "second"}"#);
}

#[tokio::test]
async fn failing_tool_triggers_error_recovery_prompt() {
    let (mut agent, backend) = agent_with(vec![
        r#"{"thought": "try it", "goal": "probe", "tool": "flaky", "tool_args": {}}"#,
        r#"{"thought": "recovering", "goal": "wrap up", "answer": "gave up gracefully"}"#,
    ]);
    agent
        .register_tool(
            ToolInfo::new("flaky", "Always fails")
                .with_sync_callback(|_| Ok(json!({ "status": "error", "error": "boom" }))),
        )
        .expect("register");

    let outcome = agent.process_query("probe the thing", None).await;

    assert_eq!(outcome.result, "gave up gracefully");
    let requests = backend.requests().await;
    assert_eq!(requests.len(), 2);
    let recovery = requests[1]
        .iter()
        .find(|msg| msg.content.contains("TOOL EXECUTION FAILED!"))
        .expect("recovery prompt injected");
    assert_eq!(recovery.role, MessageRole::User);
    assert!(recovery.content.contains("boom"));
    assert!(recovery.content.contains("probe the thing"));
}

#[tokio::test]
async fn llm_failure_is_retried_once() {
    let backend = Arc::new(FlakyBackend {
        failures_left: Mutex::new(1),
        reply: r#"{"thought": "ok", "goal": "ok", "answer": "recovered"}"#.to_string(),
    });
    let mut agent = Agent::with_backend(AgentConfig::default().silent(), backend);

    let outcome = agent.process_query("hello", None).await;

    assert_eq!(outcome.result, "recovered");
    assert_eq!(outcome.steps_taken, 1);
}

#[tokio::test]
async fn persistent_llm_failure_synthesizes_an_answer() {
    let backend = Arc::new(FlakyBackend {
        failures_left: Mutex::new(usize::MAX),
        reply: String::new(),
    });
    let mut agent = Agent::with_backend(AgentConfig::default().silent(), backend);

    let outcome = agent.process_query("hello", None).await;

    assert!(outcome
        .result
        .contains("Unable to complete task due to LLM error"));
    assert!(outcome.steps_taken <= outcome.steps_limit);
}

#[tokio::test]
async fn oversized_tool_results_are_truncated_in_the_live_conversation() {
    let (mut agent, backend) = agent_with(vec![
        r#"{"thought": "fetch", "goal": "fetch", "tool": "firehose", "tool_args": {}}"#,
        r#"{"thought": "done", "goal": "done", "answer": "done"}"#,
    ]);
    agent
        .register_tool(
            ToolInfo::new("firehose", "Returns far too much data")
                .with_sync_callback(|_| Ok(json!({ "payload": "x".repeat(30_000) }))),
        )
        .expect("register");

    agent.process_query("fetch everything", None).await;

    let requests = backend.requests().await;
    let tool_message = requests[1]
        .iter()
        .find(|msg| msg.role == MessageRole::Tool)
        .expect("tool message in conversation");
    assert!(tool_message.content.contains("...[truncated]..."));
    assert!(tool_message.content.chars().count() <= 20_022);
}

#[tokio::test]
async fn prev_placeholder_pulls_fields_from_the_previous_step() {
    let received = Arc::new(std::sync::Mutex::new(Value::Null));
    let seen = received.clone();
    let (mut agent, _backend) = agent_with(vec![
        r#"{"thought": "get token", "goal": "auth", "tool": "issue_token", "tool_args": {}}"#,
        r#"{"thought": "use token", "goal": "auth", "tool": "use_token", "tool_args": {"token": "$PREV.token"}}"#,
        r#"{"thought": "done", "goal": "done", "answer": "done"}"#,
    ]);
    agent
        .register_tool(
            ToolInfo::new("issue_token", "Issue a token")
                .with_sync_callback(|_| Ok(json!({ "token": "secret-123" }))),
        )
        .expect("register");
    agent
        .register_tool(
            ToolInfo::new("use_token", "Consume a token").with_sync_callback(move |args| {
                *seen.lock().expect("lock") = args;
                Ok(json!({ "status": "success" }))
            }),
        )
        .expect("register");

    agent.process_query("authenticate", None).await;

    assert_eq!(received.lock().expect("lock")["token"], "secret-123");
}

#[tokio::test]
async fn unknown_tool_is_reported_as_error_data_and_recovered() {
    let (mut agent, backend) = agent_with(vec![
        r#"{"thought": "call it", "goal": "go", "tool": "no_such_tool", "tool_args": {}}"#,
        r#"{"thought": "fine", "goal": "done", "answer": "switched approach"}"#,
    ]);

    let outcome = agent.process_query("do the thing", None).await;

    assert_eq!(outcome.result, "switched approach");
    let requests = backend.requests().await;
    assert!(requests[1]
        .iter()
        .any(|msg| msg.content.contains("not found")));
}

#[tokio::test]
async fn events_bracket_the_run_in_order() {
    let sink = Arc::new(RecordingSink::default());
    let backend = ScriptedBackend::new(vec![
        r#"{"thought": "t", "goal": "g", "plan": [{"tool": "echo_text", "tool_args": {}}], "tool": "echo_text", "tool_args": {"text": "hi"}}"#,
        r#"{"thought": "t", "goal": "g", "answer": "bye"}"#,
    ]);
    let mut agent = Agent::with_backend(AgentConfig::default().silent(), backend);
    agent.set_event_sink(sink.clone());
    agent
        .register_tool(echo_tool(Arc::new(AtomicUsize::new(0))))
        .expect("register");

    agent.process_query("echo hi", None).await;

    let events = sink.events.lock().expect("lock").clone();
    assert_eq!(events.first(), Some(&"processing_start"));
    assert_eq!(events.last(), Some(&"completion"));
    for expected in [
        "step_header",
        "thought",
        "goal",
        "plan",
        "tool_usage",
        "tool_args",
        "tool_result",
        "tool_complete",
        "final_answer",
    ] {
        assert!(events.contains(&expected), "missing event {expected}");
    }
    let plan_pos = events.iter().position(|e| *e == "plan").expect("plan");
    let usage_pos = events
        .iter()
        .position(|e| *e == "tool_usage")
        .expect("tool_usage");
    assert!(plan_pos < usage_pos);
}

#[tokio::test]
async fn registering_a_tool_invalidates_the_cached_prompt() {
    let (mut agent, _backend) = agent_with(vec![]);
    let before = agent.system_prompt();
    assert!(!before.contains("late_tool"));

    agent
        .register_tool(ToolInfo::new("late_tool", "Registered after first compose"))
        .expect("register");

    assert!(agent.system_prompt().contains("late_tool"));
}
