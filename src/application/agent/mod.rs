//! The agent execution loop.
//!
//! An [`Agent`] owns its tool registry, its conversation history, and a map
//! of remote tool clients. `process_query` drives the
//! PLANNING -> EXECUTING_PLAN -> ERROR_RECOVERY -> COMPLETION state machine:
//! call the model, parse the reply, dispatch at most one tool, splice the
//! result back into the conversation, repeat until an answer or a bound is
//! hit. Unrecoverable failures become synthesized final answers, never
//! errors surfaced to the caller.

mod errors;
mod parser;
mod prompt;
#[cfg(test)]
mod tests;

pub use errors::AgentError;
pub use parser::parse_llm_response;
pub use prompt::{compose_system_prompt, RESPONSE_FORMAT_TEMPLATE};

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::events::{AgentEvent, EventSink, SilentSink, TerminalSink};
use super::registry::{RegistryError, ToolRegistry};
use super::tooling::RemoteToolClient;
use crate::config::{AgentConfig, ServerLaunchConfig};
use crate::domain::types::{
    AgentState, Message, MessageRole, QueryOutcome, ToolCallError, ToolInfo,
};
use crate::infrastructure::llm::{ChatBackend, HttpChatClient, LlmError};

const TOOL_RESULT_MAX_CHARS: usize = 20_000;
const TOOL_RESULT_HEAD_CHARS: usize = 10_000;
const TOOL_RESULT_TAIL_CHARS: usize = 5_000;
const TRUNCATION_MARKER: &str = "\n...[truncated]...\n";

const LOOP_STOP_ANSWER: &str = "Task stopped due to repeated tool call loop.";

static STEP_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$STEP_(\d+)\.(.+)$").expect("step placeholder pattern"));

pub struct Agent {
    config: AgentConfig,
    registry: ToolRegistry,
    backend: Arc<dyn ChatBackend>,
    sink: Arc<dyn EventSink>,
    domain_prompt: String,
    history: Vec<Message>,
    clients: HashMap<String, Arc<Mutex<RemoteToolClient>>>,
    cached_system_prompt: Option<String>,
}

impl Agent {
    /// Agent talking to the HTTP endpoint named in the config.
    pub fn new(config: AgentConfig) -> Result<Self, LlmError> {
        let backend = Arc::new(HttpChatClient::new(&config.base_url, &config.model_id)?);
        Ok(Self::with_backend(config, backend))
    }

    /// Agent over an arbitrary chat backend (tests script this).
    pub fn with_backend(config: AgentConfig, backend: Arc<dyn ChatBackend>) -> Self {
        let sink: Arc<dyn EventSink> = if config.silent_mode {
            Arc::new(SilentSink::default())
        } else {
            Arc::new(TerminalSink)
        };
        Self {
            config,
            registry: ToolRegistry::new(),
            backend,
            sink,
            domain_prompt: String::new(),
            history: Vec::new(),
            clients: HashMap::new(),
            cached_system_prompt: None,
        }
    }

    /// Domain-specific preamble prepended to the composed system prompt.
    pub fn with_domain_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.domain_prompt = prompt.into();
        self.cached_system_prompt = None;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sink = sink;
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Conversation history persisted between queries.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn register_tool(&mut self, info: ToolInfo) -> Result<(), AgentError> {
        self.registry.register(info)?;
        self.cached_system_prompt = None;
        Ok(())
    }

    /// The composed system prompt, rebuilt lazily after tool changes.
    pub fn system_prompt(&mut self) -> String {
        if let Some(cached) = &self.cached_system_prompt {
            return cached.clone();
        }
        let composed = compose_system_prompt(&self.domain_prompt, &self.registry);
        self.cached_system_prompt = Some(composed.clone());
        composed
    }

    pub fn rebuild_system_prompt(&mut self) {
        self.cached_system_prompt = None;
    }

    /// Launch a tool server, run the handshake, and register its tools.
    ///
    /// Each registered tool dispatches through the shared client; if the
    /// transport fails mid-call the dispatcher reconnects once and retries
    /// the call once. Returns the number of tools registered.
    pub async fn connect_remote_server(
        &mut self,
        name: &str,
        config: ServerLaunchConfig,
    ) -> Result<usize, AgentError> {
        let mut client = RemoteToolClient::new(name, config);
        client.connect().await?;
        let schemas = client.list_tools(false).await?;
        let client = Arc::new(Mutex::new(client));

        let mut registered = 0usize;
        for schema in &schemas {
            let mut info = schema.to_tool_info(name);
            let dispatch_client = Arc::clone(&client);
            let original_name = schema.name.clone();
            info.callback = Some(Arc::new(move |args: Value| {
                let client = Arc::clone(&dispatch_client);
                let tool = original_name.clone();
                Box::pin(async move { dispatch_remote_call(client, tool, args).await })
            }));

            match self.registry.register(info) {
                Ok(()) => registered += 1,
                Err(RegistryError::DuplicateTool { name: duplicate }) => {
                    debug!(tool = %duplicate, "tool already registered, skipping");
                }
            }
        }

        self.clients.insert(name.to_string(), client);
        self.cached_system_prompt = None;
        info!(server = %name, tools = registered, "remote server attached");
        self.sink.emit(&AgentEvent::Info {
            message: format!("Connected to tool server '{name}' with {registered} tools"),
        });
        Ok(registered)
    }

    /// Stop one tool server and drop the tools it contributed.
    pub async fn disconnect_remote_server(&mut self, name: &str) {
        if let Some(client) = self.clients.remove(name) {
            client.lock().await.disconnect().await;
        }

        let stale: Vec<String> = self
            .registry
            .iter()
            .filter(|tool| {
                tool.remote_origin
                    .as_ref()
                    .is_some_and(|origin| origin.server == name)
            })
            .map(|tool| tool.name.clone())
            .collect();
        if !stale.is_empty() {
            for tool in &stale {
                self.registry.remove(tool);
            }
            self.cached_system_prompt = None;
        }
    }

    /// Stop every attached tool server. Children are also reaped if the
    /// agent is simply dropped, but this gives them a graceful exit.
    pub async fn disconnect_all(&mut self) {
        let names: Vec<String> = self.clients.keys().cloned().collect();
        for name in names {
            self.disconnect_remote_server(&name).await;
        }
    }

    /// Drive the loop for one user query. At most `max_steps` iterations
    /// (the config default when `None`); always produces an outcome.
    pub async fn process_query(
        &mut self,
        user_input: &str,
        max_steps: Option<usize>,
    ) -> QueryOutcome {
        let steps_limit = match max_steps {
            Some(limit) if limit > 0 => limit,
            _ => self.config.max_steps,
        };

        let mut state = AgentState::Planning;
        let mut messages = self.history.clone();
        messages.push(Message::user(user_input));

        self.sink.emit(&AgentEvent::ProcessingStart {
            query: user_input.to_string(),
            steps_limit,
            model_id: self.config.model_id.clone(),
        });

        let system_prompt = self.system_prompt();

        let mut steps_taken = 0usize;
        let mut final_answer: Option<String> = None;
        let mut last_error = String::new();
        let mut step_results: Vec<Value> = Vec::new();
        let mut tool_call_history: Vec<(String, Value)> = Vec::new();

        while steps_taken < steps_limit && final_answer.is_none() {
            steps_taken += 1;
            self.sink.emit(&AgentEvent::StepHeader {
                step: steps_taken,
                steps_limit,
            });

            if state == AgentState::ErrorRecovery {
                self.sink.emit(&AgentEvent::Info {
                    message: "ERROR RECOVERY: handling previous error".to_string(),
                });
                messages.push(Message::user(recovery_prompt(&last_error, user_input)));
                state = AgentState::Planning;
                step_results.clear();
            }

            self.sink.emit(&AgentEvent::ProgressStart {
                message: "Thinking".to_string(),
            });
            let response = match self.backend.complete(&system_prompt, &messages).await {
                Ok(reply) => reply,
                Err(err) => {
                    self.sink.emit(&AgentEvent::ProgressStop);
                    self.sink.emit(&AgentEvent::Warning {
                        message: format!("LLM call failed, retrying: {err}"),
                    });
                    self.sink.emit(&AgentEvent::ProgressStart {
                        message: "Retrying".to_string(),
                    });
                    match self.backend.complete(&system_prompt, &messages).await {
                        Ok(reply) => reply,
                        Err(err) => {
                            self.sink.emit(&AgentEvent::ProgressStop);
                            self.sink.emit(&AgentEvent::Error {
                                message: format!("LLM error: {err}"),
                            });
                            final_answer =
                                Some(format!("Unable to complete task due to LLM error: {err}"));
                            break;
                        }
                    }
                }
            };
            self.sink.emit(&AgentEvent::ProgressStop);

            if self.config.debug {
                self.sink.emit(&AgentEvent::Info {
                    message: format!("LLM response: {response}"),
                });
            }

            messages.push(Message::assistant(response.clone()));

            let parsed = parse_llm_response(&response);

            if !parsed.thought.is_empty() {
                self.sink.emit(&AgentEvent::Thought {
                    content: parsed.thought.clone(),
                });
            }
            if !parsed.goal.is_empty() {
                self.sink.emit(&AgentEvent::Goal {
                    content: parsed.goal.clone(),
                });
            }
            // advisory only: the plan is shown, never executed
            if let Some(plan) = &parsed.plan {
                if plan.is_array() {
                    self.sink.emit(&AgentEvent::Plan { plan: plan.clone() });
                }
            }

            if let Some(answer) = parsed.answer {
                self.sink.emit(&AgentEvent::FinalAnswer {
                    answer: answer.clone(),
                });
                final_answer = Some(answer);
                break;
            }

            if let Some(tool_name) = parsed.tool_name {
                let tool_args = parsed.tool_args.unwrap_or_else(|| json!({}));

                tool_call_history.push((tool_name.clone(), tool_args.clone()));
                let window = self.config.max_consecutive_repeats;
                if window > 0 && tool_call_history.len() >= window {
                    let tail = &tool_call_history[tool_call_history.len() - window..];
                    if tail.iter().all(|(name, _)| *name == tool_name) {
                        self.sink.emit(&AgentEvent::Warning {
                            message: "Detected repeated tool call loop. Breaking out.".to_string(),
                        });
                        final_answer = Some(LOOP_STOP_ANSWER.to_string());
                        break;
                    }
                }

                self.sink.emit(&AgentEvent::ToolUsage {
                    name: tool_name.clone(),
                });
                self.sink.emit(&AgentEvent::ToolArgs {
                    args: tool_args.clone(),
                });
                self.sink.emit(&AgentEvent::ProgressStart {
                    message: format!("Executing {tool_name}"),
                });

                let resolved_args = resolve_step_placeholders(&tool_args, &step_results);
                let tool_result = self.registry.execute(&tool_name, resolved_args).await;

                self.sink.emit(&AgentEvent::ProgressStop);
                self.sink.emit(&AgentEvent::ToolComplete);
                self.sink.emit(&AgentEvent::ToolResult {
                    result: tool_result.clone(),
                });

                step_results.push(tool_result.clone());
                messages.push(Message::tool(
                    tool_name.clone(),
                    truncate_middle(tool_result.to_string()),
                ));

                let failed =
                    tool_result.get("status").and_then(Value::as_str) == Some("error");
                if failed {
                    last_error = tool_result
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("Unknown error")
                        .to_string();
                    state = AgentState::ErrorRecovery;
                } else {
                    state = AgentState::ExecutingPlan;
                }
                continue;
            }

            // neither a tool call nor an answer: the reply is conversational
            self.sink.emit(&AgentEvent::FinalAnswer {
                answer: response.clone(),
            });
            final_answer = Some(response);
        }

        let result = final_answer.unwrap_or_else(|| {
            let message = format!("Reached maximum steps limit ({steps_limit} steps).");
            self.sink.emit(&AgentEvent::Warning {
                message: message.clone(),
            });
            message
        });

        self.sink.emit(&AgentEvent::Completion {
            steps_taken,
            steps_limit,
        });

        // Persist the turn: tool messages become user messages so replays
        // never need tool_call pairing, then the oldest entries are trimmed.
        for message in &mut messages {
            if message.role == MessageRole::Tool {
                let tool_name = message.name.take().unwrap_or_else(|| "tool".to_string());
                message.role = MessageRole::User;
                message.content = format!("[Result from {tool_name}]: {}", message.content);
                message.tool_call_id = None;
            }
        }
        let cap = self.config.max_history_messages;
        if cap > 0 && messages.len() > cap {
            messages.drain(..messages.len() - cap);
        }
        self.history = messages;

        QueryOutcome {
            result,
            steps_taken,
            steps_limit,
        }
    }
}

/// Dispatch one call through a shared remote client, reconnecting once on
/// transport failure and retrying the call once.
async fn dispatch_remote_call(
    client: Arc<Mutex<RemoteToolClient>>,
    tool: String,
    args: Value,
) -> Result<Value, ToolCallError> {
    let mut guard = client.lock().await;

    if guard.is_connected() {
        match guard.call_tool(&tool, args.clone()).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                warn!(tool = %tool, %err, "remote tool call failed, attempting reconnect");
            }
        }
    } else {
        warn!(
            server = guard.name(),
            tool = %tool,
            "tool server disconnected, attempting reconnect"
        );
    }

    if let Err(err) = guard.reconnect().await {
        return Err(ToolCallError(format!(
            "tool server disconnected and reconnect failed: {err}"
        )));
    }
    match guard.call_tool(&tool, args).await {
        Ok(result) => Ok(result),
        Err(err) => Err(ToolCallError(format!(
            "remote tool call failed after reconnect: {err}"
        ))),
    }
}

fn recovery_prompt(last_error: &str, original_task: &str) -> String {
    format!(
        "TOOL EXECUTION FAILED!\n\n\
         Error: {last_error}\n\n\
         Original task: {original_task}\n\n\
         Please analyze the error and try an alternative approach.\n\
         Respond with {{\"thought\": \"...\", \"goal\": \"...\", \"tool\": \"...\", \"tool_args\": {{...}}}}"
    )
}

/// Keep oversized tool results from flooding the context: first 10k chars,
/// a marker, last 5k chars. The sink has already seen the full result.
fn truncate_middle(rendered: String) -> String {
    let total = rendered.chars().count();
    if total <= TOOL_RESULT_MAX_CHARS {
        return rendered;
    }
    let head: String = rendered.chars().take(TOOL_RESULT_HEAD_CHARS).collect();
    let tail: String = rendered
        .chars()
        .skip(total - TOOL_RESULT_TAIL_CHARS)
        .collect();
    format!("{head}{TRUNCATION_MARKER}{tail}")
}

/// Substitute `$PREV.<field>` and `$STEP_<k>.<field>` string values with
/// fields captured from earlier step results. Only used when a model
/// explicitly emits such tokens.
fn resolve_step_placeholders(args: &Value, step_results: &[Value]) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    (key.clone(), resolve_step_placeholders(value, step_results))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_step_placeholders(item, step_results))
                .collect(),
        ),
        Value::String(text) => {
            if let Some(field) = text.strip_prefix("$PREV.") {
                if let Some(value) = step_results.last().and_then(|prev| prev.get(field)) {
                    return value.clone();
                }
            }
            if let Some(captures) = STEP_PLACEHOLDER.captures(text) {
                if let Ok(index) = captures[1].parse::<usize>() {
                    if let Some(value) = step_results
                        .get(index)
                        .and_then(|step| step.get(&captures[2]))
                    {
                        return value.clone();
                    }
                }
            }
            args.clone()
        }
        _ => args.clone(),
    }
}
