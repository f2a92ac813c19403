use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// One entry of the conversation sent to the chat endpoint.
///
/// Tool-role messages exist only while a query is being processed; before the
/// turn's history is persisted they are rewritten into user-role messages so
/// replaying the conversation never requires `tool_call_id` pairing on the
/// server side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            name: Some(name.into()),
            tool_call_id: None,
        }
    }
}

/// Schema tag for a tool parameter, used when formatting the system prompt
/// and when translating a remote tool's JSON Schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Unknown,
}

impl ToolParamType {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolParamType::String => "string",
            ToolParamType::Integer => "integer",
            ToolParamType::Number => "number",
            ToolParamType::Boolean => "boolean",
            ToolParamType::Array => "array",
            ToolParamType::Object => "object",
            ToolParamType::Unknown => "unknown",
        }
    }

    pub fn from_schema_type(value: &str) -> Self {
        match value {
            "string" => ToolParamType::String,
            "integer" => ToolParamType::Integer,
            "number" => ToolParamType::Number,
            "boolean" => ToolParamType::Boolean,
            "array" => ToolParamType::Array,
            "object" => ToolParamType::Object,
            _ => ToolParamType::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ToolParamType,
    pub required: bool,
    pub description: String,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, kind: ToolParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Error returned by a tool callback. The registry converts it into the
/// `{"status": "error", "error": ...}` shape the agent loop feeds back to the
/// model.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ToolCallError(pub String);

impl From<String> for ToolCallError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ToolCallError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolCallError>> + Send>>;

/// A tool implementation: JSON arguments in, JSON result out.
pub type ToolCallback = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Where a registered tool originally came from when it was imported from a
/// remote tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOrigin {
    pub server: String,
    pub tool: String,
}

/// Descriptor for one registered tool.
///
/// `callback` is absent on freshly translated remote schemas; the agent
/// attaches the dispatching closure when it registers the tool. `atomic` is
/// advisory metadata carried for remote tools; nothing branches on it.
#[derive(Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub callback: Option<ToolCallback>,
    pub atomic: bool,
    pub remote_origin: Option<RemoteOrigin>,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            callback: None,
            atomic: false,
            remote_origin: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<ToolParameter>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_callback<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolCallError>> + Send + 'static,
    {
        self.callback = Some(Arc::new(move |args| Box::pin(callback(args))));
        self
    }

    /// Convenience for tools implemented as plain synchronous closures.
    pub fn with_sync_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Value) -> Result<Value, ToolCallError> + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(move |args| {
            let result = callback(args);
            Box::pin(async move { result })
        }));
        self
    }

    pub fn atomic(mut self) -> Self {
        self.atomic = true;
        self
    }
}

impl fmt::Debug for ToolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolInfo")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("callback", &self.callback.as_ref().map(|_| "<callback>"))
            .field("atomic", &self.atomic)
            .field("remote_origin", &self.remote_origin)
            .finish()
    }
}

/// Structured decision extracted from one raw model reply.
///
/// A well-formed reply carries exactly one of `answer` or `tool_name`;
/// `plan` is advisory display data and is never executed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub thought: String,
    pub goal: String,
    pub answer: Option<String>,
    pub tool_name: Option<String>,
    pub tool_args: Option<Value>,
    pub plan: Option<Value>,
}

impl ParsedResponse {
    pub fn is_final(&self) -> bool {
        self.answer.is_some()
    }

    pub fn is_tool_call(&self) -> bool {
        self.tool_name.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Planning,
    ExecutingPlan,
    ErrorRecovery,
    Completion,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Planning => "PLANNING",
            AgentState::ExecutingPlan => "EXECUTING_PLAN",
            AgentState::ErrorRecovery => "ERROR_RECOVERY",
            AgentState::Completion => "COMPLETION",
        }
    }
}

/// Result of one `process_query` turn.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub result: String,
    pub steps_taken: usize,
    pub steps_limit: usize,
}
