//! Core runtime for tool-using LLM agents.
//!
//! Drives a conversational loop against an OpenAI-compatible chat endpoint:
//! the model's free-form replies are parsed into structured decisions, named
//! tools are dispatched (in-process callbacks or external processes speaking
//! newline-framed JSON-RPC 2.0), and malformed output or failing tools are
//! recovered from instead of aborting the conversation. Embed an [`Agent`]
//! and supply a domain prompt plus tool registrations to build a concrete
//! assistant.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::agent::{
    compose_system_prompt, parse_llm_response, Agent, AgentError, RESPONSE_FORMAT_TEMPLATE,
};
pub use application::events::{AgentEvent, EventSink, SilentSink, TerminalSink};
pub use application::registry::{RegistryError, ToolRegistry};
pub use application::tooling::{
    RemoteToolClient, RemoteToolError, RemoteToolSchema, StdioTransport, TransportError,
};
pub use config::{AgentConfig, ServerLaunchConfig};
pub use domain::types::{
    AgentState, Message, MessageRole, ParsedResponse, QueryOutcome, RemoteOrigin, ToolCallError,
    ToolCallback, ToolFuture, ToolInfo, ToolParamType, ToolParameter,
};
pub use infrastructure::llm::{ChatBackend, HttpChatClient, LlmError};
