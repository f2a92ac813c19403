//! Progress events emitted by the agent loop.
//!
//! The loop narrates what it is doing through an [`EventSink`]; sinks render
//! or discard events but never influence execution.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

/// Events emitted while a query is processed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    ProcessingStart {
        query: String,
        steps_limit: usize,
        model_id: String,
    },
    StepHeader {
        step: usize,
        steps_limit: usize,
    },
    Thought {
        content: String,
    },
    Goal {
        content: String,
    },
    Plan {
        plan: Value,
    },
    ToolUsage {
        name: String,
    },
    ToolArgs {
        args: Value,
    },
    ToolResult {
        result: Value,
    },
    ToolComplete,
    Error {
        message: String,
    },
    Warning {
        message: String,
    },
    Info {
        message: String,
    },
    ProgressStart {
        message: String,
    },
    ProgressStop,
    FinalAnswer {
        answer: String,
    },
    Completion {
        steps_taken: usize,
        steps_limit: usize,
    },
}

impl AgentEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProcessingStart { .. } => "processing_start",
            Self::StepHeader { .. } => "step_header",
            Self::Thought { .. } => "thought",
            Self::Goal { .. } => "goal",
            Self::Plan { .. } => "plan",
            Self::ToolUsage { .. } => "tool_usage",
            Self::ToolArgs { .. } => "tool_args",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolComplete => "tool_complete",
            Self::Error { .. } => "error",
            Self::Warning { .. } => "warning",
            Self::Info { .. } => "info",
            Self::ProgressStart { .. } => "progress_start",
            Self::ProgressStop => "progress_stop",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Completion { .. } => "completion",
        }
    }
}

/// Receiver for loop progress. Implementations must not contain business
/// logic; the loop is correct regardless of what a sink does.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AgentEvent);
}

/// Discards everything, optionally printing only the final answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink {
    print_final_answer: bool,
}

impl SilentSink {
    pub fn new(print_final_answer: bool) -> Self {
        Self { print_final_answer }
    }
}

impl EventSink for SilentSink {
    fn emit(&self, event: &AgentEvent) {
        if let AgentEvent::FinalAnswer { answer } = event {
            if self.print_final_answer {
                println!("{answer}");
            }
        }
    }
}

/// Plain terminal renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalSink;

impl TerminalSink {
    fn print_json(title: &str, data: &Value) {
        let rendered = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
        println!("{} {rendered}", format!("{title}:").dimmed());
    }
}

impl EventSink for TerminalSink {
    fn emit(&self, event: &AgentEvent) {
        match event {
            AgentEvent::ProcessingStart {
                query,
                steps_limit,
                model_id,
            } => {
                println!("{} {query}", "Processing:".bold());
                println!(
                    "{}",
                    format!("model: {model_id} | max steps: {steps_limit}").dimmed()
                );
            }
            AgentEvent::StepHeader { step, steps_limit } => {
                println!("\n{}", format!("--- Step {step}/{steps_limit} ---").blue().bold());
            }
            AgentEvent::Thought { content } => {
                println!("{} {content}", "Thought:".cyan().bold());
            }
            AgentEvent::Goal { content } => {
                println!("{} {content}", "Goal:".magenta().bold());
            }
            AgentEvent::Plan { plan } => Self::print_json("Plan", plan),
            AgentEvent::ToolUsage { name } => {
                println!("{} {name}", "Tool:".yellow().bold());
            }
            AgentEvent::ToolArgs { args } => Self::print_json("Tool Args", args),
            AgentEvent::ToolResult { result } => Self::print_json("Tool Result", result),
            AgentEvent::ToolComplete => {
                println!("{}", "tool finished".dimmed());
            }
            AgentEvent::Error { message } => {
                eprintln!("{} {message}", "Error:".red().bold());
            }
            AgentEvent::Warning { message } => {
                eprintln!("{} {message}", "Warning:".yellow());
            }
            AgentEvent::Info { message } => {
                println!("{message}");
            }
            AgentEvent::ProgressStart { message } => {
                println!("{}", format!("{message}...").dimmed());
            }
            AgentEvent::ProgressStop => {}
            AgentEvent::FinalAnswer { answer } => {
                println!("\n{}", "Final Answer".green().bold());
                println!("{answer}");
            }
            AgentEvent::Completion {
                steps_taken,
                steps_limit,
            } => {
                println!(
                    "{}",
                    format!("completed in {steps_taken}/{steps_limit} steps").dimmed()
                );
            }
        }
    }
}
