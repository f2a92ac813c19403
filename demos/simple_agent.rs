//! Minimal embedding of the agent runtime: two local tools, an optional
//! external tool server, and an interactive prompt.
//!
//! Point it at any OpenAI-compatible endpoint:
//!
//! ```text
//! AGENT_BASE_URL=http://localhost:8000/api/v1 cargo run --example simple_agent
//! ```
//!
//! Set `AGENT_TOOL_SERVER` to a command line (e.g. `uvx some-mcp-server`) to
//! attach an external tool server as well.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use agentry::{Agent, AgentConfig, ServerLaunchConfig, ToolInfo, ToolParamType, ToolParameter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = AgentConfig::default();
    if let Ok(base_url) = std::env::var("AGENT_BASE_URL") {
        config.base_url = base_url;
    }
    if let Ok(model_id) = std::env::var("AGENT_MODEL") {
        config.model_id = model_id;
    }

    let mut agent = Agent::new(config)?.with_domain_prompt(
        "You are a helpful assistant. Use the available tools whenever real data is needed.",
    );

    agent.register_tool(
        ToolInfo::new("echo_text", "Echo the provided text back")
            .with_parameters(vec![ToolParameter::new("text", ToolParamType::String)])
            .with_sync_callback(|args| {
                let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
                Ok(json!({ "status": "success", "echo": text }))
            }),
    )?;

    agent.register_tool(
        ToolInfo::new("add", "Add two integers")
            .with_parameters(vec![
                ToolParameter::new("a", ToolParamType::Integer),
                ToolParameter::new("b", ToolParamType::Integer),
            ])
            .with_sync_callback(|args| {
                let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
                let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
                Ok(json!({ "sum": a + b }))
            }),
    )?;

    if let Ok(server_command) = std::env::var("AGENT_TOOL_SERVER") {
        let mut parts = server_command.split_whitespace();
        if let Some(command) = parts.next() {
            let launch =
                ServerLaunchConfig::new(command).with_args(parts.map(str::to_string));
            match agent.connect_remote_server("tools", launch).await {
                Ok(count) => println!("Attached tool server with {count} tools"),
                Err(err) => eprintln!("Failed to attach tool server: {err}"),
            }
        }
    }

    println!("Type a request, or 'exit' to quit.");
    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if query == "exit" {
            break;
        }
        let outcome = agent.process_query(query, None).await;
        println!("({} of {} steps)", outcome.steps_taken, outcome.steps_limit);
    }

    agent.disconnect_all().await;
    Ok(())
}
