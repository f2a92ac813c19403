//! Tool namespace shared by local callbacks and remote tool servers.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::types::ToolInfo;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {name}")]
    DuplicateTool { name: String },
}

/// Holds tool descriptors and dispatches calls to their callbacks.
///
/// Tools are kept in a sorted map so the prompt listing is stable across
/// calls within a process.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolInfo>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: ToolInfo) -> Result<(), RegistryError> {
        if self.tools.contains_key(&info.name) {
            return Err(RegistryError::DuplicateTool { name: info.name });
        }
        self.tools.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&ToolInfo> {
        self.tools.get(name)
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn clear(&mut self) {
        self.tools.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolInfo> {
        self.tools.values()
    }

    /// Resolve a name the model got slightly wrong to a registered one.
    ///
    /// Models frequently drop the `mcp_<server>_` prefix (`Shell` instead of
    /// `mcp_windows_Shell`), so a case-insensitive suffix match is tried
    /// first, then an exact case-insensitive match. Only a unique match is
    /// accepted; anything ambiguous resolves to nothing and surfaces as a
    /// tool-not-found error upstream.
    pub fn resolve(&self, name: &str) -> Option<String> {
        let query = name.to_lowercase();
        let suffix = format!("_{query}");

        let suffix_matches: Vec<&String> = self
            .tools
            .keys()
            .filter(|registered| registered.to_lowercase().ends_with(&suffix))
            .collect();
        if let [only] = suffix_matches.as_slice() {
            return Some((*only).clone());
        }

        let exact_matches: Vec<&String> = self
            .tools
            .keys()
            .filter(|registered| registered.to_lowercase() == query)
            .collect();
        if let [only] = exact_matches.as_slice() {
            return Some((*only).clone());
        }

        None
    }

    /// One line per tool: `- name(p1: t1, p2?: t2): description`.
    pub fn format_for_prompt(&self) -> String {
        let mut listing = String::new();
        for tool in self.tools.values() {
            listing.push_str("- ");
            listing.push_str(&tool.name);
            listing.push('(');
            for (index, param) in tool.parameters.iter().enumerate() {
                if index > 0 {
                    listing.push_str(", ");
                }
                listing.push_str(&param.name);
                if !param.required {
                    listing.push('?');
                }
                listing.push_str(": ");
                listing.push_str(param.kind.as_str());
            }
            listing.push_str("): ");
            listing.push_str(&tool.description);
            listing.push('\n');
        }
        listing
    }

    /// Execute a tool by name, resolving near-miss names first.
    ///
    /// Never fails: unknown tools, missing callbacks and callback errors all
    /// come back as `{"status": "error", "error": ...}` so the loop can feed
    /// the failure to the model.
    pub async fn execute(&self, name: &str, args: Value) -> Value {
        let tool = match self.find(name) {
            Some(tool) => Some(tool),
            None => self.resolve(name).and_then(|resolved| self.find(&resolved)),
        };

        let Some(tool) = tool else {
            warn!(tool = %name, "unknown tool requested");
            return error_result(format!("Tool '{name}' not found"));
        };

        let Some(callback) = tool.callback.as_ref() else {
            warn!(tool = %tool.name, "tool has no callback");
            return error_result(format!("Tool '{}' has no callback", tool.name));
        };

        match callback(args).await {
            Ok(result) => {
                info!(tool = %tool.name, "tool executed");
                result
            }
            Err(err) => {
                warn!(tool = %tool.name, %err, "tool execution failed");
                error_result(format!("Tool execution failed: {err}"))
            }
        }
    }
}

fn error_result(message: impl Into<String>) -> Value {
    json!({ "status": "error", "error": message.into() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ToolParamType, ToolParameter};

    fn echo_tool(name: &str) -> ToolInfo {
        ToolInfo::new(name, "Echo the input back")
            .with_parameters(vec![ToolParameter::new("text", ToolParamType::String)])
            .with_sync_callback(|args| Ok(json!({ "echo": args })))
    }

    #[test]
    fn duplicate_registration_fails_and_size_is_unchanged() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("echo")).expect("first insert");
        let err = registry.register(echo_tool("echo")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTool { name } if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolve_matches_unprefixed_remote_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register(echo_tool("mcp_windows_Shell"))
            .expect("register");
        assert_eq!(
            registry.resolve("Shell").as_deref(),
            Some("mcp_windows_Shell")
        );
        assert_eq!(
            registry.resolve("shell").as_deref(),
            Some("mcp_windows_Shell")
        );
    }

    #[test]
    fn resolve_refuses_ambiguous_suffix() {
        let mut registry = ToolRegistry::new();
        registry
            .register(echo_tool("mcp_windows_Shell"))
            .expect("register");
        registry
            .register(echo_tool("mcp_linux_Shell"))
            .expect("register");
        assert_eq!(registry.resolve("Shell"), None);
    }

    #[test]
    fn resolve_falls_back_to_exact_case_insensitive_match() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool("Echo_Text")).expect("register");
        assert_eq!(registry.resolve("echo_text").as_deref(), Some("Echo_Text"));
    }

    #[test]
    fn resolve_unknown_name_is_none() {
        let registry = ToolRegistry::new();
        assert_eq!(registry.resolve("whatever"), None);
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error_shape() {
        let registry = ToolRegistry::new();
        let result = registry.execute("missing", json!({})).await;
        assert_eq!(result["status"], "error");
        assert!(result["error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn execute_converts_callback_error_into_error_shape() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolInfo::new("broken", "Always fails")
                    .with_sync_callback(|_| Err("deliberate failure".into())),
            )
            .expect("register");
        let result = registry.execute("broken", json!({})).await;
        assert_eq!(result["status"], "error");
        assert!(result["error"]
            .as_str()
            .unwrap()
            .contains("deliberate failure"));
    }

    #[tokio::test]
    async fn execute_resolves_then_dispatches() {
        let mut registry = ToolRegistry::new();
        registry
            .register(echo_tool("mcp_utils_echo"))
            .expect("register");
        let result = registry.execute("echo", json!({ "text": "hi" })).await;
        assert_eq!(result["echo"]["text"], "hi");
    }

    #[tokio::test]
    async fn execute_without_callback_reports_error() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolInfo::new("descriptor_only", "No callback attached"))
            .expect("register");
        let result = registry.execute("descriptor_only", json!({})).await;
        assert_eq!(result["status"], "error");
    }

    #[test]
    fn prompt_listing_is_sorted_and_marks_optional_params() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolInfo::new("zeta", "Last tool").with_parameters(vec![
                    ToolParameter::new("count", ToolParamType::Integer).optional(),
                ]),
            )
            .expect("register");
        registry
            .register(
                ToolInfo::new("alpha", "First tool")
                    .with_parameters(vec![ToolParameter::new("text", ToolParamType::String)]),
            )
            .expect("register");

        let listing = registry.format_for_prompt();
        let alpha_pos = listing.find("- alpha(text: string): First tool").unwrap();
        let zeta_pos = listing.find("- zeta(count?: integer): Last tool").unwrap();
        assert!(alpha_pos < zeta_pos);
        assert_eq!(listing, registry.format_for_prompt());
    }
}
