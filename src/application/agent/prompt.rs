//! System prompt composition.

use crate::application::registry::ToolRegistry;

/// Reply-shape contract shared by every agent, appended to each system
/// prompt after the tool listing.
pub const RESPONSE_FORMAT_TEMPLATE: &str = r#"
==== RESPONSE FORMAT ====
You must respond ONLY in valid JSON. No text before { or after }.

**To call a tool:**
{"thought": "reasoning", "goal": "objective", "tool": "tool_name", "tool_args": {"arg1": "value1"}}

**To call a tool with an initial plan:**
{"thought": "reasoning", "goal": "objective", "plan": [{"tool": "t1", "tool_args": {}}, {"tool": "t2", "tool_args": {}}], "tool": "t1", "tool_args": {}}

**To provide a final answer:**
{"thought": "reasoning", "goal": "achieved", "answer": "response to user"}

**RULES:**
1. ALWAYS use tools for real data - NEVER hallucinate
2. Call ONE tool at a time - observe the result, reason about it, then decide the next action
3. You may include a "plan" to show your intended steps, but always execute only the "tool" field
4. After each tool result, you can change, skip, or add steps - the plan is a roadmap, not a script
5. After all tools complete, provide an "answer" summarizing results
"#;

/// Domain prompt, then the tool listing, then the fixed response format.
pub fn compose_system_prompt(domain_prompt: &str, registry: &ToolRegistry) -> String {
    let mut prompt = String::new();

    if !domain_prompt.is_empty() {
        prompt.push_str(domain_prompt);
        prompt.push_str("\n\n");
    }

    let listing = registry.format_for_prompt();
    if !listing.is_empty() {
        prompt.push_str("==== AVAILABLE TOOLS ====\n");
        prompt.push_str(&listing);
        prompt.push('\n');
    }

    prompt.push_str(RESPONSE_FORMAT_TEMPLATE);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::ToolInfo;

    #[test]
    fn compose_orders_sections() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolInfo::new("probe", "Probe something"))
            .expect("register");

        let prompt = compose_system_prompt("You are a diagnostics agent.", &registry);
        let domain_pos = prompt.find("diagnostics agent").unwrap();
        let tools_pos = prompt.find("==== AVAILABLE TOOLS ====").unwrap();
        let format_pos = prompt.find("==== RESPONSE FORMAT ====").unwrap();
        assert!(domain_pos < tools_pos);
        assert!(tools_pos < format_pos);
        assert!(prompt.contains("- probe(): Probe something"));
    }

    #[test]
    fn compose_without_domain_or_tools_is_just_the_template() {
        let registry = ToolRegistry::new();
        let prompt = compose_system_prompt("", &registry);
        assert_eq!(prompt, RESPONSE_FORMAT_TEMPLATE);
    }
}
