//! Tier-2 AI-assisted routing: capability context, prompt composition, and
//! JSON action parsing with raw-text degradation.

use anyhow::Result;
use tracing::warn;

use super::{ChatTurn, ResolvedAction};
use crate::completion::CompletionClient;
use crate::registry::ConnectorRegistry;

/// Prior turns included in the contextual prompt.
const HISTORY_WINDOW: usize = 5;

const SYSTEM_PROMPT: &str = "\
You are an orchestrator that helps users interact with their configured tool connectors.

When a user asks something, you should:
1. Identify what they want to do
2. Determine if it requires a connector tool call
3. Extract the necessary parameters
4. Choose the best tool

Always respond in a helpful, concise manner. If a tool call is needed, provide the tool name and parameters in a structured format.";

/// Describe every loaded connector's capabilities: the tool table for
/// implemented types, the free-text description otherwise.
pub fn capability_context(registry: &ConnectorRegistry) -> String {
    let loaded = registry.list_available();
    if loaded.is_empty() {
        return "No connectors available.".to_string();
    }

    let mut lines = Vec::new();
    for summary in loaded {
        let tools = registry
            .get(summary.id)
            .map(|c| c.connector.tool_names())
            .unwrap_or_default();
        if tools.is_empty() {
            lines.push(format!(
                "- {} connector ({}): {}",
                summary.provider_type,
                summary.name,
                summary.description.as_deref().unwrap_or("Generic connector"),
            ));
        } else {
            lines.push(format!(
                "- {} connector ({}): {}",
                summary.provider_type,
                summary.name,
                tools.join(", "),
            ));
        }
    }
    lines.join("\n")
}

pub fn analysis_prompt(context: &str, message: &str) -> String {
    format!(
        r#"{SYSTEM_PROMPT}

Available connectors and capabilities:
{context}

User message: "{message}"

Analyze this message and respond with a JSON object containing:
1. "intent": what the user wants to do
2. "requires_dispatch": true/false - whether this needs a connector tool call
3. "provider_type": which connector type to use (if needed)
4. "tool_name": specific tool to call (if needed)
5. "parameters": extracted parameters for the tool (if needed)
6. "response": direct response if no tool call is needed

Examples:
- "Show me info about microsoft/vscode repo" -> {{"intent": "get_repo_info", "requires_dispatch": true, "provider_type": "github", "tool_name": "get_repository_info", "parameters": {{"owner": "microsoft", "repo": "vscode"}}}}
- "Hello" -> {{"intent": "greeting", "requires_dispatch": false, "response": "Hello! I can help you with your configured connectors. What would you like to do?"}}

Respond only with valid JSON:"#
    )
}

pub fn contextual_prompt(context: &str, history: &[ChatTurn], message: &str) -> String {
    let mut prompt = format!("{SYSTEM_PROMPT}\n\nAvailable connectors and capabilities:\n{context}\n\n");
    if !history.is_empty() {
        prompt.push_str("Conversation history:\n");
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        for turn in &history[start..] {
            prompt.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
        prompt.push('\n');
    }
    prompt.push_str(&format!("User: {message}\nAssistant:"));
    prompt
}

/// Strip a fenced code-block wrapper, if present, before JSON parsing.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    else {
        return trimmed;
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Ask the completion service to resolve the message into an action.
/// Invalid JSON degrades to a direct response carrying the raw text;
/// transport errors propagate so the caller can fall back to tier 1.
pub async fn analyze(
    completion: &dyn CompletionClient,
    model: &str,
    context: &str,
    message: &str,
) -> Result<ResolvedAction> {
    let prompt = analysis_prompt(context, message);
    let reply = completion.complete(&prompt, model).await?;

    match serde_json::from_str::<ResolvedAction>(strip_code_fence(&reply)) {
        Ok(action) => Ok(action),
        Err(e) => {
            warn!("Failed to parse completion JSON, using raw text: {}", e);
            Ok(ResolvedAction::direct("unknown", reply))
        }
    }
}

/// Split a contextual reply that embeds a fenced JSON action block into its
/// prose portion and the action. Returns `None` when there is no
/// dispatchable action, leaving the reply to be returned unmodified.
pub fn extract_embedded_action(reply: &str) -> Option<(String, ResolvedAction)> {
    let fence_start = reply.find("```json")?;
    let body_start = fence_start + "```json".len();
    let fence_len = reply[body_start..].find("```")?;
    let body = reply[body_start..body_start + fence_len].trim();

    let action: ResolvedAction = serde_json::from_str(body).ok()?;
    if !action.requires_dispatch {
        return None;
    }

    let prose = format!(
        "{}{}",
        &reply[..fence_start],
        &reply[body_start + fence_len + "```".len()..]
    );
    Some((prose.trim().to_string(), action))
}
