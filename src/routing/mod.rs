pub mod assist;
pub mod patterns;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::completion::CompletionClient;
use crate::registry::ConnectorRegistry;

/// A structured action produced by routing and consumed by dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedAction {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub requires_dispatch: bool,
    #[serde(default)]
    pub provider_type: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
    #[serde(default)]
    pub response: Option<String>,
}

fn empty_parameters() -> Value {
    Value::Object(Default::default())
}

impl ResolvedAction {
    pub fn dispatch(intent: &str, provider_type: &str, tool_name: &str, parameters: Value) -> Self {
        Self {
            intent: intent.to_string(),
            requires_dispatch: true,
            provider_type: Some(provider_type.to_string()),
            tool_name: Some(tool_name.to_string()),
            parameters,
            response: None,
        }
    }

    pub fn direct(intent: &str, response: impl Into<String>) -> Self {
        Self {
            intent: intent.to_string(),
            requires_dispatch: false,
            provider_type: None,
            tool_name: None,
            parameters: empty_parameters(),
            response: Some(response.into()),
        }
    }
}

/// One prior turn of a conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Tier-1 deterministic pattern matching only.
    PatternOnly,
    /// Tier-2 AI-assisted resolution, falling back to tier 1 on failure.
    Assisted,
}

/// Two-tier message-to-action resolution. The mode is configuration, not a
/// subclass: `PatternOnly` never touches the completion service.
pub struct RoutingEngine {
    mode: RoutingMode,
    completion: Option<Arc<dyn CompletionClient>>,
    model: String,
}

impl RoutingEngine {
    pub fn pattern_only() -> Self {
        Self {
            mode: RoutingMode::PatternOnly,
            completion: None,
            model: String::new(),
        }
    }

    pub fn assisted(completion: Arc<dyn CompletionClient>, model: impl Into<String>) -> Self {
        Self {
            mode: RoutingMode::Assisted,
            completion: Some(completion),
            model: model.into(),
        }
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Turn free text into an action. Never fails: any tier-2 error
    /// degrades to a tier-1 resolution.
    pub async fn resolve(&self, message: &str, registry: &ConnectorRegistry) -> ResolvedAction {
        if self.mode == RoutingMode::Assisted
            && let Some(completion) = &self.completion
        {
            let context = assist::capability_context(registry);
            match assist::analyze(completion.as_ref(), &self.model, &context, message).await {
                Ok(action) => return action,
                Err(e) => {
                    warn!("AI-assisted routing failed, falling back to patterns: {}", e);
                }
            }
        }
        patterns::resolve(message)
    }

    /// Raw contextual completion for the conversation-history path. Errors
    /// propagate so the caller can apply its own fallback.
    pub async fn contextual_reply(
        &self,
        registry: &ConnectorRegistry,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String> {
        let completion = self
            .completion
            .as_ref()
            .ok_or_else(|| anyhow!("no completion service configured"))?;
        let context = assist::capability_context(registry);
        let prompt = assist::contextual_prompt(&context, history, message);
        completion.complete(&prompt, &self.model).await
    }
}
