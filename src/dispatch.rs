use tracing::{error, info};

use crate::registry::{ConnectorRegistry, LoadedConnector};
use crate::routing::ResolvedAction;

/// Invokes resolved actions against the registry. All failure modes on the
/// synchronous path fold into the returned text; nothing propagates past
/// this boundary as an error.
pub struct Dispatcher;

impl Dispatcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        action: &ResolvedAction,
        registry: &ConnectorRegistry,
        explicit_id: Option<i64>,
    ) -> String {
        if !action.requires_dispatch {
            return action
                .response
                .clone()
                .unwrap_or_else(|| "I'm not sure how to help with that.".to_string());
        }

        let provider_type = action.provider_type.as_deref().unwrap_or_default();
        let Some(target) = registry.find_by_type(provider_type, explicit_id).await else {
            return format!(
                "No {} connector available. Please configure one first.",
                provider_type
            );
        };

        let Some(tool_name) = action.tool_name.as_deref() else {
            return "No tool specified for this action.".to_string();
        };

        if !target.connector.tool_names().contains(&tool_name) {
            return format!(
                "Unknown {} tool: {}",
                target.config.provider_type, tool_name
            );
        }

        self.invoke(target, tool_name, action, registry).await
    }

    /// Credential injection happens before every invocation; the hook is
    /// idempotent by contract. Failed invocations retry per the user's
    /// persisted policy before the error is folded into text.
    async fn invoke(
        &self,
        target: &LoadedConnector,
        tool_name: &str,
        action: &ResolvedAction,
        registry: &ConnectorRegistry,
    ) -> String {
        target.connector.apply_credentials(&target.credentials).await;

        let prefs = registry.preferences().await;
        let attempts = if prefs.auto_retry_enabled {
            prefs.max_retry_attempts.max(1)
        } else {
            1
        };

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match target.connector.call_tool(tool_name, &action.parameters).await {
                Ok(result) => {
                    info!(
                        "Executed tool {} on connector {} (attempt {})",
                        tool_name, target.config.id, attempt
                    );
                    return result;
                }
                Err(e) => {
                    error!(
                        "Tool {} failed on connector {} (attempt {}/{}): {}",
                        tool_name, target.config.id, attempt, attempts, e
                    );
                    last_error = e.to_string();
                }
            }
        }

        format!("Error calling {}: {}", tool_name, last_error)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use rusqlite::Connection;
    use serde_json::json;
    use tokio::sync::Mutex;

    use crate::connectors::{Connector, ConnectorCatalog};
    use crate::store::{ConnectorStore, UserPreferences};
    use crate::vault::CredentialVault;

    /// Test connector with one echo tool and one tool that fails a fixed
    /// number of times before succeeding.
    struct FlakyConnector {
        failures_remaining: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        fn provider_type(&self) -> &'static str {
            "flaky"
        }

        fn tool_names(&self) -> &'static [&'static str] {
            &["echo", "flaky_tool"]
        }

        async fn apply_credentials(&self, _credentials: &HashMap<String, String>) {}

        async fn call_tool(&self, tool_name: &str, parameters: &serde_json::Value) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match tool_name {
                "echo" => Ok(format!("echo: {}", parameters["text"].as_str().unwrap_or(""))),
                "flaky_tool" => {
                    if self.failures_remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                        Err(anyhow!("transient failure"))
                    } else {
                        Ok("recovered".to_string())
                    }
                }
                other => Err(anyhow!("tool '{}' is not implemented", other)),
            }
        }
    }

    async fn setup(failures: u32) -> (ConnectorRegistry, Arc<FlakyConnector>) {
        let db = Connection::open_in_memory().unwrap();
        let vault = CredentialVault::new(&CredentialVault::generate_key()).unwrap();
        let store = Arc::new(ConnectorStore::new(Arc::new(Mutex::new(db)), vault));
        store.initialize().await.unwrap();
        store
            .create_connector(1, "flaky", "flaky", json!({}), None, true, true)
            .await
            .unwrap();

        let connector = Arc::new(FlakyConnector {
            failures_remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        });
        let mut catalog = ConnectorCatalog::new();
        let shared = connector.clone();
        catalog.register("flaky", move |_config| shared.clone());

        let mut registry = ConnectorRegistry::new(1, store, Arc::new(catalog));
        registry.initialize().await.unwrap();
        (registry, connector)
    }

    #[tokio::test]
    async fn direct_actions_return_their_response() {
        let (registry, _) = setup(0).await;
        let action = ResolvedAction::direct("greeting", "Hello there");
        assert_eq!(
            Dispatcher::new().execute(&action, &registry, None).await,
            "Hello there"
        );
    }

    #[tokio::test]
    async fn missing_provider_returns_user_facing_message() {
        let (registry, _) = setup(0).await;
        let action = ResolvedAction::dispatch("x", "jira", "create_ticket", json!({}));
        // Registry falls back to any loaded connector for unmatched types,
        // so drop to an empty registry to exercise the none case.
        let empty_db = Connection::open_in_memory().unwrap();
        let vault = CredentialVault::new(&CredentialVault::generate_key()).unwrap();
        let empty_store = Arc::new(ConnectorStore::new(Arc::new(Mutex::new(empty_db)), vault));
        empty_store.initialize().await.unwrap();
        let mut empty = ConnectorRegistry::new(1, empty_store, Arc::new(ConnectorCatalog::new()));
        empty.initialize().await.unwrap();

        let result = Dispatcher::new().execute(&action, &empty, None).await;
        assert_eq!(result, "No jira connector available. Please configure one first.");
        drop(registry);
    }

    #[tokio::test]
    async fn unknown_tool_returns_textual_result() {
        let (registry, _) = setup(0).await;
        let action = ResolvedAction::dispatch("x", "flaky", "no_such_tool", json!({}));
        let result = Dispatcher::new().execute(&action, &registry, None).await;
        assert_eq!(result, "Unknown flaky tool: no_such_tool");
    }

    #[tokio::test]
    async fn invocation_success_returns_tool_output() {
        let (registry, _) = setup(0).await;
        let action = ResolvedAction::dispatch("x", "flaky", "echo", json!({"text": "hi"}));
        let result = Dispatcher::new().execute(&action, &registry, None).await;
        assert_eq!(result, "echo: hi");
    }

    #[tokio::test]
    async fn retry_policy_recovers_transient_failures() {
        let (registry, connector) = setup(2).await;
        let mut prefs = UserPreferences::defaults(1);
        prefs.max_retry_attempts = 3;
        registry.store().set_preferences(&prefs).await.unwrap();

        let action = ResolvedAction::dispatch("x", "flaky", "flaky_tool", json!({}));
        let result = Dispatcher::new().execute(&action, &registry, None).await;
        assert_eq!(result, "recovered");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fold_error_into_text() {
        let (registry, _) = setup(10).await;
        let mut prefs = UserPreferences::defaults(1);
        prefs.auto_retry_enabled = false;
        registry.store().set_preferences(&prefs).await.unwrap();

        let action = ResolvedAction::dispatch("x", "flaky", "flaky_tool", json!({}));
        let result = Dispatcher::new().execute(&action, &registry, None).await;
        assert_eq!(result, "Error calling flaky_tool: transient failure");
    }
}
