pub mod github;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::store::ConnectorConfig;

/// A pluggable implementation exposing named tool functions for one
/// external capability domain.
#[async_trait]
pub trait Connector: Send + Sync {
    fn provider_type(&self) -> &'static str;

    /// The fixed tool-name table this connector answers to. Dispatch
    /// rejects names outside this list before invoking.
    fn tool_names(&self) -> &'static [&'static str];

    /// Inject decrypted credentials into the connector. Must be idempotent;
    /// the dispatcher calls it before every invocation.
    async fn apply_credentials(&self, credentials: &HashMap<String, String>);

    /// Invoke a tool by name with a JSON parameter map, returning text.
    async fn call_tool(&self, tool_name: &str, parameters: &Value) -> Result<String>;
}

type ConnectorFactory = dyn Fn(&ConnectorConfig) -> Arc<dyn Connector> + Send + Sync;

/// Maps provider type tags to connector factories. Registration happens at
/// construction time; there is no runtime module loading.
pub struct ConnectorCatalog {
    factories: HashMap<String, Box<ConnectorFactory>>,
}

impl ConnectorCatalog {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A catalog with every built-in connector registered.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register("github", |config| {
            Arc::new(github::GithubConnector::from_config(&config.config))
        });
        catalog
    }

    pub fn register<F>(&mut self, provider_type: &str, factory: F)
    where
        F: Fn(&ConnectorConfig) -> Arc<dyn Connector> + Send + Sync + 'static,
    {
        info!("Registered connector type: {}", provider_type);
        self.factories.insert(provider_type.to_string(), Box::new(factory));
    }

    /// Resolve a config row to a connector instance, or `None` when the
    /// provider type has no registered implementation.
    pub fn resolve(&self, config: &ConnectorConfig) -> Option<Arc<dyn Connector>> {
        self.factories
            .get(&config.provider_type)
            .map(|factory| factory(config))
    }
}

impl Default for ConnectorCatalog {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(provider_type: &str) -> ConnectorConfig {
        ConnectorConfig {
            id: 1,
            user_id: 1,
            name: "test".to_string(),
            provider_type: provider_type.to_string(),
            config: json!({}),
            description: None,
            is_enabled: true,
            is_default: false,
        }
    }

    #[test]
    fn builtins_resolve_github() {
        let catalog = ConnectorCatalog::with_builtins();
        let connector = catalog.resolve(&config("github")).unwrap();
        assert_eq!(connector.provider_type(), "github");
        assert!(connector.tool_names().contains(&"get_repository_info"));
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        let catalog = ConnectorCatalog::with_builtins();
        assert!(catalog.resolve(&config("jira")).is_none());
    }
}
