use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::connectors::{Connector, ConnectorCatalog};
use crate::store::{ConnectorConfig, ConnectorStore, UserPreferences};

/// A connector loaded for one user session: resolved implementation,
/// config row, and decrypted credential map. Rebuilt on every
/// `initialize()`/`reload()`; never persisted.
pub struct LoadedConnector {
    pub connector: Arc<dyn Connector>,
    pub config: ConnectorConfig,
    pub credentials: HashMap<String, String>,
}

/// Credential-free projection of a loaded connector for presentation.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorSummary {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub provider_type: String,
    pub is_default: bool,
    pub description: Option<String>,
}

/// Per-user in-memory view of enabled connectors. Owned by a single logical
/// caller; `initialize`/`reload` must not race with reads on the same
/// instance.
pub struct ConnectorRegistry {
    user_id: i64,
    store: Arc<ConnectorStore>,
    catalog: Arc<ConnectorCatalog>,
    loaded: HashMap<i64, LoadedConnector>,
    initialized: bool,
}

impl ConnectorRegistry {
    pub fn new(user_id: i64, store: Arc<ConnectorStore>, catalog: Arc<ConnectorCatalog>) -> Self {
        Self {
            user_id,
            store,
            catalog,
            loaded: HashMap::new(),
            initialized: false,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn store(&self) -> &Arc<ConnectorStore> {
        &self.store
    }

    /// Load the user's enabled connectors. Idempotent: a second call on an
    /// already-ready registry is a no-op.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.load().await?;
        self.initialized = true;
        info!("Connector registry initialized for user {}", self.user_id);
        Ok(())
    }

    /// Drop all loaded connectors and re-run the load step. Callers must
    /// not hold references to stale `LoadedConnector` values across this.
    pub async fn reload(&mut self) -> Result<()> {
        self.loaded.clear();
        self.load().await?;
        self.initialized = true;
        info!("Reloaded connectors for user {}", self.user_id);
        Ok(())
    }

    async fn load(&mut self) -> Result<()> {
        let configs = self.store.get_user_connectors(self.user_id).await?;
        for config in configs.into_iter().filter(|c| c.is_enabled) {
            let Some(connector) = self.catalog.resolve(&config) else {
                // One unresolvable connector must not prevent the others
                // from loading.
                warn!(
                    "No implementation registered for connector '{}' (type '{}'), skipping",
                    config.name, config.provider_type
                );
                continue;
            };
            let credentials = match self.store.decrypted_credentials(config.id, self.user_id).await {
                Ok(credentials) => credentials,
                Err(e) => {
                    warn!("Failed to load credentials for connector {}: {}", config.id, e);
                    HashMap::new()
                }
            };
            info!("Loaded connector: {} (id {})", config.name, config.id);
            self.loaded.insert(
                config.id,
                LoadedConnector {
                    connector,
                    config,
                    credentials,
                },
            );
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    pub fn get(&self, connector_id: i64) -> Option<&LoadedConnector> {
        self.loaded.get(&connector_id)
    }

    /// Resolve the connector to use for a request: explicit id, then the
    /// default-flagged loaded connector, then the user's persisted default
    /// preference, then any loaded connector.
    pub async fn get_target(&self, explicit_id: Option<i64>) -> Option<&LoadedConnector> {
        if let Some(id) = explicit_id
            && let Some(target) = self.loaded.get(&id)
        {
            return Some(target);
        }

        if let Some(target) = self.loaded.values().find(|c| c.config.is_default) {
            return Some(target);
        }

        if let Ok(Some(prefs)) = self.store.get_preferences(self.user_id).await
            && let Some(id) = prefs.default_connector_id
            && let Some(target) = self.loaded.get(&id)
        {
            return Some(target);
        }

        self.loaded.values().next()
    }

    /// Resolve a connector by provider type for the dispatcher: explicit id
    /// first, then the first loaded connector of that type, then the
    /// general target fallback.
    pub async fn find_by_type(&self, provider_type: &str, explicit_id: Option<i64>) -> Option<&LoadedConnector> {
        if let Some(id) = explicit_id
            && let Some(target) = self.loaded.get(&id)
        {
            return Some(target);
        }

        if let Some(target) = self
            .loaded
            .values()
            .find(|c| c.config.provider_type == provider_type)
        {
            return Some(target);
        }

        self.get_target(None).await
    }

    /// Stable presentation projection. Never exposes credentials or
    /// anything derived from them.
    pub fn list_available(&self) -> Vec<ConnectorSummary> {
        let mut summaries: Vec<ConnectorSummary> = self
            .loaded
            .values()
            .map(|c| ConnectorSummary {
                id: c.config.id,
                name: c.config.name.clone(),
                provider_type: c.config.provider_type.clone(),
                is_default: c.config.is_default,
                description: c.config.description.clone(),
            })
            .collect();
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Retry/timeout parameters for this user, falling back to defaults
    /// when no preference row exists.
    pub async fn preferences(&self) -> UserPreferences {
        match self.store.get_preferences(self.user_id).await {
            Ok(Some(prefs)) => prefs,
            Ok(None) => UserPreferences::defaults(self.user_id),
            Err(e) => {
                warn!("Failed to read preferences for user {}: {}", self.user_id, e);
                UserPreferences::defaults(self.user_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::CredentialVault;
    use rusqlite::Connection;
    use serde_json::json;
    use tokio::sync::Mutex;

    async fn test_store() -> Arc<ConnectorStore> {
        let db = Connection::open_in_memory().expect("in-memory db");
        let vault = CredentialVault::new(&CredentialVault::generate_key()).unwrap();
        let store = ConnectorStore::new(Arc::new(Mutex::new(db)), vault);
        store.initialize().await.unwrap();
        Arc::new(store)
    }

    fn catalog() -> Arc<ConnectorCatalog> {
        Arc::new(ConnectorCatalog::with_builtins())
    }

    async fn add(store: &ConnectorStore, user: i64, name: &str, provider: &str, enabled: bool, default: bool) -> i64 {
        store
            .create_connector(user, name, provider, json!({}), None, enabled, default)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn initialize_loads_only_enabled_connectors() {
        let store = test_store().await;
        let on = add(&store, 1, "on", "github", true, false).await;
        let off = add(&store, 1, "off", "github", false, false).await;

        let mut registry = ConnectorRegistry::new(1, store, catalog());
        registry.initialize().await.unwrap();

        assert!(registry.get(on).is_some());
        assert!(registry.get(off).is_none());
    }

    #[tokio::test]
    async fn unknown_provider_type_is_skipped_not_fatal() {
        let store = test_store().await;
        add(&store, 1, "mystery", "jira", true, false).await;
        let gh = add(&store, 1, "gh", "github", true, false).await;

        let mut registry = ConnectorRegistry::new(1, store, catalog());
        registry.initialize().await.unwrap();

        assert!(registry.get(gh).is_some());
        assert_eq!(registry.list_available().len(), 1);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = test_store().await;
        add(&store, 1, "gh", "github", true, false).await;

        let mut registry = ConnectorRegistry::new(1, store.clone(), catalog());
        registry.initialize().await.unwrap();
        add(&store, 1, "late", "github", true, false).await;
        registry.initialize().await.unwrap();

        // Second initialize is a no-op; the late connector only appears
        // after an explicit reload.
        assert_eq!(registry.list_available().len(), 1);
        registry.reload().await.unwrap();
        assert_eq!(registry.list_available().len(), 2);
    }

    #[tokio::test]
    async fn reload_drops_newly_disabled_connectors() {
        let store = test_store().await;
        let id = add(&store, 1, "gh", "github", true, false).await;

        let mut registry = ConnectorRegistry::new(1, store.clone(), catalog());
        registry.initialize().await.unwrap();
        assert!(registry.get_target(None).await.is_some());

        store
            .update_connector(
                id,
                1,
                crate::store::ConnectorUpdate {
                    is_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        registry.reload().await.unwrap();

        assert!(registry.get_target(None).await.is_none());
    }

    #[tokio::test]
    async fn target_resolution_prefers_explicit_then_default_flag() {
        let store = test_store().await;
        let plain = add(&store, 1, "plain", "github", true, false).await;
        let default = add(&store, 1, "default", "github", true, true).await;

        let mut registry = ConnectorRegistry::new(1, store, catalog());
        registry.initialize().await.unwrap();

        assert_eq!(registry.get_target(Some(plain)).await.unwrap().config.id, plain);
        assert_eq!(registry.get_target(None).await.unwrap().config.id, default);
        // Unknown explicit id falls through to the default.
        assert_eq!(registry.get_target(Some(999)).await.unwrap().config.id, default);
    }

    #[tokio::test]
    async fn target_resolution_uses_preference_default() {
        let store = test_store().await;
        let a = add(&store, 1, "a", "github", true, false).await;
        let b = add(&store, 1, "b", "github", true, false).await;

        let mut prefs = UserPreferences::defaults(1);
        prefs.default_connector_id = Some(b);
        store.set_preferences(&prefs).await.unwrap();

        let mut registry = ConnectorRegistry::new(1, store, catalog());
        registry.initialize().await.unwrap();

        let target = registry.get_target(None).await.unwrap();
        assert_eq!(target.config.id, b);
        assert_ne!(target.config.id, a);
    }

    #[tokio::test]
    async fn list_available_exposes_no_credential_fields() {
        let store = test_store().await;
        let id = add(&store, 1, "gh", "github", true, true).await;
        store.add_credential(id, 1, "github_token", "ghp_secret").await.unwrap();

        let mut registry = ConnectorRegistry::new(1, store, catalog());
        registry.initialize().await.unwrap();

        let listed = serde_json::to_string(&registry.list_available()).unwrap();
        assert!(!listed.contains("ghp_secret"));
        assert!(!listed.contains("token"));
        assert!(listed.contains("\"type\":\"github\""));
    }
}
