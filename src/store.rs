use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::vault::{CredentialVault, DECRYPTION_ERROR_MARKER};

/// A user's persisted connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub provider_type: String,
    pub config: Value,
    pub description: Option<String>,
    pub is_enabled: bool,
    pub is_default: bool,
}

/// Partial update for a connector row. `None` fields are left unchanged.
#[derive(Debug, Default, Clone)]
pub struct ConnectorUpdate {
    pub name: Option<String>,
    pub provider_type: Option<String>,
    pub config: Option<Value>,
    pub description: Option<Option<String>>,
    pub is_enabled: Option<bool>,
    pub is_default: Option<bool>,
}

/// Credential metadata as exposed by listing operations. The stored value
/// never leaves the store in plaintext through this type.
#[derive(Debug, Clone)]
pub struct CredentialInfo {
    pub id: i64,
    pub connector_id: i64,
    pub name: String,
    pub is_encrypted: bool,
}

#[derive(Debug, Clone)]
pub struct UserPreferences {
    pub user_id: i64,
    pub default_connector_id: Option<i64>,
    pub auto_retry_enabled: bool,
    pub max_retry_attempts: u32,
    pub timeout_seconds: u64,
    pub preferences: Value,
}

impl UserPreferences {
    pub fn defaults(user_id: i64) -> Self {
        Self {
            user_id,
            default_connector_id: None,
            auto_retry_enabled: true,
            max_retry_attempts: 3,
            timeout_seconds: 30,
            preferences: Value::Object(Default::default()),
        }
    }
}

/// Persistence for connector configs, encrypted credentials, and user
/// preferences. Owns the vault: credential values are encrypted on the way
/// in and only decrypted through [`ConnectorStore::decrypted_credentials`].
pub struct ConnectorStore {
    db: Arc<Mutex<Connection>>,
    vault: CredentialVault,
}

impl ConnectorStore {
    pub fn new(db: Arc<Mutex<Connection>>, vault: CredentialVault) -> Self {
        Self { db, vault }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS connectors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                provider_type TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                description TEXT,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                is_default INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS connector_credentials (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                connector_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                is_encrypted INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS user_preferences (
                user_id INTEGER PRIMARY KEY,
                default_connector_id INTEGER,
                auto_retry_enabled INTEGER NOT NULL DEFAULT 1,
                max_retry_attempts INTEGER NOT NULL DEFAULT 3,
                timeout_seconds INTEGER NOT NULL DEFAULT 30,
                preferences TEXT NOT NULL DEFAULT '{}'
            )",
            [],
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_connector(
        &self,
        user_id: i64,
        name: &str,
        provider_type: &str,
        config: Value,
        description: Option<&str>,
        is_enabled: bool,
        is_default: bool,
    ) -> Result<ConnectorConfig> {
        let db = self.db.lock().await;
        // Setting a new default must atomically unset every other default
        // for this user.
        let tx = db.unchecked_transaction()?;
        if is_default {
            tx.execute(
                "UPDATE connectors SET is_default = 0 WHERE user_id = ?1",
                params![user_id],
            )?;
        }
        tx.execute(
            "INSERT INTO connectors (user_id, name, provider_type, config, description, is_enabled, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                user_id,
                name,
                provider_type,
                config.to_string(),
                description,
                is_enabled,
                is_default
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!("Created connector '{}' (id {}) for user {}", name, id, user_id);
        Ok(ConnectorConfig {
            id,
            user_id,
            name: name.to_string(),
            provider_type: provider_type.to_string(),
            config,
            description: description.map(str::to_string),
            is_enabled,
            is_default,
        })
    }

    pub async fn get_connector(&self, connector_id: i64, user_id: i64) -> Result<Option<ConnectorConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, provider_type, config, description, is_enabled, is_default
             FROM connectors WHERE id = ?1 AND user_id = ?2",
        )?;
        let row = stmt
            .query_row(params![connector_id, user_id], row_to_connector)
            .optional()?;
        Ok(row)
    }

    pub async fn get_user_connectors(&self, user_id: i64) -> Result<Vec<ConnectorConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, provider_type, config, description, is_enabled, is_default
             FROM connectors WHERE user_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_connector)?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row?);
        }
        Ok(configs)
    }

    pub async fn update_connector(
        &self,
        connector_id: i64,
        user_id: i64,
        updates: ConnectorUpdate,
    ) -> Result<Option<ConnectorConfig>> {
        let db = self.db.lock().await;
        let tx = db.unchecked_transaction()?;

        let existing = {
            let mut stmt = tx.prepare(
                "SELECT id, user_id, name, provider_type, config, description, is_enabled, is_default
                 FROM connectors WHERE id = ?1 AND user_id = ?2",
            )?;
            stmt.query_row(params![connector_id, user_id], row_to_connector)
                .optional()?
        };
        let Some(mut connector) = existing else {
            return Ok(None);
        };

        if updates.is_default == Some(true) {
            tx.execute(
                "UPDATE connectors SET is_default = 0 WHERE user_id = ?1",
                params![user_id],
            )?;
        }

        if let Some(name) = updates.name {
            connector.name = name;
        }
        if let Some(provider_type) = updates.provider_type {
            connector.provider_type = provider_type;
        }
        if let Some(config) = updates.config {
            connector.config = config;
        }
        if let Some(description) = updates.description {
            connector.description = description;
        }
        if let Some(is_enabled) = updates.is_enabled {
            connector.is_enabled = is_enabled;
        }
        if let Some(is_default) = updates.is_default {
            connector.is_default = is_default;
        }

        tx.execute(
            "UPDATE connectors SET name = ?1, provider_type = ?2, config = ?3, description = ?4,
             is_enabled = ?5, is_default = ?6 WHERE id = ?7",
            params![
                connector.name,
                connector.provider_type,
                connector.config.to_string(),
                connector.description,
                connector.is_enabled,
                connector.is_default,
                connector_id
            ],
        )?;
        tx.commit()?;

        info!("Updated connector {} for user {}", connector_id, user_id);
        Ok(Some(connector))
    }

    pub async fn delete_connector(&self, connector_id: i64, user_id: i64) -> Result<bool> {
        let db = self.db.lock().await;
        let tx = db.unchecked_transaction()?;
        let deleted = tx.execute(
            "DELETE FROM connectors WHERE id = ?1 AND user_id = ?2",
            params![connector_id, user_id],
        )?;
        if deleted > 0 {
            tx.execute(
                "DELETE FROM connector_credentials WHERE connector_id = ?1",
                params![connector_id],
            )?;
        }
        tx.commit()?;

        if deleted > 0 {
            info!("Deleted connector {} for user {}", connector_id, user_id);
        }
        Ok(deleted > 0)
    }

    /// Encrypt and store a credential for a connector owned by `user_id`.
    pub async fn add_credential(
        &self,
        connector_id: i64,
        user_id: i64,
        name: &str,
        value: &str,
    ) -> Result<CredentialInfo> {
        self.assert_owned(connector_id, user_id).await?;

        let encrypted = self.vault.encrypt(value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO connector_credentials (connector_id, name, value, is_encrypted)
             VALUES (?1, ?2, ?3, 1)",
            params![connector_id, name, encrypted],
        )?;
        let id = db.last_insert_rowid();

        info!("Added credential '{}' to connector {}", name, connector_id);
        Ok(CredentialInfo {
            id,
            connector_id,
            name: name.to_string(),
            is_encrypted: true,
        })
    }

    /// List credential names for a connector. Values are never included.
    pub async fn list_credentials(&self, connector_id: i64, user_id: i64) -> Result<Vec<CredentialInfo>> {
        self.assert_owned(connector_id, user_id).await?;

        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, connector_id, name, is_encrypted FROM connector_credentials
             WHERE connector_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![connector_id], |row| {
            Ok(CredentialInfo {
                id: row.get(0)?,
                connector_id: row.get(1)?,
                name: row.get(2)?,
                is_encrypted: row.get(3)?,
            })
        })?;
        let mut creds = Vec::new();
        for row in rows {
            creds.push(row?);
        }
        Ok(creds)
    }

    /// Decrypt a connector's credentials into a name -> plaintext map for a
    /// registry load. A value that fails to decrypt is degraded to the
    /// `[DECRYPTION_ERROR]` marker rather than failing the whole map.
    pub async fn decrypted_credentials(
        &self,
        connector_id: i64,
        user_id: i64,
    ) -> Result<HashMap<String, String>> {
        self.assert_owned(connector_id, user_id).await?;

        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, value, is_encrypted FROM connector_credentials WHERE connector_id = ?1",
        )?;
        let rows = stmt.query_map(params![connector_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut creds = HashMap::new();
        for row in rows {
            let (id, name, value, is_encrypted) = row?;
            let plaintext = if is_encrypted {
                match self.vault.decrypt(&value) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        error!("Error decrypting credential {}: {}", id, e);
                        DECRYPTION_ERROR_MARKER.to_string()
                    }
                }
            } else {
                value
            };
            creds.insert(name, plaintext);
        }
        Ok(creds)
    }

    pub async fn get_default_connector(&self, user_id: i64) -> Result<Option<ConnectorConfig>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, user_id, name, provider_type, config, description, is_enabled, is_default
             FROM connectors WHERE user_id = ?1 AND is_default = 1 AND is_enabled = 1",
        )?;
        let row = stmt.query_row(params![user_id], row_to_connector).optional()?;
        Ok(row)
    }

    /// Insert or update the preference row for a user.
    pub async fn set_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO user_preferences
                 (user_id, default_connector_id, auto_retry_enabled, max_retry_attempts, timeout_seconds, preferences)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id) DO UPDATE SET
                 default_connector_id = excluded.default_connector_id,
                 auto_retry_enabled = excluded.auto_retry_enabled,
                 max_retry_attempts = excluded.max_retry_attempts,
                 timeout_seconds = excluded.timeout_seconds,
                 preferences = excluded.preferences",
            params![
                prefs.user_id,
                prefs.default_connector_id,
                prefs.auto_retry_enabled,
                prefs.max_retry_attempts,
                prefs.timeout_seconds as i64,
                prefs.preferences.to_string()
            ],
        )?;
        info!("Updated preferences for user {}", prefs.user_id);
        Ok(())
    }

    pub async fn get_preferences(&self, user_id: i64) -> Result<Option<UserPreferences>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT user_id, default_connector_id, auto_retry_enabled, max_retry_attempts,
                    timeout_seconds, preferences
             FROM user_preferences WHERE user_id = ?1",
        )?;
        let row = stmt
            .query_row(params![user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .optional()?;

        Ok(row.map(
            |(user_id, default_connector_id, auto_retry_enabled, max_retry_attempts, timeout, prefs)| {
                UserPreferences {
                    user_id,
                    default_connector_id,
                    auto_retry_enabled,
                    max_retry_attempts,
                    timeout_seconds: timeout.max(0) as u64,
                    preferences: serde_json::from_str(&prefs)
                        .unwrap_or_else(|_| Value::Object(Default::default())),
                }
            },
        ))
    }

    async fn assert_owned(&self, connector_id: i64, user_id: i64) -> Result<()> {
        let db = self.db.lock().await;
        let owned: Option<i64> = db
            .query_row(
                "SELECT id FROM connectors WHERE id = ?1 AND user_id = ?2",
                params![connector_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if owned.is_none() {
            return Err(anyhow!("Connector not found or access denied"));
        }
        Ok(())
    }
}

fn row_to_connector(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectorConfig> {
    let config_raw: String = row.get(4)?;
    Ok(ConnectorConfig {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        provider_type: row.get(3)?,
        config: serde_json::from_str(&config_raw).unwrap_or_else(|_| Value::Object(Default::default())),
        description: row.get(5)?,
        is_enabled: row.get(6)?,
        is_default: row.get(7)?,
    })
}
