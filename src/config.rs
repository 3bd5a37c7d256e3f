use std::env;

/// Engine configuration sourced from the environment. Collaborators take
/// these values at construction; nothing reads the environment after
/// startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base64url-encoded 256-bit credential encryption key. When unset the
    /// vault generates one and warns; operators should pin it for key
    /// continuity across restarts.
    pub encryption_key: Option<String>,
    /// API key for the completion service. Unset disables AI-assisted
    /// routing.
    pub completion_api_key: Option<String>,
    pub completion_model: String,
    /// Path of the SQLite file shared by producers and queue workers.
    pub queue_path: String,
    pub assisted_routing: bool,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let completion_api_key = env::var("OPENAI_API_KEY").ok();
        let assisted_routing = match env::var("SWITCHBOARD_ROUTING").as_deref() {
            Ok("pattern") => false,
            Ok("assisted") => true,
            _ => completion_api_key.is_some(),
        };
        Self {
            encryption_key: env::var("SWITCHBOARD_ENCRYPTION_KEY").ok(),
            completion_api_key,
            completion_model: env::var("SWITCHBOARD_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            queue_path: env::var("SWITCHBOARD_QUEUE_DB").unwrap_or_else(|_| "switchboard-queue.db".to_string()),
            assisted_routing,
        }
    }
}
