//! Queue worker process: binds one provider type, drains its queue, and
//! writes TTL'd result records for pollers.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard::connectors::github::GithubConnector;
use switchboard::{Connector, EngineConfig, JobQueue, QueueWorker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::from_env();
    let provider_type =
        std::env::var("SWITCHBOARD_PROVIDER").unwrap_or_else(|_| "github".to_string());

    let connector: Arc<dyn Connector> = match provider_type.as_str() {
        "github" => Arc::new(GithubConnector::new()),
        other => bail!("unsupported provider type: {}", other),
    };

    let mut credentials = HashMap::new();
    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        credentials.insert("github_token".to_string(), token);
    }

    info!("Opening job queue at {}", config.queue_path);
    let queue = Arc::new(JobQueue::open(&config.queue_path)?);

    QueueWorker::new(queue, connector, credentials).run().await
}
