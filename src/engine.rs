use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use crate::connectors::ConnectorCatalog;
use crate::dispatch::Dispatcher;
use crate::queue::{JobQueue, JobResult};
use crate::registry::{ConnectorRegistry, ConnectorSummary};
use crate::routing::{ChatTurn, RoutingEngine, RoutingMode, patterns};
use crate::store::ConnectorStore;

/// Composition root for one user's orchestration session: registry +
/// routing strategy + dispatcher + queue, constructed and passed in
/// explicitly. Scope one engine per request context; `initialize`/`reload`
/// are not designed for concurrent callers on the same instance.
pub struct Engine {
    registry: ConnectorRegistry,
    routing: RoutingEngine,
    dispatcher: Dispatcher,
    queue: Arc<JobQueue>,
}

impl Engine {
    pub fn new(
        user_id: i64,
        store: Arc<ConnectorStore>,
        catalog: Arc<ConnectorCatalog>,
        routing: RoutingEngine,
        queue: Arc<JobQueue>,
    ) -> Self {
        Self {
            registry: ConnectorRegistry::new(user_id, store, catalog),
            routing,
            dispatcher: Dispatcher::new(),
            queue,
        }
    }

    /// Route a message to a tool call and return the reply text. With
    /// conversation history and AI-assisted routing, the contextual path is
    /// used instead of single-shot resolution.
    pub async fn resolve_and_dispatch(
        &mut self,
        message: &str,
        explicit_connector: Option<i64>,
        history: &[ChatTurn],
    ) -> Result<String> {
        self.registry.initialize().await?;

        if !history.is_empty() && self.routing.mode() == RoutingMode::Assisted {
            return Ok(self.chat_with_context(message, explicit_connector, history).await);
        }

        let action = self.routing.resolve(message, &self.registry).await;
        Ok(self
            .dispatcher
            .execute(&action, &self.registry, explicit_connector)
            .await)
    }

    /// Contextual chat: the completion reply may embed a fenced JSON action
    /// block, which is dispatched and concatenated after the prose. Any
    /// failure inside the combining step returns the raw reply; a
    /// completion failure falls back to pattern routing.
    async fn chat_with_context(
        &self,
        message: &str,
        explicit_connector: Option<i64>,
        history: &[ChatTurn],
    ) -> String {
        match self
            .routing
            .contextual_reply(&self.registry, history, message)
            .await
        {
            Ok(reply) => {
                let Some((prose, action)) = crate::routing::assist::extract_embedded_action(&reply)
                else {
                    return reply;
                };
                let result = self
                    .dispatcher
                    .execute(&action, &self.registry, explicit_connector)
                    .await;
                if prose.is_empty() {
                    result
                } else {
                    format!("{}\n\n{}", prose, result)
                }
            }
            Err(e) => {
                warn!("Contextual completion failed, using pattern routing: {}", e);
                let action = patterns::resolve(message);
                self.dispatcher
                    .execute(&action, &self.registry, explicit_connector)
                    .await
            }
        }
    }

    pub async fn list_available_connectors(&mut self) -> Result<Vec<ConnectorSummary>> {
        self.registry.initialize().await?;
        Ok(self.registry.list_available())
    }

    /// Re-read the user's connector configuration from the store.
    pub async fn reload_connectors(&mut self) -> Result<()> {
        self.registry.reload().await
    }

    /// Submit a job for asynchronous execution by a worker process.
    pub async fn enqueue_job(
        &self,
        provider_type: &str,
        tool_name: &str,
        parameters: Value,
    ) -> Result<String> {
        self.queue.enqueue(provider_type, tool_name, parameters).await
    }

    /// Poll a job's result. A missing or expired record reports pending.
    pub async fn get_job_result(&self, job_id: &str) -> Result<JobResult> {
        Ok(self
            .queue
            .get_result(job_id)
            .await?
            .unwrap_or_else(JobResult::pending))
    }

    /// Wait for a job's result, polling up to the user's configured
    /// timeout.
    pub async fn wait_for_job_result(&self, job_id: &str) -> Result<JobResult> {
        let timeout = self.registry.preferences().await.timeout_seconds;
        Ok(self
            .queue
            .wait_for_result(job_id, timeout)
            .await?
            .unwrap_or_else(JobResult::pending))
    }
}
