use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info};

use crate::connectors::Connector;
use crate::queue::{JobQueue, JobResult};

/// Bounded wait per pop; an empty queue just loops.
const POP_WAIT: Duration = Duration::from_secs(1);

/// Queue consumer bound to one provider type and one connector instance.
/// Credentials come from the worker process's own configuration, not the
/// per-user store. Delivery is best-effort: a crash between pop and result
/// write loses that job.
pub struct QueueWorker {
    queue: Arc<JobQueue>,
    connector: Arc<dyn Connector>,
    credentials: HashMap<String, String>,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<JobQueue>,
        connector: Arc<dyn Connector>,
        credentials: HashMap<String, String>,
    ) -> Self {
        Self {
            queue,
            connector,
            credentials,
        }
    }

    /// Drain the queue forever. Only store-connectivity failures escape.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Worker started for provider type '{}'",
            self.connector.provider_type()
        );
        loop {
            self.process_next(POP_WAIT).await?;
        }
    }

    /// Pop and execute at most one job, waiting up to `wait` for one to
    /// appear. Returns the processed job id, or `None` on an empty queue.
    pub async fn process_next(&self, wait: Duration) -> Result<Option<String>> {
        let provider_type = self.connector.provider_type();
        let Some(job) = self.queue.dequeue(provider_type, wait).await? else {
            return Ok(None);
        };

        info!("Processing job {} ({})", job.job_id, job.tool_name);
        let result = self.execute(&job.tool_name, &job.parameters).await;
        if let JobResult { error: Some(e), .. } = &result {
            error!("Job {} failed: {}", job.job_id, e);
        }
        self.queue.write_result(&job.job_id, &result).await?;
        Ok(Some(job.job_id))
    }

    async fn execute(&self, tool_name: &str, parameters: &Value) -> JobResult {
        self.connector.apply_credentials(&self.credentials).await;

        if !self.connector.tool_names().contains(&tool_name) {
            return JobResult::failed(format!("Tool '{}' not found", tool_name));
        }

        match self.connector.call_tool(tool_name, parameters).await {
            Ok(output) => JobResult::completed(Value::String(output)),
            Err(e) => JobResult::failed(e.to_string()),
        }
    }
}
