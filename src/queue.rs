use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Result records are purged this long after being written.
pub const RESULT_TTL_SECS: i64 = 3600;

/// Poll interval while a bounded dequeue wait is in progress.
const DEQUEUE_POLL: Duration = Duration::from_millis(100);

/// Poll interval for result waiting.
const RESULT_POLL: Duration = Duration::from_secs(1);

/// The serialized unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    pub job_id: String,
    pub tool_name: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Not yet picked up, or the result has expired - the two are
    /// indistinguishable without additional state.
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobResult {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: Value) -> Self {
        Self {
            status: JobStatus::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Durable producer/consumer job handoff: FIFO per provider type plus a
/// keyed result store with TTL, in one SQLite file shared across the
/// producer and worker processes. Delivery is at-most-once: a worker crash
/// between pop and result write loses the job.
pub struct JobQueue {
    db: Arc<Mutex<Connection>>,
}

impl JobQueue {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Connection::open(path.as_ref()).context("job queue unavailable")?;
        Self::from_connection(db)
    }

    /// In-memory queue for tests. Not shared across processes.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        // Competing consumers in other processes hold short write locks.
        db.busy_timeout(Duration::from_secs(5))?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                provider_type TEXT NOT NULL,
                payload TEXT NOT NULL
            )",
            [],
        )?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS job_results (
                job_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Append a job to the tail of the provider type's queue. Returns as
    /// soon as the descriptor is durably written; never blocks on
    /// execution.
    pub async fn enqueue(&self, provider_type: &str, tool_name: &str, parameters: Value) -> Result<String> {
        let descriptor = JobDescriptor {
            job_id: Uuid::new_v4().to_string(),
            tool_name: tool_name.to_string(),
            parameters,
        };
        let payload = serde_json::to_string(&descriptor)?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (provider_type, payload) VALUES (?1, ?2)",
            params![provider_type, payload],
        )
        .context("job queue unavailable")?;

        info!("Enqueued job {} for {}", descriptor.job_id, provider_type);
        Ok(descriptor.job_id)
    }

    /// Pop the head of the provider type's queue, waiting up to `wait` for
    /// one to appear. The delete-returning statement guarantees a given job
    /// is delivered to exactly one concurrent popper. An empty queue after
    /// the wait is `None`, not an error.
    pub async fn dequeue(&self, provider_type: &str, wait: Duration) -> Result<Option<JobDescriptor>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(descriptor) = self.try_pop(provider_type).await? {
                return Ok(Some(descriptor));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(DEQUEUE_POLL).await;
        }
    }

    async fn try_pop(&self, provider_type: &str) -> Result<Option<JobDescriptor>> {
        let db = self.db.lock().await;
        let payload: Option<String> = db
            .query_row(
                "DELETE FROM jobs WHERE seq = (
                     SELECT seq FROM jobs WHERE provider_type = ?1 ORDER BY seq LIMIT 1
                 ) RETURNING payload",
                params![provider_type],
                |row| row.get(0),
            )
            .optional()
            .context("job queue unavailable")?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Write the job's result record with a fixed expiry.
    pub async fn write_result(&self, job_id: &str, result: &JobResult) -> Result<()> {
        self.write_result_expiring(job_id, result, now_unix() + RESULT_TTL_SECS)
            .await
    }

    async fn write_result_expiring(&self, job_id: &str, result: &JobResult, expires_at: i64) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO job_results (job_id, payload, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET payload = excluded.payload, expires_at = excluded.expires_at",
            params![job_id, payload, expires_at],
        )
        .context("job queue unavailable")?;
        Ok(())
    }

    /// Side-effect-free read apart from purging an expired row. A missing
    /// or expired record reads as `None`: the job may simply not have been
    /// picked up yet.
    pub async fn get_result(&self, job_id: &str) -> Result<Option<JobResult>> {
        let db = self.db.lock().await;
        let row: Option<(String, i64)> = db
            .query_row(
                "SELECT payload, expires_at FROM job_results WHERE job_id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("job queue unavailable")?;

        let Some((payload, expires_at)) = row else {
            return Ok(None);
        };
        if expires_at <= now_unix() {
            db.execute("DELETE FROM job_results WHERE job_id = ?1", params![job_id])?;
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&payload)?))
    }

    /// Bounded busy-poll for a result: checks once a second up to the
    /// timeout, returning the first present record or `None`.
    pub async fn wait_for_result(&self, job_id: &str, timeout_seconds: u64) -> Result<Option<JobResult>> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);
        loop {
            if let Some(result) = self.get_result(job_id).await? {
                return Ok(Some(result));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RESULT_POLL).await;
        }
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
