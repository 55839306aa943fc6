//! Queue abstraction for running jobs.
//!
//! This module provides:
//!
//! - [`Queue`]: the contract the orchestrator needs from an execution engine
//! - [`LocalQueue`]: an in-process engine running jobs on tokio tasks
//!
//! A queue owns the execution lifecycle of every job put into it. It decides
//! when a job may start by consulting the shared
//! [`DependencyNetwork`](crate::network::DependencyNetwork), runs independent
//! jobs in parallel, and remembers failures until they are resolved.

pub mod local;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ferry_core::{GeneratorId, JobId};

use crate::error::Result;
use crate::job::{Job, JobKind};

pub use local::LocalQueue;

/// Result of putting a job into a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueResult {
    /// The job was accepted.
    Enqueued {
        /// The accepted job.
        job_id: JobId,
    },
    /// A job with the same id is still pending or running.
    Deduplicated {
        /// The in-flight job.
        existing_job_id: JobId,
    },
    /// The queue is at capacity.
    QueueFull,
}

impl EnqueueResult {
    /// Returns true if the job was accepted.
    #[must_use]
    pub const fn is_enqueued(&self) -> bool {
        matches!(self, Self::Enqueued { .. })
    }

    /// Returns the label used for submission metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Deduplicated { .. } => "deduplicated",
            Self::QueueFull => "queue_full",
        }
    }
}

/// Lifecycle status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting for its prerequisites or a free worker.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Never ran because a prerequisite did not succeed.
    Skipped,
}

impl JobStatus {
    /// Returns true for statuses a job never leaves.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts of jobs by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Every job the queue knows about.
    pub total: usize,
    /// Jobs waiting to start.
    pub pending: usize,
    /// Jobs executing.
    pub running: usize,
    /// Jobs that succeeded.
    pub completed: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Jobs skipped because a prerequisite did not succeed.
    pub skipped: usize,
}

impl QueueStats {
    /// Returns true when nothing is pending or running.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    /// Returns the number of jobs not yet finished.
    #[must_use]
    pub const fn unfinished(&self) -> usize {
        self.pending + self.running
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} pending={} running={} completed={} failed={} skipped={}",
            self.total, self.pending, self.running, self.completed, self.failed, self.skipped
        )
    }
}

/// Snapshot of one job's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    /// Job id.
    pub id: JobId,
    /// Dependency-network node the job runs under.
    pub node: GeneratorId,
    /// Job kind.
    pub kind: JobKind,
    /// Current status.
    pub status: JobStatus,
    /// When the job was accepted.
    pub submitted_at: DateTime<Utc>,
    /// When the job started executing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure or skip reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A parallel job-execution engine.
///
/// ## Thread Safety
///
/// All methods take `&self`; implementations are shared between the
/// orchestrator and their own workers.
///
/// ## Example
///
/// ```rust,ignore
/// use ferry_flow::queue::Queue;
///
/// async fn submit(queue: &dyn Queue, job: Arc<dyn Job>) -> Result<()> {
///     let result = queue.put(job).await?;
///     if !result.is_enqueued() {
///         tracing::warn!(?result, "job not accepted");
///     }
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Queue: Send + Sync {
    /// Accepts a job for execution.
    ///
    /// Cancellation is not threaded through `put`: accepting a job never
    /// blocks, and cancelling a running job is the queue's own concern.
    ///
    /// # Errors
    ///
    /// Returns an error if the job cannot be scheduled, for example because
    /// its node is part of a cycle or it depends on an unknown job.
    async fn put(&self, job: Arc<dyn Job>) -> Result<EnqueueResult>;

    /// Returns current job counts.
    fn stats(&self) -> QueueStats;

    /// Resolves when the queue's state may have changed.
    ///
    /// The default never resolves; callers fall back to polling
    /// [`Queue::stats`].
    async fn changed(&self) {
        std::future::pending::<()>().await;
    }

    /// Combines the failures of every job the queue has finished.
    ///
    /// # Errors
    ///
    /// Returns one error per failed or skipped job, aggregated.
    fn resolve_errors(&self) -> Result<()>;

    /// Returns the queue's name.
    fn name(&self) -> &str;
}
