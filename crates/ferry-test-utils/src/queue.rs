//! A recording wrapper around [`LocalQueue`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ferry_core::JobId;
use ferry_flow::error::{Error, Result};
use ferry_flow::job::{Job, JobKind};
use ferry_flow::network::DependencyNetwork;
use ferry_flow::queue::{EnqueueResult, JobInfo, LocalQueue, Queue, QueueStats};

/// One recorded `put` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecord {
    /// The submitted job.
    pub job_id: JobId,
    /// The job's kind.
    pub kind: JobKind,
    /// Whether the put succeeded.
    pub accepted: bool,
}

/// A [`LocalQueue`] that records every put and can fail chosen puts.
pub struct RecordingQueue {
    inner: LocalQueue,
    puts: Mutex<Vec<PutRecord>>,
    fail_puts: Mutex<HashSet<JobId>>,
}

impl RecordingQueue {
    /// Wraps a new local queue over `network`.
    pub fn new(network: Arc<dyn DependencyNetwork>, workers: usize) -> Self {
        Self::wrap(LocalQueue::new(network, workers))
    }

    /// Wraps an existing queue.
    pub fn wrap(inner: LocalQueue) -> Self {
        Self {
            inner,
            puts: Mutex::new(Vec::new()),
            fail_puts: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every future put of `job_id` fail.
    pub fn fail_put(&self, job_id: &str) {
        self.fail_puts.lock().unwrap().insert(JobId::new(job_id));
    }

    /// Returns the wrapped queue.
    pub fn local(&self) -> &LocalQueue {
        &self.inner
    }

    /// Returns every recorded put, in call order.
    pub fn puts(&self) -> Vec<PutRecord> {
        self.puts.lock().unwrap().clone()
    }

    /// Returns the ids of accepted puts of `kind`, in call order.
    pub fn accepted(&self, kind: JobKind) -> Vec<String> {
        self.puts()
            .into_iter()
            .filter(|put| put.accepted && put.kind == kind)
            .map(|put| put.job_id.to_string())
            .collect()
    }

    /// Returns the ids of accepted migration puts, in call order.
    pub fn submitted_migrations(&self) -> Vec<String> {
        self.accepted(JobKind::Migration)
    }

    /// Returns the number of put attempts for migration jobs.
    pub fn migration_attempts(&self) -> usize {
        self.puts()
            .iter()
            .filter(|put| put.kind == JobKind::Migration)
            .count()
    }

    /// Returns a snapshot of every job in the wrapped queue.
    pub fn jobs(&self) -> Vec<JobInfo> {
        self.inner.jobs()
    }
}

#[async_trait]
impl Queue for RecordingQueue {
    async fn put(&self, job: Arc<dyn Job>) -> Result<EnqueueResult> {
        let job_id = job.id().clone();
        let kind = job.kind();

        let result = if self.fail_puts.lock().unwrap().contains(&job_id) {
            Err(Error::storage(format!("injected put failure for {job_id}")))
        } else {
            self.inner.put(job).await
        };

        self.puts.lock().unwrap().push(PutRecord {
            job_id,
            kind,
            accepted: matches!(result, Ok(EnqueueResult::Enqueued { .. })),
        });
        result
    }

    fn stats(&self) -> QueueStats {
        self.inner.stats()
    }

    async fn changed(&self) {
        self.inner.changed().await;
    }

    fn resolve_errors(&self) -> Result<()> {
        self.inner.resolve_errors()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
