//! In-process queue running jobs on tokio tasks.
//!
//! ## Scheduling
//!
//! A pending job starts once a worker slot is free and all of its
//! prerequisites have completed:
//!
//! - every job named by [`Job::dependencies`];
//! - for a generation job, every generation job under an ancestor of its node;
//! - for a migration job, every job of either kind under an ancestor of its
//!   node.
//!
//! If a prerequisite fails or is skipped, the job is skipped too. Ready jobs
//! start in submission order.
//!
//! Readiness is tracked incrementally. Each node keeps counts of its
//! unfinished jobs and the ids of its failed ones, so checking a job costs
//! one lookup per ancestor node and explicit dependency. A finishing job
//! only re-checks the jobs that name it and the waiting jobs of downstream
//! nodes whose prerequisites it could have released.
//!
//! ## Limitations
//!
//! - **Single-process only**: job state is held in memory.
//! - **No retries**: a failed job stays failed until it is put again.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use ferry_core::observability::job_span;
use ferry_core::{GeneratorId, JobId};

use super::{EnqueueResult, JobInfo, JobStatus, Queue, QueueStats};
use crate::catcher::ErrorCatcher;
use crate::error::{Error, Result};
use crate::job::{Job, JobError, JobErrorCategory, JobKind};
use crate::metrics::FlowMetrics;
use crate::network::DependencyNetwork;

/// Name used when none is given.
pub const DEFAULT_QUEUE_NAME: &str = "local";

const GENERATION: usize = 0;
const MIGRATION: usize = 1;

const fn slot(kind: JobKind) -> usize {
    match kind {
        JobKind::Generation => GENERATION,
        JobKind::Migration => MIGRATION,
    }
}

/// Job kinds under an ancestor node that a job of `kind` waits for.
const fn upstream_slots(kind: JobKind) -> &'static [usize] {
    match kind {
        JobKind::Generation => &[GENERATION],
        JobKind::Migration => &[GENERATION, MIGRATION],
    }
}

fn status_count(stats: &mut QueueStats, status: JobStatus) -> &mut usize {
    match status {
        JobStatus::Pending => &mut stats.pending,
        JobStatus::Running => &mut stats.running,
        JobStatus::Completed => &mut stats.completed,
        JobStatus::Failed => &mut stats.failed,
        JobStatus::Skipped => &mut stats.skipped,
    }
}

enum Failure {
    Job(JobError),
    Upstream(JobId),
}

struct JobRecord {
    seq: u64,
    job: Arc<dyn Job>,
    kind: JobKind,
    status: JobStatus,
    explicit: Vec<JobId>,
    ancestors: Vec<GeneratorId>,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    finished_at: Option<DateTime<Utc>>,
    failure: Option<Failure>,
}

impl JobRecord {
    fn finish(&mut self, status: JobStatus, failure: Option<Failure>) {
        self.status = status;
        self.failure = failure;
        self.finished_at = Some(Utc::now());
    }

    fn info(&self) -> JobInfo {
        JobInfo {
            id: self.job.id().clone(),
            node: self.job.node().clone(),
            kind: self.kind,
            status: self.status,
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            error: self.failure.as_ref().map(|failure| match failure {
                Failure::Job(err) => err.to_string(),
                Failure::Upstream(upstream) => format!("upstream {upstream} did not succeed"),
            }),
        }
    }
}

/// Bookkeeping for the jobs under one network node, indexed by job kind.
#[derive(Default)]
struct NodeState {
    unfinished: [usize; 2],
    /// Failed or skipped jobs, keyed by submission sequence.
    failed: [BTreeMap<u64, JobId>; 2],
    /// Pending jobs whose prerequisites are not yet complete.
    waiting: [BTreeMap<u64, JobId>; 2],
    /// Nodes that have this node as an ancestor.
    dependents: BTreeSet<GeneratorId>,
}

#[derive(Default)]
struct QueueState {
    records: HashMap<JobId, JobRecord>,
    order: Vec<JobId>,
    nodes: HashMap<GeneratorId, NodeState>,
    /// Jobs naming the key in [`Job::dependencies`].
    dependents: HashMap<JobId, HashSet<JobId>>,
    /// Pending jobs with every prerequisite complete, keyed by submission sequence.
    ready: BTreeMap<u64, JobId>,
    /// Jobs that reached a terminal status and have not woken their dependents yet.
    finished: Vec<JobId>,
    /// Skips not yet logged, as (job, upstream, kind).
    skipped: Vec<(JobId, JobId, JobKind)>,
    stats: QueueStats,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    /// Adds a pending job, replacing a terminal record with the same id.
    ///
    /// Returns true when a record was replaced.
    fn insert(
        &mut self,
        job: Arc<dyn Job>,
        explicit: Vec<JobId>,
        ancestors: Vec<GeneratorId>,
    ) -> bool {
        let id = job.id().clone();
        let node = job.node().clone();
        let kind = job.kind();
        let seq = self.next_seq;
        self.next_seq += 1;

        for ancestor in &ancestors {
            self.nodes
                .entry(ancestor.clone())
                .or_default()
                .dependents
                .insert(node.clone());
        }
        for dependency in &explicit {
            self.dependents
                .entry(dependency.clone())
                .or_default()
                .insert(id.clone());
        }
        self.nodes.entry(node).or_default().unfinished[slot(kind)] += 1;
        self.stats.pending += 1;

        let record = JobRecord {
            seq,
            job,
            kind,
            status: JobStatus::Pending,
            explicit,
            ancestors,
            submitted_at: Utc::now(),
            started_at: None,
            started: None,
            finished_at: None,
            failure: None,
        };
        let replaced = match self.records.insert(id.clone(), record) {
            Some(old) => {
                *status_count(&mut self.stats, old.status) -= 1;
                if let Some(state) = self.nodes.get_mut(old.job.node()) {
                    state.failed[slot(old.kind)].remove(&old.seq);
                }
                true
            }
            None => {
                self.order.push(id.clone());
                self.stats.total += 1;
                false
            }
        };
        self.evaluate(&id);
        replaced
    }

    fn readiness(&self, record: &JobRecord) -> Readiness {
        let mut waiting = false;
        for id in &record.explicit {
            match self.records.get(id).map(|upstream| upstream.status) {
                Some(JobStatus::Completed) => {}
                Some(JobStatus::Pending | JobStatus::Running) => waiting = true,
                Some(JobStatus::Failed | JobStatus::Skipped) | None => {
                    return Readiness::Blocked(id.clone());
                }
            }
        }

        let slots = upstream_slots(record.kind);
        for state in record.ancestors.iter().filter_map(|node| self.nodes.get(node)) {
            for &kind in slots {
                if let Some(upstream) = state.failed[kind].values().next() {
                    return Readiness::Blocked(upstream.clone());
                }
                waiting |= state.unfinished[kind] > 0;
            }
        }

        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    /// Files a pending job as ready or waiting, or skips it.
    fn evaluate(&mut self, id: &JobId) {
        let Some(record) = self.records.get(id) else {
            return;
        };
        if record.status != JobStatus::Pending {
            return;
        }
        let seq = record.seq;
        let kind = slot(record.kind);
        let node = record.job.node().clone();
        let readiness = self.readiness(record);

        self.ready.remove(&seq);
        if let Some(state) = self.nodes.get_mut(&node) {
            state.waiting[kind].remove(&seq);
        }
        match readiness {
            Readiness::Ready => {
                self.ready.insert(seq, id.clone());
            }
            Readiness::Waiting => {
                if let Some(state) = self.nodes.get_mut(&node) {
                    state.waiting[kind].insert(seq, id.clone());
                }
            }
            Readiness::Blocked(upstream) => {
                self.complete(id, JobStatus::Skipped, Some(Failure::Upstream(upstream)));
            }
        }
    }

    /// Moves an unfinished job to a terminal status.
    fn complete(&mut self, id: &JobId, status: JobStatus, failure: Option<Failure>) {
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        let previous = record.status;
        if previous.is_terminal() {
            return;
        }
        if let Some(Failure::Upstream(upstream)) = &failure {
            self.skipped.push((id.clone(), upstream.clone(), record.kind));
        }
        record.finish(status, failure);

        let seq = record.seq;
        let kind = slot(record.kind);
        *status_count(&mut self.stats, previous) -= 1;
        *status_count(&mut self.stats, status) += 1;
        if let Some(state) = self.nodes.get_mut(record.job.node()) {
            state.unfinished[kind] = state.unfinished[kind].saturating_sub(1);
            state.waiting[kind].remove(&seq);
            if status != JobStatus::Completed {
                state.failed[kind].insert(seq, id.clone());
            }
        }
        self.ready.remove(&seq);
        self.finished.push(id.clone());
    }

    /// Re-checks the jobs a finished job could have released or blocked.
    fn wake(&mut self, id: &JobId) {
        let Some(record) = self.records.get(id) else {
            return;
        };
        let failed = record.status != JobStatus::Completed;
        let from_generation = record.kind == JobKind::Generation;

        let mut woken: Vec<JobId> = self
            .dependents
            .get(id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        if let Some(state) = self.nodes.get(record.job.node()) {
            let generations =
                from_generation && (failed || state.unfinished[GENERATION] == 0);
            let migrations = failed || state.unfinished == [0, 0];
            for node in &state.dependents {
                let Some(downstream) = self.nodes.get(node) else {
                    continue;
                };
                if generations {
                    woken.extend(downstream.waiting[GENERATION].values().cloned());
                }
                if migrations {
                    woken.extend(downstream.waiting[MIGRATION].values().cloned());
                }
            }
        }

        for job_id in &woken {
            self.evaluate(job_id);
        }

        let records = &self.records;
        if let Some(ids) = self.dependents.get_mut(id) {
            ids.retain(|dependent| {
                records
                    .get(dependent)
                    .is_some_and(|record| record.status == JobStatus::Pending)
            });
        }
    }

    /// Propagates finished jobs and claims ready jobs for free worker slots.
    fn settle(&mut self, workers: usize) -> Vec<Arc<dyn Job>> {
        let mut started = Vec::new();
        loop {
            if let Some(id) = self.finished.pop() {
                self.wake(&id);
                continue;
            }
            if self.stats.running >= workers {
                break;
            }
            let Some((_, id)) = self.ready.pop_first() else {
                break;
            };
            let ready = self
                .records
                .get(&id)
                .is_some_and(|record| matches!(self.readiness(record), Readiness::Ready));
            if !ready {
                self.evaluate(&id);
                continue;
            }
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
            record.started = Some(Instant::now());
            started.push(Arc::clone(&record.job));
            self.stats.pending -= 1;
            self.stats.running += 1;
        }
        started
    }
}

enum Readiness {
    Ready,
    Waiting,
    Blocked(JobId),
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("local queue lock poisoned")
}

struct Inner {
    name: String,
    network: Arc<dyn DependencyNetwork>,
    workers: usize,
    capacity: Option<usize>,
    state: Mutex<QueueState>,
    notify: Notify,
    shutdown: CancellationToken,
    metrics: FlowMetrics,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts every ready job that fits in the free worker slots and skips
    /// every job whose prerequisites cannot succeed.
    fn dispatch(self: &Arc<Self>) {
        let (to_start, skipped, depth) = {
            let mut state = self.lock();
            let to_start = state.settle(self.workers);
            let skipped = std::mem::take(&mut state.skipped);
            (to_start, skipped, state.stats.unfinished())
        };

        for (id, upstream, kind) in skipped {
            tracing::info!(
                queue = %self.name,
                job_id = %id,
                upstream = %upstream,
                "skipping job, prerequisite did not succeed"
            );
            self.metrics
                .record_job_finished(kind.as_str(), JobStatus::Skipped.as_str(), None);
        }
        for job in to_start {
            self.spawn(job);
        }
        self.metrics.set_queue_depth(&self.name, depth);
        self.notify.notify_one();
    }

    fn spawn(self: &Arc<Self>, job: Arc<dyn Job>) {
        let inner = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let span = job_span(&self.name, job.id().as_str(), job.kind().as_str());

        tokio::spawn(
            async move {
                let id = job.id().clone();
                tracing::debug!("job started");
                let runner = Arc::clone(&job);
                let handle = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => Err(JobError::cancelled()),
                        result = runner.run(cancel.clone()) => result,
                    }
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(err) => Err(JobError::new(
                        JobErrorCategory::Infrastructure,
                        format!("job task did not complete: {err}"),
                    )),
                };
                inner.finish(&id, result);
            }
            .instrument(span),
        );
    }

    fn finish(self: &Arc<Self>, id: &JobId, result: std::result::Result<(), JobError>) {
        let outcome = {
            let mut state = self.lock();
            let running = state
                .records
                .get(id)
                .filter(|record| record.status == JobStatus::Running)
                .map(|record| (record.kind, record.started.map(|started| started.elapsed())));
            running.map(|(kind, duration)| {
                let status = match result {
                    Ok(()) => {
                        state.complete(id, JobStatus::Completed, None);
                        JobStatus::Completed
                    }
                    Err(err) => {
                        tracing::warn!(job_id = %id, error = %err, "job failed");
                        state.complete(id, JobStatus::Failed, Some(Failure::Job(err)));
                        JobStatus::Failed
                    }
                };
                (kind, status, duration)
            })
        };

        if let Some((kind, status, duration)) = outcome {
            tracing::debug!(job_id = %id, status = %status, "job finished");
            self.metrics
                .record_job_finished(kind.as_str(), status.as_str(), duration);
        }
        self.dispatch();
    }
}

/// In-process [`Queue`] with bounded parallelism.
///
/// Cloning is cheap; clones share the same jobs and workers.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use ferry_flow::network::DependencyGraph;
/// use ferry_flow::queue::{LocalQueue, Queue};
///
/// let queue = LocalQueue::new(Arc::new(DependencyGraph::new()), 4);
/// assert!(queue.stats().is_idle());
/// ```
#[derive(Clone)]
pub struct LocalQueue {
    inner: Arc<Inner>,
}

impl LocalQueue {
    /// Creates a queue running at most `workers` jobs at once.
    #[must_use]
    pub fn new(network: Arc<dyn DependencyNetwork>, workers: usize) -> Self {
        Self::with_options(DEFAULT_QUEUE_NAME, network, workers, None)
    }

    /// Creates a named queue with an optional cap on unfinished jobs.
    #[must_use]
    pub fn with_options(
        name: impl Into<String>,
        network: Arc<dyn DependencyNetwork>,
        workers: usize,
        capacity: Option<usize>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                network,
                workers: workers.max(1),
                capacity,
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
                metrics: FlowMetrics::new(),
            }),
        }
    }

    /// Returns the maximum number of concurrently running jobs.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Returns the dependency network the queue schedules against.
    #[must_use]
    pub fn network(&self) -> &Arc<dyn DependencyNetwork> {
        &self.inner.network
    }

    /// Returns a snapshot of every job, in submission order.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobInfo> {
        let state = self.inner.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.records.get(id))
            .map(JobRecord::info)
            .collect()
    }

    /// Returns a snapshot of one job.
    #[must_use]
    pub fn job(&self, id: &JobId) -> Option<JobInfo> {
        self.inner.lock().records.get(id).map(JobRecord::info)
    }

    /// Stops accepting jobs and cancels everything unfinished.
    ///
    /// Pending jobs fail immediately; running jobs see their cancellation
    /// token fire.
    pub fn close(&self) {
        let cancelled = {
            let mut state = self.inner.lock();
            state.closed = true;
            let pending: Vec<(JobId, JobKind)> = state
                .order
                .iter()
                .filter_map(|id| {
                    state
                        .records
                        .get(id)
                        .filter(|record| record.status == JobStatus::Pending)
                        .map(|record| (id.clone(), record.kind))
                })
                .collect();
            for (id, _) in &pending {
                state.complete(id, JobStatus::Failed, Some(Failure::Job(JobError::cancelled())));
            }
            pending
        };

        self.inner.shutdown.cancel();
        for (_, kind) in &cancelled {
            self.inner
                .metrics
                .record_job_finished(kind.as_str(), JobStatus::Failed.as_str(), None);
        }
        tracing::info!(
            queue = %self.inner.name,
            cancelled_pending = cancelled.len(),
            "queue closed"
        );
        self.inner.notify.notify_one();
    }

    /// Returns true once [`LocalQueue::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQueue")
            .field("name", &self.inner.name)
            .field("workers", &self.inner.workers)
            .field("capacity", &self.inner.capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Queue for LocalQueue {
    async fn put(&self, job: Arc<dyn Job>) -> Result<EnqueueResult> {
        let id = job.id().clone();
        let node = job.node().clone();
        let dependencies = job.dependencies();

        if dependencies.contains(&id) {
            return Err(Error::CycleDetected {
                cycle: vec![id.to_string()],
            });
        }
        let ancestors = self.inner.network.ancestors(&node)?;

        let mut state = self.inner.state.lock().map_err(poison_err)?;
        if state.closed {
            return Err(Error::QueueClosed {
                queue: self.inner.name.clone(),
            });
        }
        if let Some(missing) = dependencies
            .iter()
            .find(|dependency| !state.records.contains_key(*dependency))
        {
            return Err(Error::UnknownJob {
                job_id: id,
                dependency: missing.clone(),
            });
        }

        if let Some(record) = state.records.get(&id) {
            if !record.status.is_terminal() {
                return Ok(EnqueueResult::Deduplicated {
                    existing_job_id: id,
                });
            }
        }
        if let Some(capacity) = self.inner.capacity {
            if state.stats.unfinished() >= capacity {
                return Ok(EnqueueResult::QueueFull);
            }
        }

        let rerun = state.insert(job, dependencies, ancestors);
        drop(state);

        tracing::debug!(
            queue = %self.inner.name,
            job_id = %id,
            node = %node,
            rerun,
            "job accepted"
        );
        self.inner.dispatch();
        Ok(EnqueueResult::Enqueued { job_id: id })
    }

    fn stats(&self) -> QueueStats {
        self.inner.lock().stats
    }

    async fn changed(&self) {
        self.inner.notify.notified().await;
    }

    fn resolve_errors(&self) -> Result<()> {
        let state = self.inner.state.lock().map_err(poison_err)?;
        let mut catcher = ErrorCatcher::new();
        for id in &state.order {
            let Some(record) = state.records.get(id) else {
                continue;
            };
            match &record.failure {
                Some(Failure::Job(err)) => catcher.push(Error::JobFailed {
                    job_id: id.clone(),
                    message: err.to_string(),
                }),
                Some(Failure::Upstream(upstream)) => catcher.push(Error::UpstreamFailed {
                    job_id: id.clone(),
                    upstream: upstream.clone(),
                }),
                None => {}
            }
        }
        drop(state);
        catcher.resolve()
    }

    fn name(&self) -> &str {
        &self.inner.name
    }
}
