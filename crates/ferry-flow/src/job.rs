//! Units of work accepted by a [`Queue`](crate::queue::Queue).
//!
//! The orchestrator submits two kinds of job:
//!
//! - [`GenerationJob`]: wraps a [`Generator`]; running it records the
//!   migrations the generator produced so they can be harvested afterwards.
//! - [`MigrationJob`]: wraps one harvested [`Migration`].
//!
//! Both are scheduled under their generator's node in the dependency network,
//! so a migration job never starts before every generator its generator
//! depends on, and everything those generators produced, has completed.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ferry_core::{GeneratorId, JobId};

use crate::generator::{Generator, Migration};

/// Which phase a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Runs a generator to produce migration jobs.
    Generation,
    /// Runs one migration.
    Migration,
}

impl JobKind {
    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Migration => "migration",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a job failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCategory {
    /// The migration body failed.
    #[default]
    Migration,
    /// A generator could not produce its migrations.
    Generation,
    /// The job observed cancellation and stopped.
    Cancelled,
    /// The queue could not run the job.
    Infrastructure,
}

impl fmt::Display for JobErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Migration => "migration",
            Self::Generation => "generation",
            Self::Cancelled => "cancelled",
            Self::Infrastructure => "infrastructure",
        };
        f.write_str(label)
    }
}

/// Error reported by a job body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{category} error: {message}")]
pub struct JobError {
    /// Error category.
    pub category: JobErrorCategory,
    /// Error message.
    pub message: String,
    /// Additional detail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl JobError {
    /// Creates a new job error.
    #[must_use]
    pub fn new(category: JobErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            detail: None,
        }
    }

    /// Creates a migration failure.
    #[must_use]
    pub fn migration(message: impl Into<String>) -> Self {
        Self::new(JobErrorCategory::Migration, message)
    }

    /// Creates a generation failure.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::new(JobErrorCategory::Generation, message)
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(JobErrorCategory::Cancelled, "job cancelled")
    }

    /// Sets the error detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A unit of work the queue can schedule and run.
///
/// ## Scheduling
///
/// A queue runs a job only after every job in [`Job::dependencies`] has
/// completed and every job submitted under an ancestor of [`Job::node`] in
/// the dependency network has completed.
#[async_trait]
pub trait Job: Send + Sync {
    /// Returns the job's identity within the queue.
    fn id(&self) -> &JobId;

    /// Returns the dependency-network node the job is scheduled under.
    fn node(&self) -> &GeneratorId;

    /// Returns jobs that must complete before this one, beyond those implied
    /// by the dependency network.
    fn dependencies(&self) -> Vec<JobId> {
        Vec::new()
    }

    /// Returns which phase the job belongs to.
    fn kind(&self) -> JobKind;

    /// Runs the job body.
    ///
    /// Implementations should return promptly once `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError>;
}

/// Outcome of a generation job, as seen after it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// The job has not run (or was skipped by the queue).
    NotRun,
    /// The generator produced this many migrations.
    Generated(usize),
    /// The generator failed.
    Failed(JobError),
}

enum GenerationState {
    NotRun,
    Generated(Vec<Arc<dyn Migration>>),
    Failed(JobError),
}

/// Queue-facing wrapper that runs a [`Generator`] and keeps what it produced.
pub struct GenerationJob {
    id: JobId,
    generator: Arc<dyn Generator>,
    state: Mutex<GenerationState>,
}

impl GenerationJob {
    /// Wraps a generator. The job id is `gen/{generator}`.
    #[must_use]
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            id: JobId::generation(generator.id()),
            generator,
            state: Mutex::new(GenerationState::NotRun),
        }
    }

    /// Returns the wrapped generator.
    #[must_use]
    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    /// Returns the outcome of the most recent run.
    #[must_use]
    pub fn outcome(&self) -> GenerationOutcome {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            GenerationState::NotRun => GenerationOutcome::NotRun,
            GenerationState::Generated(migrations) => {
                GenerationOutcome::Generated(migrations.len())
            }
            GenerationState::Failed(err) => GenerationOutcome::Failed(err.clone()),
        }
    }

    /// Returns the migrations produced by the most recent successful run, in
    /// yield order. Empty if the generator has not run or failed.
    #[must_use]
    pub fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            GenerationState::Generated(migrations) => migrations.clone(),
            GenerationState::NotRun | GenerationState::Failed(_) => Vec::new(),
        }
    }

    /// Wraps the produced migrations as queue jobs with stable ids.
    #[must_use]
    pub fn migration_jobs(&self) -> Vec<MigrationJob> {
        self.migrations()
            .into_iter()
            .enumerate()
            .map(|(index, migration)| MigrationJob::new(self.generator.id(), index, migration))
            .collect()
    }

    fn record(&self, state: GenerationState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl fmt::Debug for GenerationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationJob")
            .field("id", &self.id)
            .field("outcome", &self.outcome())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for GenerationJob {
    fn id(&self) -> &JobId {
        &self.id
    }

    fn node(&self) -> &GeneratorId {
        self.generator.id()
    }

    fn kind(&self) -> JobKind {
        JobKind::Generation
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        self.record(GenerationState::NotRun);
        match self.generator.generate(cancel).await {
            Ok(migrations) => {
                tracing::debug!(
                    generator = %self.generator.id(),
                    migrations = migrations.len(),
                    "generator produced migrations"
                );
                self.record(GenerationState::Generated(migrations));
                Ok(())
            }
            Err(err) => {
                self.record(GenerationState::Failed(err.clone()));
                Err(err)
            }
        }
    }
}

/// Queue-facing wrapper around one harvested [`Migration`].
#[derive(Clone)]
pub struct MigrationJob {
    id: JobId,
    node: GeneratorId,
    generation: JobId,
    migration: Arc<dyn Migration>,
}

impl MigrationJob {
    /// Wraps the `index`-th migration yielded by `generator`.
    #[must_use]
    pub fn new(generator: &GeneratorId, index: usize, migration: Arc<dyn Migration>) -> Self {
        Self {
            id: JobId::migration(generator, index),
            node: generator.clone(),
            generation: JobId::generation(generator),
            migration,
        }
    }

    /// Returns the wrapped migration.
    #[must_use]
    pub fn migration(&self) -> &Arc<dyn Migration> {
        &self.migration
    }
}

impl fmt::Debug for MigrationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationJob")
            .field("id", &self.id)
            .field("name", &self.migration.name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for MigrationJob {
    fn id(&self) -> &JobId {
        &self.id
    }

    fn node(&self) -> &GeneratorId {
        &self.node
    }

    fn dependencies(&self) -> Vec<JobId> {
        vec![self.generation.clone()]
    }

    fn kind(&self) -> JobKind {
        JobKind::Migration
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        self.migration.migrate(cancel).await
    }
}
