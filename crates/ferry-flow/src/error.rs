//! Error types for the orchestration domain.
//!
//! Variants fall into four classes:
//!
//! - **Configuration**: setup misuse, unconfigured environments, bad graphs.
//!   Fatal and not retryable.
//! - **Submission**: a job could not be enqueued. Collected per batch.
//! - **Cancellation**: the caller's token fired during a wait.
//! - **Execution**: a job failed inside the queue.
//!
//! Pipeline steps wrap their inner error with the phase they ran in, so
//! callers can match on the outer variant without inspecting sources.

use std::error::Error as StdError;
use std::fmt;

use ferry_core::{GeneratorId, JobId};

/// The result type used throughout ferry-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// The phase of a run in which a wait was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Generators are running and producing migration jobs.
    Generation,
    /// Harvested migration jobs are running.
    Migration,
}

impl Phase {
    /// Returns the label used in messages, logs, and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Migration => "migration",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `setup` was called on an application that already completed it.
    #[error("cannot setup an application more than once")]
    AlreadySetUp,

    /// `run` was called before a successful `setup`.
    #[error("cannot run an application before setup")]
    NotSetUp,

    /// The environment has not been given a queue and dependency network.
    #[error("cannot use an unconfigured environment")]
    EnvironmentNotConfigured,

    /// `configure` was called on an environment that already has resources.
    #[error("environment is already configured")]
    AlreadyConfigured,

    /// Two generators registered with one application share an id.
    #[error("duplicate generator id: {id}")]
    DuplicateGenerator {
        /// The repeated id.
        id: GeneratorId,
    },

    /// Fetching the dependency network from the environment failed.
    #[error("getting dependency network")]
    DependencyNetwork {
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Registering a generator's edges failed part way through setup.
    #[error("registering generator {id} in dependency network")]
    Registration {
        /// The generator whose registration failed.
        id: GeneratorId,
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Fetching the queue from the environment failed.
    #[error("getting queue")]
    Queue {
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// One or more generators could not be submitted.
    #[error("adding generation jobs")]
    AddingGenerationJobs {
        /// The underlying failure, usually [`Error::Aggregate`].
        #[source]
        source: Box<Error>,
    },

    /// A wait was interrupted by the caller's cancellation token.
    #[error("migration operation canceled during {phase} phase")]
    Cancelled {
        /// The phase that was waiting.
        phase: Phase,
    },

    /// One or more generators failed while producing migration jobs.
    #[error("generating migration jobs")]
    Generation {
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// One or more harvested migration jobs could not be submitted.
    #[error("adding generated migration jobs")]
    AddingMigrationJobs {
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// One or more submitted jobs failed inside the queue.
    #[error("running migration jobs")]
    RunningMigrationJobs {
        /// The underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// Several independent errors resolved into one.
    #[error("{}", format_aggregate(.errors))]
    Aggregate {
        /// Every collected error, in the order it was collected.
        errors: Vec<Error>,
    },

    /// A cycle was detected in the dependency graph.
    #[error("cycle detected in dependency graph: {cycle:?}")]
    CycleDetected {
        /// Nodes that could not be ordered.
        cycle: Vec<String>,
    },

    /// An edge references a node that was never registered.
    #[error("dependency not found: {dependency} (required by {required_by})")]
    DependencyNotFound {
        /// The missing node.
        dependency: String,
        /// The node whose edge references it.
        required_by: String,
    },

    /// A DAG node was not found (internal graph operation error).
    #[error("DAG node not found: {node}")]
    DagNodeNotFound {
        /// The node identifier (index or value).
        node: String,
    },

    /// A job depends on a job id the queue has never seen.
    #[error("job {job_id} depends on unknown job {dependency}")]
    UnknownJob {
        /// The job being submitted.
        job_id: JobId,
        /// The missing dependency.
        dependency: JobId,
    },

    /// The queue refused a job because it is at capacity.
    #[error("queue {queue} is full, rejected job {job_id}")]
    QueueFull {
        /// Queue name.
        queue: String,
        /// The rejected job.
        job_id: JobId,
    },

    /// The queue has been closed and accepts no more work.
    #[error("queue {queue} is closed")]
    QueueClosed {
        /// Queue name.
        queue: String,
    },

    /// A job failed during execution.
    #[error("job {job_id} failed: {message}")]
    JobFailed {
        /// The failed job.
        job_id: JobId,
        /// Description of the failure.
        message: String,
    },

    /// A job never ran because a prerequisite failed.
    #[error("job {job_id} skipped: upstream {upstream} did not succeed")]
    UpstreamFailed {
        /// The skipped job.
        job_id: JobId,
        /// The first prerequisite that did not succeed.
        upstream: JobId,
    },

    /// Invalid configuration value.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Shared state could not be accessed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// An error from ferry-core.
    #[error("core error: {0}")]
    Core(#[from] ferry_core::Error),
}

fn format_aggregate(errors: &[Error]) -> String {
    let parts: Vec<String> = errors.iter().map(render_chain).collect();
    format!("{} errors: {}", errors.len(), parts.join("; "))
}

fn render_chain(error: &Error) -> String {
    let mut rendered = error.to_string();
    let mut source = StdError::source(error);
    while let Some(inner) = source {
        rendered.push_str(": ");
        rendered.push_str(&inner.to_string());
        source = inner.source();
    }
    rendered
}

impl Error {
    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true for errors that retrying the same call cannot fix.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::AlreadySetUp
                | Self::NotSetUp
                | Self::EnvironmentNotConfigured
                | Self::AlreadyConfigured
                | Self::DuplicateGenerator { .. }
                | Self::Registration { .. }
                | Self::CycleDetected { .. }
                | Self::DependencyNotFound { .. }
                | Self::Configuration { .. }
        )
    }

    /// Returns true if this error (or an error it wraps) is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Aggregate { errors } => errors.iter().any(Self::is_cancelled),
            _ => false,
        }
    }

    /// Returns the errors collected in an aggregate, or this error alone.
    #[must_use]
    pub fn flatten(&self) -> Vec<&Self> {
        match self {
            Self::Aggregate { errors } => errors.iter().flat_map(Self::flatten).collect(),
            other => vec![other],
        }
    }

    /// Returns the wrapped error for phase-wrapping variants.
    #[must_use]
    pub fn inner(&self) -> Option<&Self> {
        match self {
            Self::DependencyNetwork { source }
            | Self::Registration { source, .. }
            | Self::Queue { source }
            | Self::AddingGenerationJobs { source }
            | Self::Generation { source }
            | Self::AddingMigrationJobs { source }
            | Self::RunningMigrationJobs { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}
