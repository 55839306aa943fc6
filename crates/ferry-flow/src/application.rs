//! The two-phase migration orchestrator.
//!
//! An [`Application`] is built from a list of generators and a policy, set up
//! once against an [`Environment`], then run any number of times.
//!
//! ## Run
//!
//! 1. **Generation**: every generator is put on the queue as a
//!    [`GenerationJob`], dependencies first. The orchestrator then waits for
//!    the queue to go idle.
//! 2. **Migration**: the migrations the generators produced are harvested in
//!    submission order, then yield order. A dry run stops here and reports
//!    counts. Otherwise up to `limit` migrations are put on the queue, the
//!    orchestrator waits for idleness again, and every job failure is
//!    resolved into one error.
//!
//! The queue enforces ordering between jobs; the two waits only mark phase
//! boundaries for the orchestrator.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use ferry_core::RunId;
use ferry_core::observability::orchestration_span;

use crate::catcher::ErrorCatcher;
use crate::environment::Environment;
use crate::error::{Error, Phase, Result};
use crate::generator::Generator;
use crate::harvest::Harvest;
use crate::job::{GenerationJob, Job, MigrationJob};
use crate::metrics::{FlowMetrics, time_phase};
use crate::queue::{EnqueueResult, Queue};
use crate::wait::{IDLE_POLL_INTERVAL, wait_idle};

/// Dry-run and limit policy for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationOptions {
    /// Count migrations without submitting them.
    pub dry_run: bool,
    /// Maximum number of migrations submitted per run; `0` means unbounded.
    pub limit: usize,
}

impl ApplicationOptions {
    /// Returns the submission cap, or `None` when unbounded.
    #[must_use]
    pub const fn cap(&self) -> Option<usize> {
        if self.limit == 0 {
            None
        } else {
            Some(self.limit)
        }
    }
}

/// Counts reported by a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Correlates this run's log lines.
    pub run_id: RunId,
    /// Whether submission of migrations was suppressed.
    pub dry_run: bool,
    /// Number of generators submitted.
    pub generators: usize,
    /// Number of generators that produced at least one migration.
    pub producing_generators: usize,
    /// Number of migrations harvested.
    pub generated: usize,
    /// Number of migrations accepted by the queue.
    pub submitted: usize,
}

/// A migration application: generators plus the policy they run under.
///
/// ## Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use ferry_core::GeneratorId;
/// use ferry_flow::application::{Application, ApplicationOptions};
/// use ferry_flow::config::FlowConfig;
/// use ferry_flow::environment::LocalEnvironment;
/// use ferry_flow::generator::{Generator, StaticGenerator};
/// use ferry_flow::network::DependencyEdges;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> ferry_flow::error::Result<()> {
/// let env = LocalEnvironment::from_config(&FlowConfig::default());
/// let generators: Vec<Arc<dyn Generator>> = vec![Arc::new(StaticGenerator::new(
///     GeneratorId::new("users"),
///     DependencyEdges::none(),
///     Vec::new(),
/// ))];
///
/// let mut app = Application::new(generators, ApplicationOptions::default());
/// app.setup(&env)?;
/// let summary = app.run(&CancellationToken::new()).await?;
/// println!("submitted {} migrations", summary.submitted);
/// # Ok(())
/// # }
/// ```
pub struct Application<'env> {
    generators: Vec<Arc<dyn Generator>>,
    options: ApplicationOptions,
    env: Option<&'env dyn Environment>,
    has_setup: bool,
    poll_interval: Duration,
    metrics: FlowMetrics,
}

impl<'env> Application<'env> {
    /// Creates an application that has not been set up.
    #[must_use]
    pub fn new(generators: Vec<Arc<dyn Generator>>, options: ApplicationOptions) -> Self {
        Self {
            generators,
            options,
            env: None,
            has_setup: false,
            poll_interval: IDLE_POLL_INTERVAL,
            metrics: FlowMetrics::new(),
        }
    }

    /// Overrides the fallback interval between idleness checks.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the registered generators.
    #[must_use]
    pub fn generators(&self) -> &[Arc<dyn Generator>] {
        &self.generators
    }

    /// Returns the run policy.
    #[must_use]
    pub const fn options(&self) -> ApplicationOptions {
        self.options
    }

    /// Returns true once [`Application::setup`] has succeeded.
    #[must_use]
    pub const fn is_set_up(&self) -> bool {
        self.has_setup
    }

    /// Registers every generator's dependency edges with the environment's
    /// network.
    ///
    /// May succeed only once. Failed preconditions leave the application and
    /// the network untouched, so setup can be retried with another
    /// environment.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadySetUp`] if setup already succeeded.
    /// - [`Error::EnvironmentNotConfigured`] if `env` has no resources.
    /// - [`Error::DuplicateGenerator`] if two generators share an id.
    /// - [`Error::DependencyNetwork`] if the network cannot be fetched.
    /// - [`Error::Registration`] if the network rejects a generator.
    pub fn setup(&mut self, env: &'env dyn Environment) -> Result<()> {
        if self.has_setup {
            return Err(Error::AlreadySetUp);
        }
        if !env.is_configured() {
            return Err(Error::EnvironmentNotConfigured);
        }

        let mut seen = HashSet::with_capacity(self.generators.len());
        for generator in &self.generators {
            if !seen.insert(generator.id()) {
                return Err(Error::DuplicateGenerator {
                    id: generator.id().clone(),
                });
            }
        }

        let network = env
            .dependency_network()
            .map_err(|source| Error::DependencyNetwork {
                source: Box::new(source),
            })?;
        for generator in &self.generators {
            network
                .add(generator.id().clone(), generator.dependency())
                .map_err(|source| Error::Registration {
                    id: generator.id().clone(),
                    source: Box::new(source),
                })?;
        }

        self.env = Some(env);
        self.has_setup = true;
        tracing::info!(generators = self.generators.len(), "application set up");
        Ok(())
    }

    /// Runs both phases once.
    ///
    /// # Errors
    ///
    /// - [`Error::NotSetUp`] if setup has not succeeded.
    /// - [`Error::Queue`] if the queue cannot be fetched.
    /// - [`Error::AddingGenerationJobs`] if any generator could not be put.
    /// - [`Error::Cancelled`] if `cancel` fires during either wait.
    /// - [`Error::Generation`] if a generator failed during a dry run.
    /// - [`Error::AddingMigrationJobs`] if any migration could not be put.
    /// - [`Error::RunningMigrationJobs`] if any job failed in the queue.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let env = match (self.has_setup, self.env) {
            (true, Some(env)) => env,
            _ => return Err(Error::NotSetUp),
        };

        let run_id = RunId::generate();
        let span = orchestration_span("run", &run_id.to_string(), self.generators.len());
        self.run_phases(env, run_id, cancel).instrument(span).await
    }

    async fn run_phases(
        &self,
        env: &dyn Environment,
        run_id: RunId,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let queue = env.queue().map_err(|source| Error::Queue {
            source: Box::new(source),
        })?;

        let generation_timer = time_phase(Phase::Generation.as_str());
        let jobs = self
            .generation_jobs(env)
            .map_err(|source| Error::AddingGenerationJobs {
                source: Box::new(source),
            })?;
        self.submit_generators(queue.as_ref(), &jobs).await?;
        wait_idle(queue.as_ref(), cancel, self.poll_interval, Phase::Generation).await?;
        drop(generation_timer);

        let harvest = Harvest::collect(&jobs);
        let generated = harvest.generated();
        let producing_generators = harvest.producing_generators();
        self.metrics.set_generated_jobs(generated);

        let mut summary = RunSummary {
            run_id,
            dry_run: self.options.dry_run,
            generators: jobs.len(),
            producing_generators,
            generated,
            submitted: 0,
        };

        if self.options.dry_run {
            let mut catcher = ErrorCatcher::new();
            catcher.extend(harvest.into_failures());
            catcher.resolve().map_err(|source| Error::Generation {
                source: Box::new(source),
            })?;
            tracing::info!(
                generated,
                generators = producing_generators,
                "ending dry run, generated {generated} migrations from {producing_generators} generators"
            );
            return Ok(summary);
        }

        let _migration_timer = time_phase(Phase::Migration.as_str());
        let (selected, failures) = harvest.into_selected(self.options.cap());
        if !failures.is_empty() {
            tracing::warn!(
                failed_generators = failures.len(),
                "some generators failed; their failures are resolved after the migration phase"
            );
        }

        summary.submitted = self.submit_migrations(queue.as_ref(), selected).await?;
        tracing::info!(
            submitted = summary.submitted,
            generated,
            "added {} migration jobs from {} generators",
            summary.submitted,
            producing_generators
        );

        tracing::info!(
            submitted = summary.submitted,
            "waiting for {} migration jobs from {} generators",
            summary.submitted,
            producing_generators
        );
        wait_idle(queue.as_ref(), cancel, self.poll_interval, Phase::Migration).await?;

        queue
            .resolve_errors()
            .map_err(|source| Error::RunningMigrationJobs {
                source: Box::new(source),
            })?;

        tracing::info!(stats = %queue.stats(), "migration run complete");
        Ok(summary)
    }

    /// Builds one generation job per generator, ordered dependencies first
    /// with ties kept in list order.
    fn generation_jobs(&self, env: &dyn Environment) -> Result<Vec<Arc<GenerationJob>>> {
        let order = env.dependency_network()?.toposort()?;
        let rank: HashMap<_, _> = order
            .iter()
            .enumerate()
            .map(|(position, id)| (id, position))
            .collect();

        let mut generators: Vec<&Arc<dyn Generator>> = self.generators.iter().collect();
        generators.sort_by_key(|generator| rank.get(generator.id()).copied().unwrap_or(usize::MAX));

        Ok(generators
            .into_iter()
            .map(|generator| Arc::new(GenerationJob::new(Arc::clone(generator))))
            .collect())
    }

    async fn submit_generators(&self, queue: &dyn Queue, jobs: &[Arc<GenerationJob>]) -> Result<()> {
        let mut catcher = ErrorCatcher::new();
        for job in jobs {
            let job_id = job.id().clone();
            let result = queue.put(Arc::clone(job) as Arc<dyn Job>).await;
            self.record_submission(Phase::Generation, &result);
            match result {
                Ok(EnqueueResult::Enqueued { .. }) => {}
                Ok(EnqueueResult::Deduplicated { .. }) => {
                    tracing::warn!(job_id = %job_id, "generator already in flight");
                }
                Ok(EnqueueResult::QueueFull) => catcher.push(Error::QueueFull {
                    queue: queue.name().to_string(),
                    job_id,
                }),
                Err(err) => catcher.push(err),
            }
        }

        if catcher.has_errors() {
            tracing::error!(failed = catcher.len(), "could not submit generators");
        }
        catcher
            .resolve()
            .map_err(|source| Error::AddingGenerationJobs {
                source: Box::new(source),
            })
    }

    async fn submit_migrations(
        &self,
        queue: &dyn Queue,
        jobs: Vec<MigrationJob>,
    ) -> Result<usize> {
        let mut catcher = ErrorCatcher::new();
        let mut submitted = 0;
        for job in jobs {
            let job_id = job.id().clone();
            let result = queue.put(Arc::new(job)).await;
            self.record_submission(Phase::Migration, &result);
            match result {
                Ok(EnqueueResult::Enqueued { .. }) => submitted += 1,
                Ok(EnqueueResult::Deduplicated { .. }) => {
                    tracing::debug!(job_id = %job_id, "migration already in flight");
                }
                Ok(EnqueueResult::QueueFull) => catcher.push(Error::QueueFull {
                    queue: queue.name().to_string(),
                    job_id,
                }),
                Err(err) => catcher.push(err),
            }
        }

        catcher
            .resolve()
            .map_err(|source| Error::AddingMigrationJobs {
                source: Box::new(source),
            })?;
        Ok(submitted)
    }

    fn record_submission(&self, phase: Phase, result: &Result<EnqueueResult>) {
        let label = match result {
            Ok(outcome) => outcome.as_label(),
            Err(_) => "error",
        };
        self.metrics.record_submission(phase.as_str(), label);
    }
}

impl fmt::Debug for Application<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<_> = self.generators.iter().map(|g| g.id().as_str()).collect();
        f.debug_struct("Application")
            .field("generators", &ids)
            .field("options", &self.options)
            .field("has_setup", &self.has_setup)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
