//! Pre-built fixtures for orchestration tests.
//!
//! Provides scripted generators and migrations plus a configured environment.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use ferry_core::GeneratorId;
use ferry_flow::environment::LocalEnvironment;
use ferry_flow::generator::{Generator, Migration};
use ferry_flow::job::JobError;
use ferry_flow::network::{DependencyEdges, DependencyGraph, DependencyNetwork};
use ferry_flow::queue::Queue;

use crate::queue::RecordingQueue;

/// Ordered record of migrations that actually ran.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: Mutex<Vec<String>>,
}

impl ExecutionLog {
    /// Creates an empty shared log.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends an entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    /// Returns every entry, in execution order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns true if nothing ran.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A migration that records itself in an [`ExecutionLog`] and optionally fails.
pub struct ScriptedMigration {
    name: String,
    fail: bool,
    delay: Duration,
    log: Arc<ExecutionLog>,
}

#[async_trait]
impl Migration for ScriptedMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn migrate(&self, cancel: CancellationToken) -> Result<(), JobError> {
        if !self.delay.is_zero() {
            tokio::select! {
                () = tokio::time::sleep(self.delay) => {}
                () = cancel.cancelled() => return Err(JobError::cancelled()),
            }
        }
        self.log.record(self.name.clone());
        if self.fail {
            return Err(JobError::migration(format!("{} failed", self.name)));
        }
        Ok(())
    }
}

/// Builder for a scripted [`Generator`].
///
/// Migrations are named `"{id}-{index}"`.
pub struct ScriptedGenerator {
    id: GeneratorId,
    dependency: DependencyEdges,
    count: usize,
    failing_migrations: HashSet<usize>,
    fail_generation: bool,
    migration_delay: Duration,
    gate: Option<Arc<Notify>>,
    log: Arc<ExecutionLog>,
}

impl ScriptedGenerator {
    /// Starts a generator with no dependencies that yields nothing.
    pub fn new(id: &str) -> Self {
        Self {
            id: GeneratorId::new(id),
            dependency: DependencyEdges::none(),
            count: 0,
            failing_migrations: HashSet::new(),
            fail_generation: false,
            migration_delay: Duration::ZERO,
            gate: None,
            log: ExecutionLog::new(),
        }
    }

    /// Sets the generators this one must run after.
    #[must_use]
    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependency = ids.iter().copied().collect();
        self
    }

    /// Sets how many migrations the generator yields.
    #[must_use]
    pub fn yields(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Makes the migration at `index` fail when it runs.
    #[must_use]
    pub fn failing_migration(mut self, index: usize) -> Self {
        self.failing_migrations.insert(index);
        self
    }

    /// Makes generation itself fail.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_generation = true;
        self
    }

    /// Delays every migration by `delay`.
    #[must_use]
    pub fn migration_delay(mut self, delay: Duration) -> Self {
        self.migration_delay = delay;
        self
    }

    /// Blocks generation until `gate` is notified.
    #[must_use]
    pub fn gated(mut self, gate: &Arc<Notify>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    /// Records executed migrations in `log`.
    #[must_use]
    pub fn with_log(mut self, log: &Arc<ExecutionLog>) -> Self {
        self.log = Arc::clone(log);
        self
    }

    /// Builds a shareable generator.
    pub fn build(self) -> Arc<ScriptedGeneratorImpl> {
        Arc::new(ScriptedGeneratorImpl {
            spec: self,
            calls: AtomicUsize::new(0),
        })
    }
}

/// A built [`ScriptedGenerator`].
pub struct ScriptedGeneratorImpl {
    spec: ScriptedGenerator,
    calls: AtomicUsize,
}

impl ScriptedGeneratorImpl {
    /// Returns how many times the generator ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the log executed migrations are recorded in.
    pub fn log(&self) -> &Arc<ExecutionLog> {
        &self.spec.log
    }
}

#[async_trait]
impl Generator for ScriptedGeneratorImpl {
    fn id(&self) -> &GeneratorId {
        &self.spec.id
    }

    fn dependency(&self) -> DependencyEdges {
        self.spec.dependency.clone()
    }

    async fn generate(
        &self,
        cancel: CancellationToken,
    ) -> Result<Vec<Arc<dyn Migration>>, JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.spec.gate {
            tokio::select! {
                () = gate.notified() => {}
                () = cancel.cancelled() => return Err(JobError::cancelled()),
            }
        }
        if self.spec.fail_generation {
            return Err(JobError::generation(format!(
                "{} could not generate",
                self.spec.id
            )));
        }

        Ok((0..self.spec.count)
            .map(|index| {
                Arc::new(ScriptedMigration {
                    name: format!("{}-{index}", self.spec.id),
                    fail: self.spec.failing_migrations.contains(&index),
                    delay: self.spec.migration_delay,
                    log: Arc::clone(&self.spec.log),
                }) as Arc<dyn Migration>
            })
            .collect())
    }
}

/// A configured environment backed by a [`RecordingQueue`].
pub struct TestEnv {
    /// The environment to set applications up with.
    pub env: LocalEnvironment,
    /// The queue the environment hands out.
    pub queue: Arc<RecordingQueue>,
    /// The dependency network the environment hands out.
    pub network: Arc<DependencyGraph>,
}

impl TestEnv {
    /// Creates an environment whose queue runs `workers` jobs at once.
    pub fn new(workers: usize) -> Self {
        let network = Arc::new(DependencyGraph::new());
        let shared: Arc<dyn DependencyNetwork> = Arc::clone(&network) as Arc<dyn DependencyNetwork>;
        let queue = Arc::new(RecordingQueue::new(Arc::clone(&shared), workers));
        let env = LocalEnvironment::new();
        env.configure(Arc::clone(&queue) as Arc<dyn Queue>, shared)
            .expect("fresh environment accepts configuration");
        Self {
            env,
            queue,
            network,
        }
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new(4)
    }
}

/// Upcasts built generators for [`Application::new`](ferry_flow::Application::new).
pub fn generators(built: &[Arc<ScriptedGeneratorImpl>]) -> Vec<Arc<dyn Generator>> {
    built
        .iter()
        .map(|generator| Arc::clone(generator) as Arc<dyn Generator>)
        .collect()
}
