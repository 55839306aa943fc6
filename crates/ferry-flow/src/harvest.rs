//! Collecting migrations from completed generators.
//!
//! Harvest order is fixed: generators in the order they were submitted, then
//! each generator's migrations in the order it yielded them. The limit is
//! applied to that sequence, so with dependencies first in submission order
//! an upstream generator's migrations exhaust the cap before any downstream
//! generator's are considered.

use std::sync::Arc;

use ferry_core::{GeneratorId, JobId};

use crate::error::Error;
use crate::job::{GenerationJob, GenerationOutcome, Job, MigrationJob};

/// Migrations produced by one generator.
#[derive(Debug, Clone)]
pub struct HarvestBatch {
    /// The producing generator.
    pub generator: GeneratorId,
    /// Its migrations, in yield order.
    pub jobs: Vec<MigrationJob>,
}

/// Everything harvested after the generation phase.
#[derive(Debug, Default)]
pub struct Harvest {
    batches: Vec<HarvestBatch>,
    failures: Vec<Error>,
}

impl Harvest {
    /// Collects migrations from `jobs`, in the given order.
    ///
    /// Generators that failed are recorded as failures; generators the queue
    /// never ran contribute nothing.
    #[must_use]
    pub fn collect(jobs: &[Arc<GenerationJob>]) -> Self {
        let mut harvest = Self::default();
        for job in jobs {
            let generator = job.generator().id().clone();
            match job.outcome() {
                GenerationOutcome::Generated(_) => harvest.batches.push(HarvestBatch {
                    jobs: job.migration_jobs(),
                    generator,
                }),
                GenerationOutcome::Failed(err) => harvest.failures.push(Error::JobFailed {
                    job_id: job.id().clone(),
                    message: err.to_string(),
                }),
                GenerationOutcome::NotRun => {
                    tracing::debug!(generator = %generator, "generator did not run");
                }
            }
        }
        harvest
    }

    /// Returns the per-generator batches, in harvest order.
    #[must_use]
    pub fn batches(&self) -> &[HarvestBatch] {
        &self.batches
    }

    /// Returns the number of migrations harvested.
    #[must_use]
    pub fn generated(&self) -> usize {
        self.batches.iter().map(|batch| batch.jobs.len()).sum()
    }

    /// Returns the number of generators that produced at least one migration.
    #[must_use]
    pub fn producing_generators(&self) -> usize {
        self.batches
            .iter()
            .filter(|batch| !batch.jobs.is_empty())
            .count()
    }

    /// Returns the generators that failed.
    #[must_use]
    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    /// Consumes the harvest, returning only the generator failures.
    #[must_use]
    pub fn into_failures(self) -> Vec<Error> {
        self.failures
    }

    /// Returns the ids of the migrations that `cap` admits, in harvest order.
    #[must_use]
    pub fn selected_ids(&self, cap: Option<usize>) -> Vec<JobId> {
        self.iter_jobs()
            .take(cap.unwrap_or(usize::MAX))
            .map(|job| job.id().clone())
            .collect()
    }

    /// Consumes the harvest, returning the migrations `cap` admits in harvest
    /// order, and the generator failures.
    #[must_use]
    pub fn into_selected(self, cap: Option<usize>) -> (Vec<MigrationJob>, Vec<Error>) {
        let selected = self
            .batches
            .into_iter()
            .flat_map(|batch| batch.jobs)
            .take(cap.unwrap_or(usize::MAX))
            .collect();
        (selected, self.failures)
    }

    fn iter_jobs(&self) -> impl Iterator<Item = &MigrationJob> {
        self.batches.iter().flat_map(|batch| batch.jobs.iter())
    }
}
