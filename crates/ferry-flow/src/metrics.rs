//! Metrics for migration runs.
//!
//! All metrics go through the `metrics` crate facade; without an installed
//! recorder every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `ferry_flow_jobs_submitted_total` | Counter | `phase`, `result` | Submission attempts |
//! | `ferry_flow_jobs_finished_total` | Counter | `kind`, `status` | Terminal job outcomes |
//! | `ferry_flow_job_duration_seconds` | Histogram | `kind`, `status` | Job execution time |
//! | `ferry_flow_queue_depth` | Gauge | `queue` | Jobs pending or running |
//! | `ferry_flow_generated_jobs` | Gauge | - | Migrations harvested in the last run |
//! | `ferry_flow_phase_duration_seconds` | Histogram | `phase` | Submit-and-wait time per phase |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: job submission attempts.
    pub const JOBS_SUBMITTED_TOTAL: &str = "ferry_flow_jobs_submitted_total";
    /// Counter: jobs that reached a terminal status.
    pub const JOBS_FINISHED_TOTAL: &str = "ferry_flow_jobs_finished_total";
    /// Histogram: job execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "ferry_flow_job_duration_seconds";
    /// Gauge: jobs pending or running in a queue.
    pub const QUEUE_DEPTH: &str = "ferry_flow_queue_depth";
    /// Gauge: migrations harvested by the most recent run.
    pub const GENERATED_JOBS: &str = "ferry_flow_generated_jobs";
    /// Histogram: phase duration in seconds.
    pub const PHASE_DURATION_SECONDS: &str = "ferry_flow_phase_duration_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Run phase (generation, migration).
    pub const PHASE: &str = "phase";
    /// Submission result (enqueued, deduplicated, queue_full, error).
    pub const RESULT: &str = "result";
    /// Job kind (generation, migration).
    pub const KIND: &str = "kind";
    /// Terminal job status (completed, failed, skipped).
    pub const STATUS: &str = "status";
    /// Queue name.
    pub const QUEUE: &str = "queue";
}

/// Records orchestration metrics with consistent labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records one submission attempt.
    pub fn record_submission(&self, phase: &str, result: &str) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            labels::PHASE => phase.to_string(),
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records a job reaching a terminal status.
    pub fn record_job_finished(&self, kind: &str, status: &str, duration: Option<Duration>) {
        counter!(
            names::JOBS_FINISHED_TOTAL,
            labels::KIND => kind.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
        if let Some(duration) = duration {
            histogram!(
                names::JOB_DURATION_SECONDS,
                labels::KIND => kind.to_string(),
                labels::STATUS => status.to_string(),
            )
            .record(duration.as_secs_f64());
        }
    }

    /// Sets the number of unfinished jobs in a queue.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_queue_depth(&self, queue: &str, depth: usize) {
        gauge!(names::QUEUE_DEPTH, labels::QUEUE => queue.to_string()).set(depth as f64);
    }

    /// Sets the number of migrations harvested by the current run.
    #[allow(clippy::cast_precision_loss)] // Gauge values are typically small
    pub fn set_generated_jobs(&self, count: usize) {
        gauge!(names::GENERATED_JOBS).set(count as f64);
    }

    /// Records how long a phase took.
    pub fn observe_phase_duration(&self, phase: &str, duration: Duration) {
        histogram!(names::PHASE_DURATION_SECONDS, labels::PHASE => phase.to_string())
            .record(duration.as_secs_f64());
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed duration when dropped, including on early
/// returns through `?`.
///
/// ## Example
///
/// ```rust,no_run
/// use ferry_flow::metrics::{FlowMetrics, TimingGuard};
///
/// let metrics = FlowMetrics::new();
/// {
///     let _guard = TimingGuard::new(|duration| {
///         metrics.observe_phase_duration("generation", duration);
///     });
///     // Submit and wait...
/// }
/// ```
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard that records a phase duration on drop.
#[must_use]
pub fn time_phase(phase: &'static str) -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(move |duration| FlowMetrics::new().observe_phase_duration(phase, duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        let metrics = FlowMetrics::new();
        metrics.record_submission("generation", "enqueued");
        metrics.record_job_finished("migration", "failed", Some(Duration::from_millis(3)));
        metrics.record_job_finished("migration", "skipped", None);
        metrics.set_queue_depth("local", 4);
        metrics.set_generated_jobs(5);
        metrics.observe_phase_duration("migration", Duration::from_secs(1));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(10)));
    }

    #[test]
    fn phase_timer_records_on_drop() {
        let guard = time_phase("generation");
        assert!(guard.elapsed() < Duration::from_secs(60));
    }
}
