//! Custom assertions for orchestration tests.

use ferry_flow::error::{Error, Phase};

use crate::queue::RecordingQueue;

/// Asserts that exactly `expected` migrations were accepted, in that order.
///
/// # Panics
///
/// Panics if the accepted migration ids differ.
pub fn assert_submitted(queue: &RecordingQueue, expected: &[&str]) {
    let submitted = queue.submitted_migrations();
    assert_eq!(
        submitted, expected,
        "submitted migrations mismatch: got {submitted:?}, expected {expected:?}"
    );
}

/// Asserts that no migration was ever offered to the queue.
///
/// # Panics
///
/// Panics if any migration put was attempted.
pub fn assert_no_migration_puts(queue: &RecordingQueue) {
    let attempts = queue.migration_attempts();
    assert_eq!(attempts, 0, "expected no migration puts, got {attempts}");
}

/// Asserts that `err` is a cancellation during `phase`.
///
/// # Panics
///
/// Panics if `err` is any other error.
pub fn assert_cancelled(err: &Error, phase: Phase) {
    match err {
        Error::Cancelled { phase: actual } => {
            assert_eq!(*actual, phase, "cancelled in the wrong phase");
        }
        other => panic!("expected cancellation during {phase} phase, got: {other}"),
    }
}

/// Asserts that `err` wraps an error whose flattened causes include a
/// failure of every job in `job_ids`.
///
/// # Panics
///
/// Panics if `err` wraps nothing or a listed job has no failure.
pub fn assert_wrapped_job_failures(err: &Error, job_ids: &[&str]) {
    let inner = err
        .inner()
        .unwrap_or_else(|| panic!("expected a phase-wrapping error, got: {err}"));
    let failed: Vec<&str> = inner
        .flatten()
        .into_iter()
        .filter_map(|cause| match cause {
            Error::JobFailed { job_id, .. } | Error::UpstreamFailed { job_id, .. } => {
                Some(job_id.as_str())
            }
            _ => None,
        })
        .collect();

    for job_id in job_ids {
        assert!(
            failed.contains(job_id),
            "expected {job_id} among failures {failed:?}"
        );
    }
}
