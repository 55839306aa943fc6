//! Blocking until a queue is idle.
//!
//! The orchestrator suspends here twice per run. Waiting is driven by the
//! queue's [`Queue::changed`] notification when it has one, with a fixed poll
//! interval as the fallback. Cancellation is checked on every iteration,
//! before idleness.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Phase, Result};
use crate::queue::Queue;

/// Fallback interval between idleness checks.
///
/// Also the upper bound on how long a cancellation can go unnoticed when the
/// queue never signals a change.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Waits until `queue` has nothing pending or running.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] for `phase` as soon as `cancel` fires, even
/// if the queue is idle at that moment.
pub async fn wait_idle(
    queue: &dyn Queue,
    cancel: &CancellationToken,
    interval: Duration,
    phase: Phase,
) -> Result<()> {
    loop {
        if cancel.is_cancelled() {
            tracing::warn!(%phase, queue = queue.name(), "wait cancelled");
            return Err(Error::Cancelled { phase });
        }

        let stats = queue.stats();
        if stats.is_idle() {
            tracing::debug!(%phase, %stats, "queue idle");
            return Ok(());
        }
        tracing::trace!(%phase, %stats, "waiting for queue");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = queue.changed() => {}
            () = tokio::time::sleep(interval) => {}
        }
    }
}
