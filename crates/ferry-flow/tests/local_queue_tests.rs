//! Local queue behavior with real generation and migration jobs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use ferry_core::{GeneratorId, JobId};
use ferry_flow::job::GenerationOutcome;
use ferry_flow::prelude::*;
use ferry_test_utils::{ExecutionLog, ScriptedGenerator, ScriptedGeneratorImpl, init_test_logging};

fn network(entries: &[(&str, &[&str])]) -> Arc<dyn DependencyNetwork> {
    let graph = DependencyGraph::new();
    for (id, edges) in entries {
        graph
            .add(GeneratorId::new(*id), edges.iter().copied().collect())
            .unwrap();
    }
    Arc::new(graph)
}

async fn settle(queue: &dyn Queue, phase: Phase) {
    tokio::time::timeout(
        Duration::from_secs(10),
        wait_idle(queue, &CancellationToken::new(), Duration::from_millis(10), phase),
    )
    .await
    .expect("queue did not become idle")
    .unwrap();
}

fn generation_job(generator: &Arc<ScriptedGeneratorImpl>) -> Arc<GenerationJob> {
    Arc::new(GenerationJob::new(Arc::clone(generator) as Arc<dyn Generator>))
}

#[tokio::test]
async fn generation_then_migration_runs_through_the_queue() {
    init_test_logging();
    let log = ExecutionLog::new();
    let queue = LocalQueue::new(network(&[("users", &[]), ("orders", &["users"])]), 2);

    let users = ScriptedGenerator::new("users").yields(2).with_log(&log).build();
    let orders = ScriptedGenerator::new("orders").yields(1).with_log(&log).build();
    let jobs = [generation_job(&users), generation_job(&orders)];
    for job in &jobs {
        let result = queue.put(Arc::clone(job) as Arc<dyn Job>).await.unwrap();
        assert!(result.is_enqueued());
    }
    settle(&queue, Phase::Generation).await;

    assert_eq!(jobs[0].outcome(), GenerationOutcome::Generated(2));
    assert_eq!(jobs[1].outcome(), GenerationOutcome::Generated(1));

    for job in jobs.iter().flat_map(|job| job.migration_jobs()) {
        queue.put(Arc::new(job)).await.unwrap();
    }
    settle(&queue, Phase::Migration).await;

    assert_eq!(log.entries().last().map(String::as_str), Some("orders-0"));
    queue.resolve_errors().unwrap();

    let stats = queue.stats();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.completed, 5);
    assert!(stats.is_idle());
}

#[tokio::test]
async fn migration_ids_follow_generator_and_index() {
    let queue = LocalQueue::new(network(&[("users", &[])]), 1);
    let users = ScriptedGenerator::new("users").yields(2).build();
    let job = generation_job(&users);

    queue.put(Arc::clone(&job) as Arc<dyn Job>).await.unwrap();
    settle(&queue, Phase::Generation).await;

    let ids: Vec<JobId> = job
        .migration_jobs()
        .iter()
        .map(|migration| migration.id().clone())
        .collect();
    let expected = GeneratorId::new("users");
    assert_eq!(
        ids,
        vec![JobId::migration(&expected, 0), JobId::migration(&expected, 1)]
    );
    assert_eq!(ids[1].as_str(), "mig/users/1");
}

#[tokio::test]
async fn failed_generation_skips_its_migrations_and_downstream() {
    let queue = LocalQueue::new(network(&[("users", &[]), ("orders", &["users"])]), 2);
    let users = ScriptedGenerator::new("users").failing().build();
    let orders = ScriptedGenerator::new("orders").yields(1).build();

    queue.put(generation_job(&users)).await.unwrap();
    queue.put(generation_job(&orders)).await.unwrap();
    settle(&queue, Phase::Generation).await;

    let statuses: Vec<(String, JobStatus)> = queue
        .jobs()
        .into_iter()
        .map(|info| (info.id.to_string(), info.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("gen/users".to_string(), JobStatus::Failed),
            ("gen/orders".to_string(), JobStatus::Skipped),
        ]
    );
    assert_eq!(orders.calls(), 0);

    let err = queue.resolve_errors().unwrap_err();
    let causes = err.flatten();
    assert_eq!(causes.len(), 2);
    assert!(matches!(causes[0], Error::JobFailed { job_id, .. } if job_id.as_str() == "gen/users"));
    assert!(matches!(
        causes[1],
        Error::UpstreamFailed { job_id, upstream }
            if job_id.as_str() == "gen/orders" && upstream.as_str() == "gen/users"
    ));
}

#[tokio::test]
async fn cycle_in_network_rejects_put() {
    let queue = LocalQueue::new(network(&[("a", &["b"]), ("b", &["a"])]), 1);
    let a = ScriptedGenerator::new("a").build();

    let err = queue.put(generation_job(&a)).await.unwrap_err();
    assert!(matches!(err, Error::CycleDetected { .. }), "got {err}");
    assert_eq!(queue.stats().total, 0);
}
