//! End-to-end tests for the two-phase orchestrator.
//!
//! Every test wires an [`Application`] to a recording local queue and checks
//! what the queue was offered, what ran, and which error came back.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use ferry_flow::prelude::*;
use ferry_test_utils::{
    ExecutionLog, ScriptedGenerator, TestEnv, assert_cancelled, assert_no_migration_puts,
    assert_submitted, assert_wrapped_job_failures, generators, init_test_logging,
};

const POLL: Duration = Duration::from_millis(10);

fn live(limit: usize) -> ApplicationOptions {
    ApplicationOptions {
        dry_run: false,
        limit,
    }
}

fn dry_run() -> ApplicationOptions {
    ApplicationOptions {
        dry_run: true,
        limit: 0,
    }
}

/// Generator A yields three migrations; B yields two and runs after A.
fn a_then_b(log: &Arc<ExecutionLog>) -> Vec<Arc<dyn Generator>> {
    generators(&[
        ScriptedGenerator::new("a").yields(3).with_log(log).build(),
        ScriptedGenerator::new("b")
            .depends_on(&["a"])
            .yields(2)
            .with_log(log)
            .build(),
    ])
}

#[tokio::test]
async fn setup_twice_fails_and_leaves_network_unchanged() {
    init_test_logging();
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), live(0));

    app.setup(&ctx.env).unwrap();
    let before = ctx.network.nodes();

    let err = app.setup(&ctx.env).unwrap_err();
    assert!(matches!(err, Error::AlreadySetUp));
    assert_eq!(ctx.network.nodes(), before);
    assert_eq!(before.len(), 2);
}

#[tokio::test]
async fn unconfigured_environment_is_rejected_then_setup_succeeds() {
    let unconfigured = LocalEnvironment::new();
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), live(0));

    let err = app.setup(&unconfigured).unwrap_err();
    assert!(matches!(err, Error::EnvironmentNotConfigured));
    assert!(!app.is_set_up());

    app.setup(&ctx.env).unwrap();
    assert!(app.is_set_up());
    let edges = ctx.network.edges(&"b".into()).unwrap();
    assert_eq!(edges.len(), 1);
}

#[tokio::test]
async fn dry_run_counts_without_submitting_migrations() {
    init_test_logging();
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), dry_run()).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let summary = app.run(&CancellationToken::new()).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.generators, 2);
    assert_eq!(summary.generated, 5);
    assert_eq!(summary.producing_generators, 2);
    assert_eq!(summary.submitted, 0);
    assert_no_migration_puts(&ctx.queue);
    assert!(log.is_empty());
}

#[tokio::test]
async fn unlimited_run_submits_everything_dependencies_first() {
    init_test_logging();
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let summary = app.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.submitted, 5);
    assert_submitted(
        &ctx.queue,
        &["mig/a/0", "mig/a/1", "mig/a/2", "mig/b/0", "mig/b/1"],
    );
    assert_eq!(ctx.queue.accepted(JobKind::Generation), vec!["gen/a", "gen/b"]);

    let ran = log.entries();
    assert_eq!(ran.len(), 5);
    assert!(ran[..3].iter().all(|name| name.starts_with("a-")));
    assert!(ran[3..].iter().all(|name| name.starts_with("b-")));
}

#[tokio::test]
async fn limit_takes_upstream_migrations_first() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), live(3)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let summary = app.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.generated, 5);
    assert_eq!(summary.submitted, 3);
    assert_submitted(&ctx.queue, &["mig/a/0", "mig/a/1", "mig/a/2"]);
    assert_eq!(ctx.queue.migration_attempts(), 3);
    assert_eq!(log.len(), 3);
}

#[tokio::test]
async fn limit_above_total_submits_everything() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), live(50)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let summary = app.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.submitted, 5);
}

#[tokio::test]
async fn failed_generator_put_stops_before_migration_phase() {
    init_test_logging();
    let ctx = TestEnv::default();
    ctx.queue.fail_put("gen/b");
    let log = ExecutionLog::new();
    let mut app = Application::new(a_then_b(&log), live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::AddingGenerationJobs { .. }), "got {err}");
    let inner = err.inner().unwrap();
    assert!(matches!(inner, Error::Storage { .. }), "got {inner}");
    assert_no_migration_puts(&ctx.queue);
}

#[tokio::test]
async fn cancellation_during_generation_skips_migration_phase() {
    init_test_logging();
    let ctx = TestEnv::default();
    let gate = Arc::new(Notify::new());
    let log = ExecutionLog::new();
    let slow = ScriptedGenerator::new("slow")
        .yields(2)
        .gated(&gate)
        .with_log(&log)
        .build();
    let mut app = Application::new(generators(&[slow]), live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = app.run(&cancel).await.unwrap_err();

    assert_cancelled(&err, Phase::Generation);
    assert!(err.is_cancelled());
    assert_no_migration_puts(&ctx.queue);
    assert!(log.is_empty());
}

#[tokio::test]
async fn cancellation_during_migration_phase_is_reported() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let slow = ScriptedGenerator::new("slow")
        .yields(1)
        .migration_delay(Duration::from_secs(30))
        .with_log(&log)
        .build();
    let mut app = Application::new(generators(&[slow]), live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = app.run(&cancel).await.unwrap_err();
    assert_cancelled(&err, Phase::Migration);
    assert_submitted(&ctx.queue, &["mig/slow/0"]);
}

#[tokio::test]
async fn failing_migration_is_reported_after_the_run() {
    init_test_logging();
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let gens = generators(&[
        ScriptedGenerator::new("a")
            .yields(3)
            .failing_migration(1)
            .with_log(&log)
            .build(),
        ScriptedGenerator::new("b")
            .depends_on(&["a"])
            .yields(2)
            .with_log(&log)
            .build(),
    ]);
    let mut app = Application::new(gens, live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::RunningMigrationJobs { .. }), "got {err}");
    assert_wrapped_job_failures(&err, &["mig/a/1", "mig/b/0", "mig/b/1"]);
    // Downstream migrations are skipped, never run.
    assert!(log.entries().iter().all(|name| name.starts_with("a-")));
}

#[tokio::test]
async fn failing_migration_is_reported_with_a_limit() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let gens = generators(&[ScriptedGenerator::new("a")
        .yields(3)
        .failing_migration(1)
        .with_log(&log)
        .build()]);
    let mut app = Application::new(gens, live(2)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::RunningMigrationJobs { .. }), "got {err}");
    assert_wrapped_job_failures(&err, &["mig/a/1"]);
    assert_submitted(&ctx.queue, &["mig/a/0", "mig/a/1"]);
}

#[tokio::test]
async fn dry_run_reports_failed_generators() {
    let ctx = TestEnv::default();
    let gens = generators(&[
        ScriptedGenerator::new("broken").failing().build(),
        ScriptedGenerator::new("fine").yields(2).build(),
    ]);
    let mut app = Application::new(gens, dry_run()).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::Generation { .. }), "got {err}");
    assert_wrapped_job_failures(&err, &["gen/broken"]);
    assert_no_migration_puts(&ctx.queue);
}

#[tokio::test]
async fn live_run_still_migrates_healthy_generators() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let gens = generators(&[
        ScriptedGenerator::new("broken").failing().build(),
        ScriptedGenerator::new("fine").yields(2).with_log(&log).build(),
    ]);
    let mut app = Application::new(gens, live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::RunningMigrationJobs { .. }), "got {err}");
    assert_wrapped_job_failures(&err, &["gen/broken"]);
    assert_submitted(&ctx.queue, &["mig/fine/0", "mig/fine/1"]);
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn generators_without_migrations_finish_cleanly() {
    let ctx = TestEnv::default();
    let gens = generators(&[
        ScriptedGenerator::new("empty").build(),
        ScriptedGenerator::new("also-empty").depends_on(&["empty"]).build(),
    ]);
    let mut app = Application::new(gens, live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let summary = app.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.generated, 0);
    assert_eq!(summary.producing_generators, 0);
    assert_no_migration_puts(&ctx.queue);
}

#[tokio::test]
async fn application_runs_repeatedly_after_one_setup() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let a = ScriptedGenerator::new("a").yields(2).with_log(&log).build();
    let mut app =
        Application::new(generators(&[Arc::clone(&a)]), live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let first = app.run(&CancellationToken::new()).await.unwrap();
    let second = app.run(&CancellationToken::new()).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(second.submitted, 2);
    assert_eq!(a.calls(), 2);
    assert_eq!(log.len(), 4);
}

#[tokio::test]
async fn unregistered_dependency_fails_generation_submission() {
    let ctx = TestEnv::default();
    let gens = generators(&[ScriptedGenerator::new("orphan")
        .depends_on(&["missing"])
        .yields(1)
        .build()]);
    let mut app = Application::new(gens, live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, Error::AddingGenerationJobs { .. }), "got {err}");
    assert!(matches!(
        err.inner(),
        Some(Error::DependencyNotFound { dependency, .. }) if dependency == "missing"
    ));
    assert_no_migration_puts(&ctx.queue);
}

#[tokio::test]
async fn generator_named_like_a_migration_keeps_its_failure() {
    let ctx = TestEnv::default();
    let log = ExecutionLog::new();
    let gens = generators(&[
        ScriptedGenerator::new("users").yields(1).with_log(&log).build(),
        ScriptedGenerator::new("users.0").failing().build(),
        ScriptedGenerator::new("users/0").failing().build(),
    ]);
    let mut app = Application::new(gens, live(0)).with_poll_interval(POLL);
    app.setup(&ctx.env).unwrap();

    let err = app.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::RunningMigrationJobs { .. }), "got {err}");
    assert_wrapped_job_failures(&err, &["gen/users.0", "gen/users/0"]);
    assert_submitted(&ctx.queue, &["mig/users/0"]);
    assert_eq!(log.entries(), vec!["users-0"]);
    assert_eq!(ctx.queue.jobs().len(), 4);
}
