//! # ferry-flow
//!
//! Two-phase, dependency-ordered migration orchestration.
//!
//! A migration run happens in two waves. First every [`Generator`] runs as a
//! job on a [`Queue`], ordered by the dependency network; each one yields the
//! migrations that should run. Then those migrations are harvested, subject to
//! dry-run and limit policy, and run on the same queue. Failures across the
//! whole fan-out are aggregated into one error per phase.
//!
//! ## Core Concepts
//!
//! - **Dependency network**: "must run after" edges between generators,
//!   consulted by the queue when scheduling
//! - **Generator**: a job whose output is a list of migrations
//! - **Queue**: the parallel execution engine; [`LocalQueue`] runs jobs on
//!   tokio tasks
//! - **Environment**: provides the shared queue and network
//! - **Application**: sets up the network and drives both phases
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ferry_core::GeneratorId;
//! use ferry_flow::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<()> {
//! let config = FlowConfig::from_env()?;
//! let env = LocalEnvironment::from_config(&config);
//!
//! let users: Arc<dyn Generator> = Arc::new(StaticGenerator::new(
//!     GeneratorId::new("users"),
//!     DependencyEdges::none(),
//!     Vec::new(),
//! ));
//! let orders: Arc<dyn Generator> = Arc::new(StaticGenerator::new(
//!     GeneratorId::new("orders"),
//!     ["users"].into_iter().collect(),
//!     Vec::new(),
//! ));
//!
//! let mut app = Application::new(vec![users, orders], config.options)
//!     .with_poll_interval(config.poll_interval);
//! app.setup(&env)?;
//! let summary = app.run(&CancellationToken::new()).await?;
//! assert_eq!(summary.generators, 2);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

// Internal modules - not exposed in public API.
pub(crate) mod dag;

pub mod application;
pub mod catcher;
pub mod config;
pub mod environment;
pub mod error;
pub mod generator;
pub mod harvest;
pub mod job;
pub mod metrics;
pub mod network;
pub mod queue;
pub mod wait;

pub use application::{Application, ApplicationOptions, RunSummary};
pub use generator::{Generator, Migration};
pub use queue::{LocalQueue, Queue};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::application::{Application, ApplicationOptions, RunSummary};
    pub use crate::catcher::ErrorCatcher;
    pub use crate::config::FlowConfig;
    pub use crate::environment::{Environment, LocalEnvironment};
    pub use crate::error::{Error, Phase, Result};
    pub use crate::generator::{Generator, Migration, SourceGenerator, StaticGenerator};
    pub use crate::job::{GenerationJob, Job, JobError, JobErrorCategory, JobKind, MigrationJob};
    pub use crate::metrics::FlowMetrics;
    pub use crate::network::{DependencyEdges, DependencyGraph, DependencyNetwork};
    pub use crate::queue::{EnqueueResult, JobInfo, JobStatus, LocalQueue, Queue, QueueStats};
    pub use crate::wait::{IDLE_POLL_INTERVAL, wait_idle};
}
