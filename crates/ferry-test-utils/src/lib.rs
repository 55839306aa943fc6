//! Shared test utilities for ferry integration tests.
//!
//! This crate provides:
//! - [`ScriptedGenerator`]: generators with scripted output, failures, and gates
//! - [`RecordingQueue`]: a [`LocalQueue`](ferry_flow::LocalQueue) wrapper that
//!   records every put and can inject put failures
//! - [`TestEnv`]: a configured environment wired to a recording queue
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use ferry_test_utils::{ScriptedGenerator, TestEnv};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestEnv::new(2);
//!     let a = ScriptedGenerator::new("a").yields(3).build();
//!     // ... set up and run an application against ctx.env ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod queue;

pub use assertions::*;
pub use fixtures::*;
pub use queue::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ferry_flow=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
