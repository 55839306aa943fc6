//! # ferry-core
//!
//! Core primitives shared by the ferry migration orchestrator.
//!
//! This crate provides the foundational types used across ferry components:
//!
//! - **Identifiers**: Strongly-typed IDs for generators, jobs, and runs
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization and span constructors
//!
//! ## Example
//!
//! ```rust
//! use ferry_core::prelude::*;
//!
//! let generator = GeneratorId::new("backfill-users");
//! let job = JobId::migration(&generator, 0);
//! assert_eq!(job.as_str(), "mig/backfill-users/0");
//!
//! let run = RunId::generate();
//! assert!(!run.to_string().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod id;
pub mod observability;

pub use error::{Error, Result};
pub use id::{GeneratorId, JobId, RunId};
pub use observability::LogFormat;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{GeneratorId, JobId, RunId};
    pub use crate::observability::{LogFormat, init_logging};
}
