//! Strongly-typed identifiers for ferry entities.
//!
//! - [`GeneratorId`]: caller-chosen, stable name of a generator. Unique within
//!   one application; the dependency network is keyed by it.
//! - [`JobId`]: identity of one job submitted to a queue. Generation and
//!   migration jobs derive theirs from the generator id in separate
//!   namespaces (`gen/` and `mig/`), so no generator name can collide with
//!   another generator's migration.
//! - [`RunId`]: ULID minted per orchestrator run, used for log correlation.
//!
//! # Example
//!
//! ```rust
//! use ferry_core::id::{GeneratorId, JobId};
//!
//! let generator: GeneratorId = "rename-fields".parse().unwrap();
//! assert_eq!(JobId::generation(&generator).as_str(), "gen/rename-fields");
//! assert_eq!(JobId::migration(&generator, 3).as_str(), "mig/rename-fields/3");
//! ```

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Stable identifier of a generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratorId(String);

impl GeneratorId {
    /// Creates a generator ID from a trusted value.
    ///
    /// Use [`str::parse`] for untrusted input; it rejects blank values.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GeneratorId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_id("generator ID must not be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl Borrow<str> for GeneratorId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for GeneratorId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GeneratorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a job submitted to a queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a job ID from a trusted value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the ID of the job that runs a generator.
    #[must_use]
    pub fn generation(generator: &GeneratorId) -> Self {
        Self(format!("gen/{generator}"))
    }

    /// Derives the ID of the `index`-th migration yielded by a generator.
    ///
    /// Derived IDs are stable across runs so that a queue can recognize a
    /// re-submitted migration. The index never contains `/`, so the last
    /// segment always separates it from the generator id.
    #[must_use]
    pub fn migration(generator: &GeneratorId, index: usize) -> Self {
        Self(format!("mig/{generator}/{index}"))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A unique identifier for one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Ulid);

impl RunId {
    /// Generates a new unique run ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Returns the creation timestamp encoded in the ID.
    #[must_use]
    pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
        let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::invalid_id(format!("invalid run ID '{s}': {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn generator_id_parse_trims() {
        let id: GeneratorId = "  users  ".parse().unwrap();
        assert_eq!(id.as_str(), "users");
    }

    #[test]
    fn blank_generator_id_is_rejected() {
        let result: Result<GeneratorId> = "   ".parse();
        assert!(matches!(result, Err(Error::InvalidId { .. })));
    }

    #[test]
    fn generator_id_serializes_transparently() {
        let id = GeneratorId::new("orders");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"orders\"");
    }

    #[test]
    fn generator_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(GeneratorId::new("a"), 1);
        assert_eq!(map.get("a"), Some(&1));
    }

    #[test]
    fn migration_job_ids_are_stable() {
        let generator = GeneratorId::new("orders");
        assert_eq!(JobId::migration(&generator, 0), JobId::migration(&generator, 0));
        assert_ne!(JobId::migration(&generator, 0), JobId::migration(&generator, 1));
    }

    #[test]
    fn generator_names_never_collide_with_migration_ids() {
        let users = GeneratorId::new("users");
        let dotted = GeneratorId::new("users.0");
        let slashed = GeneratorId::new("users/0");

        assert_ne!(JobId::generation(&dotted), JobId::migration(&users, 0));
        assert_ne!(JobId::generation(&slashed), JobId::migration(&users, 0));
        assert_ne!(JobId::migration(&slashed, 0), JobId::migration(&users, 0));
        assert_eq!(JobId::migration(&users, 0).as_str(), "mig/users/0");
    }

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::generate();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_run_id_returns_error() {
        let result: Result<RunId> = "not-a-valid-ulid".parse();
        assert!(result.is_err());
    }
}
