//! Error types and result aliases for ferry.
//!
//! Errors here cover the primitives owned by this crate. Orchestration errors
//! live in `ferry-flow` and wrap these via `From`.

/// The result type used throughout ferry-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building core primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Creates a new invalid identifier error.
    #[must_use]
    pub fn invalid_id(message: impl Into<String>) -> Self {
        Self::InvalidId {
            message: message.into(),
        }
    }
}
