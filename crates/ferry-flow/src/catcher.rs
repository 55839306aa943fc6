//! Error accumulation across independent operations.
//!
//! Each operation in a batch is attempted regardless of earlier failures;
//! the catcher keeps every failure and resolves them into a single result
//! once the batch is done.

use crate::error::{Error, Result};

/// Collects errors from a batch of independent operations.
///
/// ## Example
///
/// ```rust
/// use ferry_flow::catcher::ErrorCatcher;
/// use ferry_flow::error::Error;
///
/// let mut catcher = ErrorCatcher::new();
/// catcher.add(Ok(()));
/// assert!(!catcher.has_errors());
///
/// catcher.push(Error::NotSetUp);
/// assert!(catcher.resolve().is_err());
/// ```
#[derive(Debug, Default)]
pub struct ErrorCatcher {
    errors: Vec<Error>,
}

impl ErrorCatcher {
    /// Creates an empty catcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the error from `result`, if any.
    pub fn add(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    /// Records an error.
    pub fn push(&mut self, err: Error) {
        self.errors.push(err);
    }

    /// Returns true if at least one error was recorded.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns the number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Combines the recorded errors into one result.
    ///
    /// No errors resolve to `Ok(())`, a single error is returned as is, and
    /// several become [`Error::Aggregate`] in the order they were recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if anything was recorded.
    pub fn resolve(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate {
                errors: self.errors,
            }),
        }
    }
}

impl Extend<Error> for ErrorCatcher {
    fn extend<I: IntoIterator<Item = Error>>(&mut self, iter: I) {
        self.errors.extend(iter);
    }
}
