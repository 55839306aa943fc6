//! Process-scoped provider of the queue and dependency network.
//!
//! An [`Environment`] is built once by the caller and lent to an
//! [`Application`](crate::application::Application). Every getter call
//! returns the same underlying instance, so edges registered during setup are
//! the ones the queue schedules against during a run.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::config::FlowConfig;
use crate::error::{Error, Result};
use crate::network::{DependencyGraph, DependencyNetwork};
use crate::queue::{LocalQueue, Queue};

/// Supplies the runtime resources an application needs.
pub trait Environment: Send + Sync {
    /// Returns the shared queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot provide a queue.
    fn queue(&self) -> Result<Arc<dyn Queue>>;

    /// Returns the shared dependency network.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot provide a network.
    fn dependency_network(&self) -> Result<Arc<dyn DependencyNetwork>>;

    /// Returns true once both resources are available.
    fn is_configured(&self) -> bool;
}

struct Resources {
    queue: Arc<dyn Queue>,
    network: Arc<dyn DependencyNetwork>,
}

/// An [`Environment`] configured exactly once.
///
/// A freshly created environment is unconfigured; using it fails with
/// [`Error::EnvironmentNotConfigured`].
///
/// ## Example
///
/// ```rust
/// use ferry_flow::config::FlowConfig;
/// use ferry_flow::environment::{Environment, LocalEnvironment};
///
/// let env = LocalEnvironment::from_config(&FlowConfig::default());
/// assert!(env.is_configured());
/// ```
#[derive(Default)]
pub struct LocalEnvironment {
    resources: OnceLock<Resources>,
}

impl LocalEnvironment {
    /// Creates an unconfigured environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configured environment with a [`LocalQueue`] scheduling
    /// against a fresh [`DependencyGraph`].
    #[must_use]
    pub fn from_config(config: &FlowConfig) -> Self {
        let network: Arc<dyn DependencyNetwork> = Arc::new(DependencyGraph::new());
        let queue = LocalQueue::with_options(
            crate::queue::local::DEFAULT_QUEUE_NAME,
            Arc::clone(&network),
            config.workers,
            config.queue_capacity,
        );
        let env = Self::new();
        let _ = env.resources.set(Resources {
            queue: Arc::new(queue),
            network,
        });
        env
    }

    /// Supplies the queue and network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyConfigured`] if resources were already set.
    pub fn configure(
        &self,
        queue: Arc<dyn Queue>,
        network: Arc<dyn DependencyNetwork>,
    ) -> Result<()> {
        self.resources
            .set(Resources { queue, network })
            .map_err(|_| Error::AlreadyConfigured)?;
        tracing::debug!("environment configured");
        Ok(())
    }

    fn resources(&self) -> Result<&Resources> {
        self.resources.get().ok_or(Error::EnvironmentNotConfigured)
    }
}

impl fmt::Debug for LocalEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEnvironment")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl Environment for LocalEnvironment {
    fn queue(&self) -> Result<Arc<dyn Queue>> {
        Ok(Arc::clone(&self.resources()?.queue))
    }

    fn dependency_network(&self) -> Result<Arc<dyn DependencyNetwork>> {
        Ok(Arc::clone(&self.resources()?.network))
    }

    fn is_configured(&self) -> bool {
        self.resources.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_environment_reports_errors() {
        let env = LocalEnvironment::new();
        assert!(!env.is_configured());
        assert!(matches!(env.queue(), Err(Error::EnvironmentNotConfigured)));
        assert!(matches!(
            env.dependency_network(),
            Err(Error::EnvironmentNotConfigured)
        ));
    }

    #[tokio::test]
    async fn configure_is_one_shot() {
        let env = LocalEnvironment::new();
        let network: Arc<dyn DependencyNetwork> = Arc::new(DependencyGraph::new());
        let queue: Arc<dyn Queue> = Arc::new(LocalQueue::new(Arc::clone(&network), 1));

        env.configure(Arc::clone(&queue), Arc::clone(&network)).unwrap();
        let second = env.configure(queue, network);
        assert!(matches!(second, Err(Error::AlreadyConfigured)));
    }

    #[test]
    fn getters_return_the_same_instances() {
        let env = LocalEnvironment::from_config(&FlowConfig::default());
        let first = env.dependency_network().unwrap();
        let second = env.dependency_network().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let q1 = env.queue().unwrap();
        let q2 = env.queue().unwrap();
        assert!(Arc::ptr_eq(&q1, &q2));
        assert_eq!(q1.name(), "local");
    }
}
