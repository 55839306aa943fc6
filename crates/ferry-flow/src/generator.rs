//! Generator and migration contracts.
//!
//! A [`Generator`] is a job whose output is more work: when it runs it yields
//! a list of [`Migration`]s for the second phase of a run. The orchestrator
//! treats every generator the same way; variants differ only in where their
//! migrations come from.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ferry_core::GeneratorId;

use crate::job::JobError;
use crate::network::DependencyEdges;

/// One migration operation produced by a generator.
///
/// What the migration does to the store is entirely up to the implementation.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Performs the migration.
    async fn migrate(&self, cancel: CancellationToken) -> Result<(), JobError>;
}

/// Produces migrations for the second phase of a run.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Stable identifier, unique within one application.
    fn id(&self) -> &GeneratorId;

    /// Generators that must complete before this one runs.
    fn dependency(&self) -> DependencyEdges;

    /// Produces migrations, in the order they should be submitted.
    async fn generate(&self, cancel: CancellationToken)
    -> Result<Vec<Arc<dyn Migration>>, JobError>;
}

/// A generator that yields a fixed list of migrations.
pub struct StaticGenerator {
    id: GeneratorId,
    dependency: DependencyEdges,
    migrations: Vec<Arc<dyn Migration>>,
}

impl StaticGenerator {
    /// Creates a generator that always yields `migrations`.
    #[must_use]
    pub fn new(
        id: GeneratorId,
        dependency: DependencyEdges,
        migrations: Vec<Arc<dyn Migration>>,
    ) -> Self {
        Self {
            id,
            dependency,
            migrations,
        }
    }
}

impl fmt::Debug for StaticGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticGenerator")
            .field("id", &self.id)
            .field("dependency", &self.dependency)
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

#[async_trait]
impl Generator for StaticGenerator {
    fn id(&self) -> &GeneratorId {
        &self.id
    }

    fn dependency(&self) -> DependencyEdges {
        self.dependency.clone()
    }

    async fn generate(
        &self,
        cancel: CancellationToken,
    ) -> Result<Vec<Arc<dyn Migration>>, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::cancelled());
        }
        Ok(self.migrations.clone())
    }
}

/// A generator whose migrations are computed when it runs.
///
/// The source closure is called once per run, typically to scan a collection
/// or read the state of another system.
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use ferry_core::GeneratorId;
/// use ferry_flow::generator::{Migration, SourceGenerator};
/// use ferry_flow::job::JobError;
/// use ferry_flow::network::DependencyEdges;
///
/// let generator = SourceGenerator::new(
///     GeneratorId::new("scan-users"),
///     DependencyEdges::none(),
///     |_cancel| async { Ok::<Vec<Arc<dyn Migration>>, JobError>(Vec::new()) },
/// );
/// ```
pub struct SourceGenerator<F> {
    id: GeneratorId,
    dependency: DependencyEdges,
    source: F,
}

impl<F, Fut> SourceGenerator<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Arc<dyn Migration>>, JobError>> + Send,
{
    /// Creates a generator backed by `source`.
    pub fn new(id: GeneratorId, dependency: DependencyEdges, source: F) -> Self {
        Self {
            id,
            dependency,
            source,
        }
    }
}

impl<F> fmt::Debug for SourceGenerator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceGenerator")
            .field("id", &self.id)
            .field("dependency", &self.dependency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Generator for SourceGenerator<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Arc<dyn Migration>>, JobError>> + Send,
{
    fn id(&self) -> &GeneratorId {
        &self.id
    }

    fn dependency(&self) -> DependencyEdges {
        self.dependency.clone()
    }

    async fn generate(
        &self,
        cancel: CancellationToken,
    ) -> Result<Vec<Arc<dyn Migration>>, JobError> {
        (self.source)(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(String);

    #[async_trait]
    impl Migration for Named {
        fn name(&self) -> &str {
            &self.0
        }

        async fn migrate(&self, _cancel: CancellationToken) -> Result<(), JobError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn static_generator_yields_fixed_list() {
        let generator = StaticGenerator::new(
            GeneratorId::new("fixed"),
            ["base"].into_iter().collect(),
            vec![Arc::new(Named("a".into())), Arc::new(Named("b".into()))],
        );

        assert_eq!(generator.dependency().edges(), &[GeneratorId::new("base")]);
        let migrations = generator.generate(CancellationToken::new()).await.unwrap();
        assert_eq!(migrations.len(), 2);
        assert_eq!(migrations[1].name(), "b");
    }

    #[tokio::test]
    async fn static_generator_observes_cancellation() {
        let generator =
            StaticGenerator::new(GeneratorId::new("fixed"), DependencyEdges::none(), vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = generator.generate(cancel).await.err().unwrap();
        assert_eq!(err, JobError::cancelled());
    }

    #[tokio::test]
    async fn source_generator_calls_source_each_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let generator = SourceGenerator::new(
            GeneratorId::new("scan"),
            DependencyEdges::none(),
            move |_cancel| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let migrations: Vec<Arc<dyn Migration>> = (0..=n)
                        .map(|i| Arc::new(Named(format!("doc-{i}"))) as Arc<dyn Migration>)
                        .collect();
                    Ok::<_, JobError>(migrations)
                }
            },
        );

        assert_eq!(generator.generate(CancellationToken::new()).await.unwrap().len(), 1);
        assert_eq!(generator.generate(CancellationToken::new()).await.unwrap().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn source_generator_propagates_failure() {
        let generator = SourceGenerator::new(
            GeneratorId::new("broken"),
            DependencyEdges::none(),
            |_cancel| async {
                Err::<Vec<Arc<dyn Migration>>, _>(JobError::generation("collection missing"))
            },
        );

        let err = generator.generate(CancellationToken::new()).await.err().unwrap();
        assert_eq!(err.message, "collection missing");
    }
}
