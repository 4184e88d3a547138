//! Tests for PoolBuilder wiring

use std::sync::Arc;

use async_trait::async_trait;
use prometheus_browser_pool::builders::PoolBuilder;
use prometheus_browser_pool::config::PoolSettings;
use prometheus_browser_pool::core::{BrowserFactory, FactoryError, PoolError, PoolStatus};
use prometheus_browser_pool::runtime::TokioSpawner;

struct NullFactory;

#[async_trait]
impl BrowserFactory<()> for NullFactory {
    async fn create(&self) -> Result<(), FactoryError> {
        Ok(())
    }

    async fn release(&self, _browser: ()) -> Result<(), FactoryError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_builder_produces_stopped_pair() {
    let (pool, arbitrator) = PoolBuilder::<()>::new(PoolSettings::default())
        .with_factory(NullFactory)
        .build()
        .unwrap();

    assert_eq!(pool.status(), PoolStatus::NotStarted);
    assert!(arbitrator.workers().is_empty());
    assert_eq!(arbitrator.pool().queue_length(), 0);
}

#[tokio::test]
async fn test_builder_requires_factory() {
    let err = PoolBuilder::<()>::new(PoolSettings::default())
        .build()
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[tokio::test]
async fn test_builder_validates_settings() {
    let err = PoolBuilder::<()>::new(PoolSettings::new().with_max_degree_of_parallel(0))
        .with_factory(NullFactory)
        .build()
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));
}

#[test]
fn test_builder_outside_runtime_needs_spawner() {
    let err = PoolBuilder::<()>::new(PoolSettings::default())
        .with_factory(NullFactory)
        .build()
        .unwrap_err();
    assert!(matches!(err, PoolError::InvalidConfig(_)));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let built = PoolBuilder::<()>::new(PoolSettings::default())
        .with_shared_factory(Arc::new(NullFactory))
        .with_spawner(TokioSpawner::new(runtime.handle().clone()))
        .build();
    assert!(built.is_ok());
}
