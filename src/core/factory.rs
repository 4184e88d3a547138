//! Browser session factory abstraction.

use async_trait::async_trait;

use crate::core::FactoryError;

/// Creates, probes and releases browser sessions.
///
/// The pool never inspects a session; everything it needs to do with one goes
/// through this trait or through command logic.
#[async_trait]
pub trait BrowserFactory<H>: Send + Sync + 'static
where
    H: Send + Sync + 'static,
{
    /// Start a new session.
    async fn create(&self) -> Result<H, FactoryError>;

    /// Shut a session down. Called exactly once per created session.
    async fn release(&self, browser: H) -> Result<(), FactoryError>;

    /// Cheap liveness probe used by health-check commands.
    async fn probe(&self, _browser: &H) -> anyhow::Result<()> {
        Ok(())
    }
}
