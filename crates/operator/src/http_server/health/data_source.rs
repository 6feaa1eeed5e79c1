use std::fmt::Debug;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use http::request::Parts;
use tokio::sync::watch;

#[async_trait]
pub trait DataSource {
    /// Check that the operator is running its controllers and is not on its
    /// way out.
    async fn is_ready(&self) -> Result<(), DataSourceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("one or more dependent services aren't available")]
    DependencyFailure,

    #[error("service has received signal indicating it should shutdown")]
    ShuttingDown,
}

pub type DynDataSource = Arc<dyn DataSource + Send + Sync>;

pub struct StateDataSource(DynDataSource);

impl Debug for StateDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateDataSource").finish()
    }
}

impl StateDataSource {
    pub fn new(dds: DynDataSource) -> Self {
        Self(dds)
    }
}

impl Deref for StateDataSource {
    type Target = DynDataSource;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for StateDataSource
where
    DynDataSource: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ();

    async fn from_request_parts(_parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Ok(StateDataSource(DynDataSource::from_ref(state)))
    }
}

/// Readiness of the operator process: ready once the controllers are
/// running, failing as soon as shutdown was signalled.
#[derive(Debug, Clone)]
pub struct OperatorReadiness {
    shutdown_rx: watch::Receiver<()>,
    controllers_running: Arc<AtomicBool>,
}

impl OperatorReadiness {
    pub fn new(shutdown_rx: watch::Receiver<()>) -> Self {
        Self {
            shutdown_rx,
            controllers_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_running(&self, running: bool) {
        self.controllers_running.store(running, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataSource for OperatorReadiness {
    async fn is_ready(&self) -> Result<(), DataSourceError> {
        // a closed channel means the sender is gone, which only happens on
        // the way out
        if self.shutdown_rx.has_changed().unwrap_or(true) {
            return Err(DataSourceError::ShuttingDown);
        }
        if !self.controllers_running.load(Ordering::SeqCst) {
            return Err(DataSourceError::DependencyFailure);
        }
        Ok(())
    }
}
