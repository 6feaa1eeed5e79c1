use axum::extract::FromRef;
use axum::routing::get;
use axum::Router;

pub mod data_source;
mod liveness;
mod readiness;
mod version;

pub use data_source::{DataSource, DataSourceError, DynDataSource, OperatorReadiness};

pub fn router<S>(state: S) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    DynDataSource: FromRef<S>,
{
    Router::new()
        .route("/livez", get(liveness::handler))
        .route("/readyz", get(readiness::handler))
        .route("/version", get(version::handler))
        .with_state(state)
}
