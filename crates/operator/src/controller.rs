//! kube-runtime wiring for the reconcilers.
//!
//! One [`Controller`] per record kind. Each watches its records plus the
//! credential secrets, mapping a secret event to the record named by the
//! secret's back-reference annotation.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::{future, FutureExt, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use tokio::sync::watch;
use tracing::Instrument;

use crate::control::ControlApi;
use crate::crd::{Bucket, Policy, BUCKET_SECRET_ANNOTATION, POLICY_SECRET_ANNOTATION};
use crate::reconcile::{
    BucketReconciler, ErrorKind, Outcome, PolicyReconciler, ReconcileError, Settings,
};
use crate::store::{Record, RecordStore};
use crate::watch::{owner_key, SecretChangeFilter};

/// Resolves once shutdown was requested; cheap to clone across controllers.
pub type Shutdown = Shared<BoxFuture<'static, ()>>;

pub fn shutdown_signal(mut shutdown_rx: watch::Receiver<()>) -> Shutdown {
    async move {
        let _ = shutdown_rx.changed().await;
    }
    .boxed()
    .shared()
}

/// A reconciler the controller can drive.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    type Record: Record;

    /// Annotation on a credential secret naming its owning record.
    const SECRET_ANNOTATION: &'static str;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcileError>;

    fn settings(&self) -> &Settings;
}

#[async_trait]
impl<S: RecordStore, C: ControlApi> Reconcile for BucketReconciler<S, C> {
    type Record = Bucket;
    const SECRET_ANNOTATION: &'static str = BUCKET_SECRET_ANNOTATION;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcileError> {
        BucketReconciler::reconcile(self, namespace, name).await
    }

    fn settings(&self) -> &Settings {
        &self.context().settings
    }
}

#[async_trait]
impl<S: RecordStore, C: ControlApi> Reconcile for PolicyReconciler<S, C> {
    type Record = Policy;
    const SECRET_ANNOTATION: &'static str = POLICY_SECRET_ANNOTATION;

    async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcileError> {
        PolicyReconciler::reconcile(self, namespace, name).await
    }

    fn settings(&self) -> &Settings {
        &self.context().settings
    }
}

/// An API handle for one namespace, or the whole cluster.
pub fn scoped_api<K: Record>(client: Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

/// Run the controller for `R` until `shutdown` resolves.
pub async fn run<R: Reconcile>(
    client: Client,
    namespace: Option<&str>,
    reconciler: Arc<R>,
    shutdown: Shutdown,
) {
    let records = scoped_api::<R::Record>(client.clone(), namespace);
    let secrets = scoped_api::<Secret>(client, namespace);

    let mut filter = SecretChangeFilter::new(R::SECRET_ANNOTATION);
    let triggers = watcher::watcher(secrets, watcher::Config::default()).filter_map(move |event| {
        let admitted = match event {
            Ok(event) => filter.admit(event).map(Ok),
            Err(err) => Some(Err(err)),
        };
        future::ready(admitted)
    });

    let kind = <R::Record as Resource>::kind(&()).to_string();
    let span = tracing::info_span!("controller", kind = %kind);

    async move {
        tracing::info!("starting controller");
        Controller::new(records, watcher::Config::default())
            .watches_stream(triggers, |secret| {
                owner_key::<R::Record>(&secret, R::SECRET_ANNOTATION)
            })
            .graceful_shutdown_on(shutdown)
            .run(reconcile::<R>, error_policy::<R>, reconciler)
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => {
                        tracing::debug!(record = %object, ?action, "reconciled");
                    }
                    Err(err) => tracing::warn!(error = %err, "reconcile failed"),
                }
            })
            .await;
        tracing::info!("controller stopped");
    }
    .instrument(span)
    .await
}

async fn reconcile<R: Reconcile>(
    record: Arc<R::Record>,
    reconciler: Arc<R>,
) -> Result<Action, ReconcileError> {
    let namespace = record.namespace().unwrap_or_default();
    let outcome = reconciler.reconcile(&namespace, &record.name_any()).await?;
    Ok(action_for(outcome))
}

fn error_policy<R: Reconcile>(
    record: Arc<R::Record>,
    err: &ReconcileError,
    reconciler: Arc<R>,
) -> Action {
    tracing::warn!(
        namespace = %record.namespace().unwrap_or_default(),
        name = %record.name_any(),
        error = %err,
        kind = ?err.kind(),
        "reconcile error"
    );
    error_action(err.kind(), reconciler.settings())
}

pub fn action_for(outcome: Outcome) -> Action {
    match outcome {
        Outcome::Done => Action::await_change(),
        Outcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

/// How long to wait before retrying a failed pass.
pub fn error_action(kind: ErrorKind, settings: &Settings) -> Action {
    match kind {
        ErrorKind::Conflict => Action::requeue(settings.conflict_retry),
        ErrorKind::Transient => Action::requeue(settings.retry),
        ErrorKind::NotFound | ErrorKind::Validation => Action::await_change(),
    }
}
