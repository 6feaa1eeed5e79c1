//! # Reconcilers
//!
//! Per-record state machines driving a [`Bucket`](crate::crd::Bucket) or a
//! [`Policy`](crate::crd::Policy) towards its declared state on the MinIO
//! cluster.
//!
//! A reconcile invocation is a pure function of the current record, its
//! credential secret and the live cluster state: nothing is cached between
//! invocations, every write carries the `resourceVersion` it was read at,
//! and a [`ReconcileError`] or an [`Outcome::RequeueAfter`] schedules the
//! next pass.

mod bucket;
mod policy;
pub(crate) mod secret;

use std::sync::Arc;
use std::time::Duration;

use common::credentials::{CredentialsError, KeyError};
use common::policy::PolicyError;

use crate::control::ControlError;
use crate::crd::{Condition, Conditioned};
use crate::store::{Record, RecordStore, StoreError};

pub use bucket::BucketReconciler;
pub use policy::PolicyReconciler;
pub use secret::{credentials_from_secret, SecretState};

/// Reason attached to every condition written while converging.
pub const REASON_RECONCILING: &str = "Reconciling";
/// Reason of a Policy whose statements can never be translated.
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
/// Reason of a Policy pointing at a missing Bucket record.
pub const REASON_BUCKET_MISSING: &str = "BucketDoesNotExist";
/// Reason of a record whose secret holds unusable credentials.
pub const REASON_INVALID_CREDENTIALS: &str = "InvalidCredentials";

/// Delays between reconcile passes.
#[derive(Debug, Clone)]
pub struct Settings {
    /// after creating a bucket
    pub bucket_requeue: Duration,
    /// after creating a credential secret
    pub secret_requeue: Duration,
    /// after a transient failure
    pub retry: Duration,
    /// after a conflicting write
    pub conflict_retry: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bucket_requeue: Duration::from_secs(5),
            secret_requeue: Duration::from_secs(5),
            retry: Duration::from_secs(30),
            conflict_retry: Duration::from_secs(1),
        }
    }
}

/// Everything a reconciler needs: the record store, the control API and
/// the requeue settings.
pub struct Context<S, C> {
    pub store: S,
    pub control: Arc<C>,
    pub settings: Settings,
}

impl<S: Clone, C> Clone for Context<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            control: self.control.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S, C> Context<S, C> {
    pub fn new(store: S, control: Arc<C>, settings: Settings) -> Self {
        Self {
            store,
            control,
            settings,
        }
    }
}

/// What the dispatcher should do with the key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Converged; wait for the next change.
    Done,
    /// Run again after the delay.
    RequeueAfter(Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("record store: {0}")]
    Store(#[from] StoreError),
    #[error("control api: {0}")]
    Control(#[from] ControlError),
    #[error("policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("invalid credentials in secret {secret}: {source}")]
    Credentials {
        secret: String,
        #[source]
        source: CredentialsError,
    },
    #[error("failed to generate credentials: {0}")]
    KeyGeneration(#[from] KeyError),
    #[error("bucket record {bucket} does not exist")]
    BucketMissing { bucket: String },
}

/// Error classes driving the dispatcher's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The record vanished mid-flight
    NotFound,
    /// A write raced with another writer; re-read and retry soon
    Conflict,
    /// Worth retrying with backoff
    Transient,
    /// Retrying will not help until the input changes
    Validation,
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            ReconcileError::Store(StoreError::Conflict(_)) => ErrorKind::Conflict,
            ReconcileError::Store(_) => ErrorKind::Transient,
            ReconcileError::Control(_) => ErrorKind::Transient,
            ReconcileError::Policy(PolicyError::Json(_)) => ErrorKind::Transient,
            ReconcileError::Policy(_) => ErrorKind::Validation,
            ReconcileError::Credentials { .. } => ErrorKind::Validation,
            ReconcileError::KeyGeneration(_) => ErrorKind::Validation,
            ReconcileError::BucketMissing { .. } => ErrorKind::Transient,
        }
    }
}

/// Load a record, mapping "gone" to `None`.
pub(crate) async fn fetch<S, K>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, StoreError>
where
    S: RecordStore,
    K: Record,
{
    match store.get::<K>(namespace, name).await {
        Ok(record) => Ok(Some(record)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

/// Apply conditions and persist the status, skipping the write when
/// nothing changed.
pub(crate) async fn persist_conditions<S, K>(
    store: &S,
    mut record: K,
    conditions: impl IntoIterator<Item = Condition>,
) -> Result<K, StoreError>
where
    S: RecordStore,
    K: Record + Conditioned,
{
    let before = record.conditions().to_vec();
    for condition in conditions {
        record.set_condition(condition);
    }
    if record.conditions() == before.as_slice() {
        return Ok(record);
    }
    store.update_status(&record).await
}
