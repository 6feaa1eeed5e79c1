//! # Record store
//!
//! Access to the declarative records (Bucket, Policy) and the credential
//! secrets they own.
//!
//! Every write carries the `resourceVersion` it was read at, so stale
//! writes come back as [`StoreError::Conflict`] instead of silently
//! overwriting a concurrent change. Reconcilers never cache records
//! across invocations; they re-read and retry.
//!
//! - [`KubeStore`] talks to the API server through `kube::Api`.
//! - [`MemoryStore`] models the same semantics in memory for tests.

mod kube_store;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

/// Types the store can hold: namespaced Kubernetes objects.
pub trait Record:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> Record for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    /// The write was based on a stale `resourceVersion`
    #[error("conflicting write on {0}")]
    Conflict(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("invalid record: {0}")]
    Invalid(String),
    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("api error: {0}")]
    Api(#[source] kube::Error),
    #[error("memory store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync + Clone + 'static {
    async fn get<K: Record>(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    /// Create a record; the status of the submitted object is ignored.
    async fn create<K: Record>(&self, record: &K) -> Result<K, StoreError>;

    /// Replace metadata and spec. The status is left untouched.
    async fn update<K: Record>(&self, record: &K) -> Result<K, StoreError>;

    /// Replace the status only.
    async fn update_status<K: Record>(&self, record: &K) -> Result<K, StoreError>;

    /// Request deletion. Records holding finalizers stay visible with a
    /// deletion timestamp until the last finalizer is removed.
    async fn delete<K: Record>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// `kind namespace/name` of a record, for error messages.
pub(crate) fn describe<K: Record>(namespace: &str, name: &str) -> String {
    format!("{} {}/{}", K::kind(&()), namespace, name)
}

pub(crate) fn key_of<K: Record>(record: &K) -> Result<(String, String), StoreError> {
    let meta = record.meta();
    match (&meta.namespace, &meta.name) {
        (Some(namespace), Some(name)) => Ok((namespace.clone(), name.clone())),
        _ => Err(StoreError::Invalid(format!(
            "{} without namespace or name",
            K::kind(&())
        ))),
    }
}
