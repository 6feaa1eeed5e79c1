use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};

use super::{describe, key_of, Record, RecordStore, StoreError};

/// Record store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Record>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_error<K: Record>(namespace: &str, name: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            StoreError::NotFound(describe::<K>(namespace, name))
        }
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(describe::<K>(namespace, name))
        }
        kube::Error::Api(response) if response.code == 409 => {
            StoreError::Conflict(describe::<K>(namespace, name))
        }
        err => StoreError::Api(err),
    }
}

#[async_trait]
impl RecordStore for KubeStore {
    async fn get<K: Record>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error::<K>(namespace, name, e))
    }

    async fn create<K: Record>(&self, record: &K) -> Result<K, StoreError> {
        let (namespace, name) = key_of(record)?;
        self.api::<K>(&namespace)
            .create(&PostParams::default(), record)
            .await
            .map_err(|e| map_error::<K>(&namespace, &name, e))
    }

    async fn update<K: Record>(&self, record: &K) -> Result<K, StoreError> {
        let (namespace, name) = key_of(record)?;
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), record)
            .await
            .map_err(|e| map_error::<K>(&namespace, &name, e))
    }

    async fn update_status<K: Record>(&self, record: &K) -> Result<K, StoreError> {
        let (namespace, name) = key_of(record)?;

        // a merge patch carrying resourceVersion is rejected with 409 when stale
        let mut value = serde_json::to_value(record)?;
        let status = value
            .get_mut("status")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": record.meta().resource_version },
            "status": status,
        });

        self.api::<K>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error::<K>(&namespace, &name, e))
    }

    async fn delete<K: Record>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error::<K>(namespace, name, e))
    }
}
