use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde_json::{json, Value};

use super::{describe, key_of, Record, RecordStore, StoreError};

/// (kind, namespace, name)
type Key = (String, String, String);

/// In-memory record store modelling the API server semantics the
/// reconcilers rely on:
///
/// - optimistic concurrency on `resourceVersion`
/// - a status subresource (`update` keeps status, `update_status` keeps
///   everything else)
/// - `generation` bumps on spec changes
/// - finalizer-gated deletion
/// - garbage collection of dependents through owner references
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    objects: BTreeMap<Key, Value>,
    /// Source of resource versions and uids
    counter: u64,
}

impl MemoryStoreInner {
    fn next(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    /// Remove an object and, transitively, everything it owns.
    fn remove_cascading(&mut self, key: &Key) {
        let Some(removed) = self.objects.remove(key) else {
            return;
        };
        let Some(uid) = removed
            .pointer("/metadata/uid")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return;
        };

        let dependents: Vec<Key> = self
            .objects
            .iter()
            .filter(|(_, object)| owned_by(object, &uid))
            .map(|(key, _)| key.clone())
            .collect();
        for dependent in dependents {
            tracing::debug!(kind = %dependent.0, name = %dependent.2, "garbage collecting dependent");
            self.remove_cascading(&dependent);
        }
    }
}

fn owned_by(object: &Value, uid: &str) -> bool {
    object
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .is_some_and(|owners| {
            owners
                .iter()
                .any(|owner| owner.get("uid").and_then(Value::as_str) == Some(uid))
        })
}

fn resource_version(object: &Value) -> Option<&str> {
    object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

fn has_finalizers(object: &Value) -> bool {
    object
        .pointer("/metadata/finalizers")
        .and_then(Value::as_array)
        .is_some_and(|finalizers| !finalizers.is_empty())
}

fn is_deleting(object: &Value) -> bool {
    object
        .pointer("/metadata/deletionTimestamp")
        .is_some_and(|ts| !ts.is_null())
}

/// Everything outside metadata and status.
fn content(object: &Value) -> BTreeMap<String, Value> {
    object
        .as_object()
        .map(|fields| {
            fields
                .iter()
                .filter(|(field, _)| !matches!(field.as_str(), "metadata" | "status"))
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn set_meta(object: &mut Value, field: &str, value: Value) {
    if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), value);
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::Internal(format!("failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::Internal(format!("failed to acquire write lock: {}", e)))
    }

    fn key<K: Record>(namespace: &str, name: &str) -> Key {
        (
            K::kind(&()).to_string(),
            namespace.to_string(),
            name.to_string(),
        )
    }

    /// Whether a record is currently stored, including records pending
    /// deletion.
    pub fn contains<K: Record>(&self, namespace: &str, name: &str) -> bool {
        self.read()
            .map(|inner| inner.objects.contains_key(&Self::key::<K>(namespace, name)))
            .unwrap_or(false)
    }

    /// Number of stored records of a kind.
    pub fn count<K: Record>(&self) -> usize {
        let kind = K::kind(&()).to_string();
        self.read()
            .map(|inner| inner.objects.keys().filter(|key| key.0 == kind).count())
            .unwrap_or(0)
    }

    /// Validate a write against the stored object's resourceVersion.
    fn check_version(stored: &Value, submitted: &Value, what: &str) -> Result<(), StoreError> {
        match resource_version(submitted) {
            Some(version) if Some(version) != resource_version(stored) => {
                Err(StoreError::Conflict(what.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get<K: Record>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        let inner = self.read()?;
        let object = inner
            .objects
            .get(&Self::key::<K>(namespace, name))
            .ok_or_else(|| StoreError::NotFound(describe::<K>(namespace, name)))?;
        Ok(serde_json::from_value(object.clone())?)
    }

    async fn create<K: Record>(&self, record: &K) -> Result<K, StoreError> {
        let (namespace, name) = key_of(record)?;
        let key = Self::key::<K>(&namespace, &name);

        let mut object = serde_json::to_value(record)?;
        if let Some(fields) = object.as_object_mut() {
            fields.remove("status");
            fields.insert("apiVersion".to_string(), json!(K::api_version(&())));
            fields.insert("kind".to_string(), json!(K::kind(&())));
        }

        let mut inner = self.write()?;
        if inner.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(describe::<K>(&namespace, &name)));
        }
        let version = inner.next();
        set_meta(&mut object, "resourceVersion", json!(version.to_string()));
        set_meta(&mut object, "uid", json!(format!("uid-{version}")));
        set_meta(&mut object, "generation", json!(1));
        set_meta(&mut object, "deletionTimestamp", Value::Null);

        inner.objects.insert(key, object.clone());
        Ok(serde_json::from_value(object)?)
    }

    async fn update<K: Record>(&self, record: &K) -> Result<K, StoreError> {
        let (namespace, name) = key_of(record)?;
        let key = Self::key::<K>(&namespace, &name);
        let what = describe::<K>(&namespace, &name);
        let submitted = serde_json::to_value(record)?;

        let mut inner = self.write()?;
        let stored = inner
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        Self::check_version(stored, &submitted, &what)?;

        let mut object = submitted;
        let generation = stored
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if content(stored) != content(&object) {
            generation + 1
        } else {
            generation
        };

        // system-owned fields always come from the stored copy
        let uid = stored.pointer("/metadata/uid").cloned().unwrap_or(Value::Null);
        let deletion = stored
            .pointer("/metadata/deletionTimestamp")
            .cloned()
            .unwrap_or(Value::Null);
        let status = stored.get("status").cloned();
        if let Some(fields) = object.as_object_mut() {
            match status {
                Some(status) => fields.insert("status".to_string(), status),
                None => fields.remove("status"),
            };
        }

        let version = inner.next();
        set_meta(&mut object, "resourceVersion", json!(version.to_string()));
        set_meta(&mut object, "uid", uid);
        set_meta(&mut object, "generation", json!(generation));
        set_meta(&mut object, "deletionTimestamp", deletion);

        if is_deleting(&object) && !has_finalizers(&object) {
            inner.objects.insert(key.clone(), object.clone());
            inner.remove_cascading(&key);
        } else {
            inner.objects.insert(key, object.clone());
        }
        Ok(serde_json::from_value(object)?)
    }

    async fn update_status<K: Record>(&self, record: &K) -> Result<K, StoreError> {
        let (namespace, name) = key_of(record)?;
        let key = Self::key::<K>(&namespace, &name);
        let what = describe::<K>(&namespace, &name);
        let submitted = serde_json::to_value(record)?;

        let mut inner = self.write()?;
        let stored = inner
            .objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(what.clone()))?;
        Self::check_version(stored, &submitted, &what)?;

        let mut object = stored.clone();
        if let Some(fields) = object.as_object_mut() {
            match submitted.get("status") {
                Some(status) if !status.is_null() => {
                    fields.insert("status".to_string(), status.clone())
                }
                _ => fields.remove("status"),
            };
        }
        let version = inner.next();
        set_meta(&mut object, "resourceVersion", json!(version.to_string()));

        inner.objects.insert(key, object.clone());
        Ok(serde_json::from_value(object)?)
    }

    async fn delete<K: Record>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = Self::key::<K>(namespace, name);

        let mut inner = self.write()?;
        let version = inner.next();
        let object = inner
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(describe::<K>(namespace, name)))?;

        if has_finalizers(object) {
            if !is_deleting(object) {
                let now = serde_json::to_value(Time(k8s_openapi::chrono::Utc::now()))?;
                set_meta(object, "deletionTimestamp", now);
                set_meta(object, "resourceVersion", json!(version.to_string()));
            }
            return Ok(());
        }

        inner.remove_cascading(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;
    use kube::Resource;

    use super::*;
    use crate::crd::{
        add_finalizer, remove_finalizer, Bucket, BucketSpec, Condition, ConditionStatus,
        Conditioned, AVAILABLE, BUCKET_FINALIZER,
    };

    fn bucket(name: &str) -> Bucket {
        Bucket {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: BucketSpec::default(),
            status: None,
        }
    }

    fn secret_owned_by(owner: &Bucket, name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                owner_references: owner.controller_owner_ref(&()).map(|r| vec![r]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "user".to_string(),
                ByteString(b"USER".to_vec()),
            )])),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_get_and_duplicates() {
        let store = MemoryStore::new();
        let created = store.create(&bucket("photos")).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());

        let fetched: Bucket = store.get("default", "photos").await.unwrap();
        assert_eq!(fetched.metadata.uid, created.metadata.uid);

        assert!(matches!(
            store.create(&bucket("photos")).await,
            Err(StoreError::AlreadyExists(_))
        ));
        assert!(matches!(
            store.get::<Bucket>("default", "missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&bucket("photos")).await.unwrap();

        let mut first = created.clone();
        add_finalizer(&mut first, BUCKET_FINALIZER);
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.spec.secret_name = Some("creds".to_string());
        assert!(store.update(&stale).await.unwrap_err().is_conflict());
        assert!(store.update_status(&stale).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_generation_bumps_on_spec_change_only() {
        let store = MemoryStore::new();
        let mut record = store.create(&bucket("photos")).await.unwrap();

        add_finalizer(&mut record, BUCKET_FINALIZER);
        let mut record = store.update(&record).await.unwrap();
        assert_eq!(record.metadata.generation, Some(1));

        record.spec.secret_name = Some("creds".to_string());
        let record = store.update(&record).await.unwrap();
        assert_eq!(record.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn test_status_subresource() {
        let store = MemoryStore::new();
        let mut record = store.create(&bucket("photos")).await.unwrap();

        record.set_condition(Condition::new(
            AVAILABLE,
            ConditionStatus::True,
            "Reconciling",
            "ok",
        ));
        record.spec.secret_name = Some("ignored".to_string());
        let mut record = store.update_status(&record).await.unwrap();
        assert_eq!(record.conditions().len(), 1);
        assert_eq!(record.spec.secret_name, None);

        // spec updates keep the stored status
        record.status = None;
        let record = store.update(&record).await.unwrap();
        assert_eq!(record.conditions().len(), 1);
    }

    #[tokio::test]
    async fn test_finalizer_gated_deletion_and_gc() {
        let store = MemoryStore::new();
        let mut record = store.create(&bucket("photos")).await.unwrap();
        add_finalizer(&mut record, BUCKET_FINALIZER);
        let record = store.update(&record).await.unwrap();
        store
            .create(&secret_owned_by(&record, "photos-creds"))
            .await
            .unwrap();

        store.delete::<Bucket>("default", "photos").await.unwrap();
        let mut pending: Bucket = store.get("default", "photos").await.unwrap();
        assert!(pending.metadata.deletion_timestamp.is_some());
        assert!(store.contains::<Secret>("default", "photos-creds"));

        remove_finalizer(&mut pending, BUCKET_FINALIZER);
        store.update(&pending).await.unwrap();
        assert!(!store.contains::<Bucket>("default", "photos"));
        assert!(!store.contains::<Secret>("default", "photos-creds"));
    }

    #[tokio::test]
    async fn test_delete_without_finalizers_is_immediate() {
        let store = MemoryStore::new();
        store.create(&bucket("photos")).await.unwrap();
        store.delete::<Bucket>("default", "photos").await.unwrap();
        assert_eq!(store.count::<Bucket>(), 0);
        assert!(store
            .delete::<Bucket>("default", "photos")
            .await
            .unwrap_err()
            .is_not_found());
    }
}
