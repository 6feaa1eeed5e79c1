use std::collections::BTreeMap;

use common::credentials::Credentials;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use super::ReconcileError;
use crate::store::{Record, RecordStore, StoreError};

pub const USER_KEY: &str = "user";
pub const PASSWORD_KEY: &str = "password";

#[derive(Debug)]
pub enum SecretState {
    /// A fresh secret was just created; the next pass picks it up.
    Created,
    Ready(Secret),
}

/// Make sure the credential secret `name` of `owner` exists and carries
/// the back-reference `annotation`.
///
/// A missing secret is created with generated credentials and a
/// controller owner reference to `owner`.
pub async fn ensure_secret<S, K>(
    store: &S,
    owner: &K,
    name: &str,
    annotation: &str,
) -> Result<SecretState, ReconcileError>
where
    S: RecordStore,
    K: Record,
{
    let namespace = owner.namespace().unwrap_or_default();
    let owner_name = owner.name_any();

    let mut secret = match store.get::<Secret>(&namespace, name).await {
        Ok(secret) => secret,
        Err(err) if err.is_not_found() => {
            let credentials = Credentials::generate(&mut rand::rng())?;
            let secret = secret_for(owner, name, annotation, &credentials)?;

            tracing::info!(secret = %name, namespace = %namespace, owner = %owner_name, "creating credential secret");
            return match store.create(&secret).await {
                Ok(_) | Err(StoreError::AlreadyExists(_)) => Ok(SecretState::Created),
                Err(err) => Err(err.into()),
            };
        }
        Err(err) => return Err(err.into()),
    };

    let annotated = secret
        .annotations()
        .get(annotation)
        .is_some_and(|value| !value.is_empty());
    if !annotated {
        tracing::info!(secret = %name, namespace = %namespace, owner = %owner_name, "annotating credential secret");
        secret
            .annotations_mut()
            .insert(annotation.to_string(), owner_name);
        secret = store.update(&secret).await?;
    }

    Ok(SecretState::Ready(secret))
}

fn secret_for<K: Record>(
    owner: &K,
    name: &str,
    annotation: &str,
    credentials: &Credentials,
) -> Result<Secret, ReconcileError> {
    let owner_reference = owner.controller_owner_ref(&()).ok_or_else(|| {
        StoreError::Invalid(format!("{} {} has no uid yet", K::kind(&()), owner.name_any()))
    })?;

    let data = BTreeMap::from([
        (
            USER_KEY.to_string(),
            ByteString(credentials.user.clone().into_bytes()),
        ),
        (
            PASSWORD_KEY.to_string(),
            ByteString(credentials.password.clone().into_bytes()),
        ),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: owner.namespace(),
            annotations: Some(BTreeMap::from([(
                annotation.to_string(),
                owner.name_any(),
            )])),
            owner_references: Some(vec![owner_reference]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    })
}

/// Validated credentials stored in a secret.
pub fn credentials_from_secret(secret: &Secret) -> Result<Credentials, ReconcileError> {
    let field = |key: &str| {
        secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(|bytes| bytes.0.as_slice())
    };

    Credentials::from_fields(field(USER_KEY), field(PASSWORD_KEY)).map_err(|source| {
        ReconcileError::Credentials {
            secret: secret.name_any(),
            source,
        }
    })
}

/// Delete the secret `name` if `owner` is its controller.
///
/// Secrets the operator did not create are left alone.
pub async fn delete_owned_secret<S, K>(store: &S, owner: &K, name: &str) -> Result<(), StoreError>
where
    S: RecordStore,
    K: Record,
{
    let namespace = owner.namespace().unwrap_or_default();
    let Some(uid) = owner.uid() else {
        return Ok(());
    };

    let secret = match store.get::<Secret>(&namespace, name).await {
        Ok(secret) => secret,
        Err(err) if err.is_not_found() => return Ok(()),
        Err(err) => return Err(err),
    };

    let controlled = secret
        .owner_references()
        .iter()
        .any(|owner_ref| owner_ref.controller == Some(true) && owner_ref.uid == uid);
    if !controlled {
        tracing::debug!(secret = %name, namespace = %namespace, "secret not controlled by record, keeping it");
        return Ok(());
    }

    tracing::info!(secret = %name, namespace = %namespace, "deleting credential secret");
    match store.delete::<Secret>(&namespace, name).await {
        Err(err) if !err.is_not_found() => Err(err),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;

    use super::*;
    use crate::crd::{Bucket, BucketSpec, BUCKET_SECRET_ANNOTATION};
    use crate::store::MemoryStore;

    async fn stored_bucket(store: &MemoryStore) -> Bucket {
        let bucket = Bucket {
            metadata: ObjectMeta {
                name: Some("photos".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: BucketSpec {
                secret_name: Some("photos-creds".into()),
                ..Default::default()
            },
            status: None,
        };
        store.create(&bucket).await.unwrap()
    }

    #[tokio::test]
    async fn test_ensure_secret_creates_then_reads() {
        let store = MemoryStore::default();
        let bucket = stored_bucket(&store).await;

        let state = ensure_secret(&store, &bucket, "photos-creds", BUCKET_SECRET_ANNOTATION)
            .await
            .unwrap();
        assert!(matches!(state, SecretState::Created));

        let secret: Secret = store.get("default", "photos-creds").await.unwrap();
        assert_eq!(
            secret.annotations().get(BUCKET_SECRET_ANNOTATION),
            Some(&"photos".to_string())
        );
        let owner = &secret.owner_references()[0];
        assert_eq!(owner.kind, "Bucket");
        assert_eq!(owner.controller, Some(true));

        let credentials = credentials_from_secret(&secret).unwrap();
        assert_eq!(credentials.user.len(), 20);
        assert_eq!(credentials.password.len(), 40);

        let state = ensure_secret(&store, &bucket, "photos-creds", BUCKET_SECRET_ANNOTATION)
            .await
            .unwrap();
        assert!(matches!(state, SecretState::Ready(_)));
    }

    #[tokio::test]
    async fn test_ensure_secret_annotates_existing() {
        let store = MemoryStore::default();
        let bucket = stored_bucket(&store).await;

        let existing = Secret {
            metadata: ObjectMeta {
                name: Some("photos-creds".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (USER_KEY.to_string(), ByteString(b"EXISTINGUSER".to_vec())),
                (PASSWORD_KEY.to_string(), ByteString(b"existing-password".to_vec())),
            ])),
            ..Default::default()
        };
        store.create(&existing).await.unwrap();

        let SecretState::Ready(secret) =
            ensure_secret(&store, &bucket, "photos-creds", BUCKET_SECRET_ANNOTATION)
                .await
                .unwrap()
        else {
            panic!("existing secret should be ready");
        };
        assert_eq!(
            secret.annotations().get(BUCKET_SECRET_ANNOTATION),
            Some(&"photos".to_string())
        );
        assert_eq!(credentials_from_secret(&secret).unwrap().user, "EXISTINGUSER");
    }

    #[tokio::test]
    async fn test_delete_owned_secret_only_when_controlled() {
        let store = MemoryStore::default();
        let bucket = stored_bucket(&store).await;

        let foreign = Secret {
            metadata: ObjectMeta {
                name: Some("shared".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        store.create(&foreign).await.unwrap();
        delete_owned_secret(&store, &bucket, "shared").await.unwrap();
        assert!(store.get::<Secret>("default", "shared").await.is_ok());

        ensure_secret(&store, &bucket, "photos-creds", BUCKET_SECRET_ANNOTATION)
            .await
            .unwrap();
        delete_owned_secret(&store, &bucket, "photos-creds")
            .await
            .unwrap();
        assert!(store
            .get::<Secret>("default", "photos-creds")
            .await
            .unwrap_err()
            .is_not_found());

        // already gone
        delete_owned_secret(&store, &bucket, "photos-creds")
            .await
            .unwrap();
    }

    #[test]
    fn test_credentials_from_secret_rejects_missing_fields() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("broken".into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                USER_KEY.to_string(),
                ByteString(b"USER".to_vec()),
            )])),
            ..Default::default()
        };
        assert!(matches!(
            credentials_from_secret(&secret),
            Err(ReconcileError::Credentials { .. })
        ));
    }
}
