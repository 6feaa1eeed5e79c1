//! Secret change trigger.
//!
//! Credential secrets point back at the record that owns them through an
//! annotation. Only events that touch the credentials themselves, or that
//! create or remove a secret, should wake the owning record up: metadata
//! churn (our own annotation write included) is dropped.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Secret;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Resource, ResourceExt};

use crate::reconcile::secret::{PASSWORD_KEY, USER_KEY};

/// The record a secret belongs to, read from its back-reference
/// annotation.
pub fn owner_key<K>(secret: &Secret, annotation: &str) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let owner = secret
        .annotations()
        .get(annotation)
        .filter(|owner| !owner.is_empty())?;
    let namespace = secret.namespace()?;
    Some(ObjectRef::new(owner).within(&namespace))
}

/// True when an update between two versions of a secret must be acted on:
/// either side has no data, or the user or password bytes differ.
pub fn credentials_changed(old: &Secret, new: &Secret) -> bool {
    let (Some(old), Some(new)) = (old.data.as_ref(), new.data.as_ref()) else {
        return true;
    };
    [USER_KEY, PASSWORD_KEY]
        .iter()
        .any(|key| old.get(*key) != new.get(*key))
}

/// Turns a raw secret watch into trigger events.
///
/// The filter remembers the last version of every owned secret it admitted
/// so an update can be compared against it. Secrets without the owner
/// annotation are neither admitted nor remembered. Creations and deletions
/// of owned secrets always pass.
///
/// A relist (`Init` .. `InitDone`) builds a fresh cache that replaces the
/// old one once complete, so secrets deleted while the watch was down are
/// forgotten.
#[derive(Debug)]
pub struct SecretChangeFilter {
    annotation: &'static str,
    seen: HashMap<ObjectRef<Secret>, Secret>,
    relist: Option<HashMap<ObjectRef<Secret>, Secret>>,
}

impl SecretChangeFilter {
    pub fn new(annotation: &'static str) -> Self {
        Self {
            annotation,
            seen: HashMap::new(),
            relist: None,
        }
    }

    fn is_owned(&self, secret: &Secret) -> bool {
        secret
            .annotations()
            .get(self.annotation)
            .is_some_and(|owner| !owner.is_empty())
    }

    fn forget(&mut self, key: &ObjectRef<Secret>) {
        self.seen.remove(key);
        if let Some(relist) = self.relist.as_mut() {
            relist.remove(key);
        }
    }

    /// The secret to trigger on, if this event should trigger at all.
    pub fn admit(&mut self, event: watcher::Event<Secret>) -> Option<Secret> {
        match event {
            watcher::Event::Init => {
                self.relist = Some(HashMap::new());
                None
            }
            watcher::Event::InitDone => {
                if let Some(relist) = self.relist.take() {
                    self.seen = relist;
                }
                None
            }
            watcher::Event::Apply(secret) | watcher::Event::InitApply(secret) => {
                let key = ObjectRef::from_obj(&secret);
                if !self.is_owned(&secret) {
                    self.forget(&key);
                    return None;
                }

                let changed = self
                    .seen
                    .get(&key)
                    .map_or(true, |previous| credentials_changed(previous, &secret));
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(key.clone(), secret.clone());
                }
                self.seen.insert(key, secret.clone());
                changed.then_some(secret)
            }
            watcher::Event::Delete(secret) => {
                self.forget(&ObjectRef::from_obj(&secret));
                self.is_owned(&secret).then_some(secret)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::crd::{Bucket, BUCKET_SECRET_ANNOTATION, POLICY_SECRET_ANNOTATION};

    fn secret(user: Option<&str>, password: &str) -> Secret {
        let mut data = BTreeMap::from([(
            PASSWORD_KEY.to_string(),
            ByteString(password.as_bytes().to_vec()),
        )]);
        if let Some(user) = user {
            data.insert(USER_KEY.to_string(), ByteString(user.as_bytes().to_vec()));
        }
        Secret {
            metadata: ObjectMeta {
                name: Some("photos-creds".into()),
                namespace: Some("media".into()),
                annotations: Some(BTreeMap::from([(
                    BUCKET_SECRET_ANNOTATION.to_string(),
                    "photos".to_string(),
                )])),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_owner_key() {
        let key = owner_key::<Bucket>(&secret(Some("A"), "p"), BUCKET_SECRET_ANNOTATION).unwrap();
        assert_eq!(key.name, "photos");
        assert_eq!(key.namespace.as_deref(), Some("media"));

        assert!(owner_key::<Bucket>(&secret(Some("A"), "p"), POLICY_SECRET_ANNOTATION).is_none());

        let mut blank = secret(Some("A"), "p");
        blank
            .annotations_mut()
            .insert(BUCKET_SECRET_ANNOTATION.to_string(), String::new());
        assert!(owner_key::<Bucket>(&blank, BUCKET_SECRET_ANNOTATION).is_none());
    }

    #[test]
    fn test_credentials_changed() {
        let base = secret(Some("A"), "p");
        assert!(!credentials_changed(&base, &secret(Some("A"), "p")));
        assert!(credentials_changed(&base, &secret(Some("B"), "p")));
        assert!(credentials_changed(&base, &secret(Some("A"), "q")));
        assert!(credentials_changed(&base, &secret(None, "p")));

        let mut empty = base.clone();
        empty.data = None;
        assert!(credentials_changed(&empty, &base));
        assert!(credentials_changed(&base, &empty));

        // only the data matters
        let mut relabelled = base.clone();
        relabelled
            .labels_mut()
            .insert("team".to_string(), "media".to_string());
        assert!(!credentials_changed(&base, &relabelled));
    }

    #[test]
    fn test_filter_admits_credential_changes_only() {
        let mut filter = SecretChangeFilter::new(BUCKET_SECRET_ANNOTATION);
        assert!(filter.admit(watcher::Event::Init).is_none());
        assert!(filter
            .admit(watcher::Event::InitApply(secret(Some("A"), "p")))
            .is_some());
        assert!(filter.admit(watcher::Event::InitDone).is_none());

        let mut annotated = secret(Some("A"), "p");
        annotated
            .annotations_mut()
            .insert("touched".to_string(), "yes".to_string());
        assert!(filter.admit(watcher::Event::Apply(annotated)).is_none());

        assert!(filter
            .admit(watcher::Event::Apply(secret(Some("A"), "rotated")))
            .is_some());
        assert!(filter
            .admit(watcher::Event::Apply(secret(Some("A"), "rotated")))
            .is_none());
        assert_eq!(filter.len(), 1);

        assert!(filter
            .admit(watcher::Event::Delete(secret(Some("A"), "rotated")))
            .is_some());
        assert!(filter.is_empty());

        // recreated after deletion
        assert!(filter
            .admit(watcher::Event::Apply(secret(Some("A"), "rotated")))
            .is_some());
    }

    fn unowned(name: &str) -> Secret {
        let mut secret = secret(Some("A"), "p");
        secret.metadata.name = Some(name.to_string());
        secret.metadata.annotations = None;
        secret
    }

    #[test]
    fn test_filter_ignores_unowned_secrets() {
        let mut filter = SecretChangeFilter::new(BUCKET_SECRET_ANNOTATION);
        assert!(filter.admit(watcher::Event::Init).is_none());
        for i in 0..100 {
            let event = watcher::Event::InitApply(unowned(&format!("tls-{}", i)));
            assert!(filter.admit(event).is_none());
        }
        assert!(filter.admit(watcher::Event::InitDone).is_none());
        assert!(filter.is_empty());

        assert!(filter.admit(watcher::Event::Apply(unowned("tls-0"))).is_none());
        assert!(filter.admit(watcher::Event::Delete(unowned("tls-0"))).is_none());
        assert!(filter.is_empty());

        // owned by the other kind
        let mut policy_secret = unowned("readers");
        policy_secret
            .annotations_mut()
            .insert(POLICY_SECRET_ANNOTATION.to_string(), "readers".to_string());
        assert!(filter.admit(watcher::Event::Apply(policy_secret)).is_none());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_filter_relist_drops_vanished_secrets() {
        let mut filter = SecretChangeFilter::new(BUCKET_SECRET_ANNOTATION);
        assert!(filter
            .admit(watcher::Event::Apply(secret(Some("A"), "p")))
            .is_some());
        assert_eq!(filter.len(), 1);

        // the secret was deleted while the watch was down
        assert!(filter.admit(watcher::Event::Init).is_none());
        assert_eq!(filter.len(), 1);
        assert!(filter.admit(watcher::Event::InitDone).is_none());
        assert!(filter.is_empty());
    }

    #[test]
    fn test_filter_relist_keeps_unchanged_secrets_quiet() {
        let mut filter = SecretChangeFilter::new(BUCKET_SECRET_ANNOTATION);
        assert!(filter
            .admit(watcher::Event::Apply(secret(Some("A"), "p")))
            .is_some());

        assert!(filter.admit(watcher::Event::Init).is_none());
        assert!(filter
            .admit(watcher::Event::InitApply(secret(Some("A"), "p")))
            .is_none());
        assert!(filter.admit(watcher::Event::InitDone).is_none());
        assert_eq!(filter.len(), 1);

        // rotated while the watch was down
        assert!(filter.admit(watcher::Event::Init).is_none());
        assert!(filter
            .admit(watcher::Event::InitApply(secret(Some("A"), "rotated")))
            .is_some());
        assert!(filter.admit(watcher::Event::InitDone).is_none());
        assert_eq!(filter.len(), 1);
    }
}
