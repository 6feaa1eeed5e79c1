//! # Custom resources
//!
//! `Bucket` and `Policy` records (group `minio.ixday.github.io`, version
//! `v1alpha1`), their status conditions and the finalizer bookkeeping
//! shared by both reconcilers.

mod bucket;
pub mod condition;
mod policy;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource};

pub use bucket::{Bucket, BucketSpec, BucketStatus, BUCKET_FINALIZER, BUCKET_SECRET_ANNOTATION};
pub use condition::{
    find_condition, set_condition, Condition, ConditionStatus, AVAILABLE, BUCKET_EXISTS,
};
pub use policy::{Policy, PolicySpec, PolicyStatus, POLICY_FINALIZER, POLICY_SECRET_ANNOTATION};

/// Records carrying a list of status conditions.
pub trait Conditioned {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn set_condition(&mut self, condition: Condition) {
        set_condition(self.conditions_mut(), condition);
    }

    fn condition(&self, r#type: &str) -> Option<&Condition> {
        find_condition(self.conditions(), r#type)
    }
}

pub fn has_finalizer<K: Resource>(record: &K, finalizer: &str) -> bool {
    record
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

/// Returns `false` when the finalizer was already present.
pub fn add_finalizer<K: Resource>(record: &mut K, finalizer: &str) -> bool {
    if has_finalizer(record, finalizer) {
        return false;
    }
    record
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Returns `false` when the finalizer was not present.
pub fn remove_finalizer<K: Resource>(record: &mut K, finalizer: &str) -> bool {
    let Some(finalizers) = record.meta_mut().finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    before != finalizers.len()
}

pub fn is_deleting<K: Resource>(record: &K) -> bool {
    record.meta().deletion_timestamp.is_some()
}

/// Definitions of every custom resource the operator serves.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![Bucket::crd(), Policy::crd()]
}

#[cfg(test)]
mod tests {
    use common::policy::AnonymousAccess;
    use kube::api::ObjectMeta;

    use super::*;

    fn bucket(namespace: &str, name: &str) -> Bucket {
        Bucket {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: BucketSpec::default(),
            status: None,
        }
    }

    #[test]
    fn test_finalizer_helpers() {
        let mut record = bucket("default", "photos");
        assert!(!has_finalizer(&record, BUCKET_FINALIZER));

        assert!(add_finalizer(&mut record, BUCKET_FINALIZER));
        assert!(!add_finalizer(&mut record, BUCKET_FINALIZER));
        assert_eq!(record.metadata.finalizers.as_ref().map(Vec::len), Some(1));

        assert!(remove_finalizer(&mut record, BUCKET_FINALIZER));
        assert!(!remove_finalizer(&mut record, BUCKET_FINALIZER));
        assert!(!has_finalizer(&record, BUCKET_FINALIZER));
    }

    #[test]
    fn test_names() {
        let mut record = bucket("default", "photos");
        assert_eq!(record.bucket_name(), "default.photos");
        assert_eq!(record.secret_name(), None);

        record.spec.secret_name = Some(String::new());
        assert_eq!(record.secret_name(), None);

        let policy = Policy {
            metadata: ObjectMeta {
                name: Some("readers".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: PolicySpec {
                bucket_name: "photos".to_string(),
                secret_name: None,
                statements: vec![],
            },
            status: None,
        };
        assert_eq!(policy.policy_name(), "default.photos.readers");
        assert_eq!(policy.secret_name(), "readers");
    }

    #[test]
    fn test_spec_defaults() {
        let spec: BucketSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.policy, AnonymousAccess::Private);
        assert!(spec.secret_name.is_none());
    }

    #[test]
    fn test_crds() {
        let crds = crds();
        let names: Vec<_> = crds
            .iter()
            .map(|crd| crd.metadata.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(
            names,
            vec!["buckets.minio.ixday.github.io", "policies.minio.ixday.github.io"]
        );
    }

    #[test]
    fn test_policy_requires_a_statement() {
        let crd = serde_json::to_value(Policy::crd()).unwrap();
        let statements = crd
            .pointer("/spec/versions/0/schema/openAPIV3Schema/properties/spec/properties/statements")
            .unwrap();
        assert_eq!(statements["minItems"], 1);
        assert_eq!(statements["type"], "array");
    }

    #[test]
    fn test_conditions_on_empty_status() {
        let mut record = bucket("default", "photos");
        assert!(record.conditions().is_empty());

        record.set_condition(Condition::new(
            AVAILABLE,
            ConditionStatus::True,
            "Reconciling",
            "ok",
        ));
        assert_eq!(
            record.condition(AVAILABLE).map(|c| c.status),
            Some(ConditionStatus::True)
        );
    }
}
