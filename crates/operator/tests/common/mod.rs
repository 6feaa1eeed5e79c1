//! Shared fixtures for the reconcile integration tests
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ::common::policy::{AnonymousAccess, Effect, StatementSpec};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;

use minio_operator::control::MemoryControl;
use minio_operator::crd::{Bucket, BucketSpec, Policy, PolicySpec};
use minio_operator::reconcile::{
    BucketReconciler, Context, Outcome, PolicyReconciler, ReconcileError, Settings,
};
use minio_operator::store::MemoryStore;

pub const NAMESPACE: &str = "media";

/// An in-memory cluster plus both reconcilers sharing it.
pub struct Harness {
    pub store: MemoryStore,
    pub control: Arc<MemoryControl>,
    pub buckets: BucketReconciler<MemoryStore, MemoryControl>,
    pub policies: PolicyReconciler<MemoryStore, MemoryControl>,
}

impl Harness {
    pub fn new() -> Self {
        let store = MemoryStore::default();
        let control = Arc::new(MemoryControl::default());
        let ctx = Context::new(store.clone(), control.clone(), Settings::default());
        Self {
            buckets: BucketReconciler::new(ctx.clone()),
            policies: PolicyReconciler::new(ctx),
            store,
            control,
        }
    }

    /// Reconcile a Bucket until it reports `Done`, returning the number of
    /// passes it took.
    pub async fn converge_bucket(&self, name: &str) -> Result<usize, ReconcileError> {
        for pass in 1..=MAX_PASSES {
            if self.buckets.reconcile(NAMESPACE, name).await? == Outcome::Done {
                return Ok(pass);
            }
        }
        panic!("bucket {name} did not converge in {MAX_PASSES} passes");
    }

    pub async fn converge_policy(&self, name: &str) -> Result<usize, ReconcileError> {
        for pass in 1..=MAX_PASSES {
            if self.policies.reconcile(NAMESPACE, name).await? == Outcome::Done {
                return Ok(pass);
            }
        }
        panic!("policy {name} did not converge in {MAX_PASSES} passes");
    }
}

const MAX_PASSES: usize = 8;

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

pub fn bucket_record(name: &str, policy: AnonymousAccess, secret: Option<&str>) -> Bucket {
    Bucket {
        metadata: meta(name),
        spec: BucketSpec {
            secret_name: secret.map(str::to_string),
            policy,
        },
        status: None,
    }
}

pub fn policy_record(name: &str, bucket: &str, actions: &[&str]) -> Policy {
    Policy {
        metadata: meta(name),
        spec: PolicySpec {
            bucket_name: bucket.to_string(),
            secret_name: None,
            statements: vec![StatementSpec {
                sub_paths: vec!["reports/*".to_string()],
                effect: Effect::Allow,
                actions: actions.iter().map(|a| a.to_string()).collect(),
            }],
        },
        status: None,
    }
}

pub fn credential_secret(name: &str, user: &str, password: &str) -> Secret {
    Secret {
        metadata: meta(name),
        data: Some(BTreeMap::from([
            ("user".to_string(), ByteString(user.as_bytes().to_vec())),
            ("password".to_string(), ByteString(password.as_bytes().to_vec())),
        ])),
        ..Default::default()
    }
}

/// Replace the credentials of a stored secret, keeping its metadata.
pub fn with_credentials(mut secret: Secret, user: &str, password: &str) -> Secret {
    let fresh = credential_secret("unused", user, password);
    secret.data = fresh.data;
    secret
}
