use common::names;
use common::policy::AnonymousAccess;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::Conditioned;

pub const BUCKET_FINALIZER: &str = "bucket.ixday.github.io/finalizer";
/// Annotation on a credential secret naming the Bucket that owns it.
pub const BUCKET_SECRET_ANNOTATION: &str = "bucket.ixday.github.io/secret";

/// A MinIO bucket, its anonymous access level and an optional dedicated
/// IAM user.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    kind = "Bucket",
    group = "minio.ixday.github.io",
    version = "v1alpha1",
    status = "BucketStatus",
    namespaced,
    printcolumn = r#"{ "name": "policy", "type": "string", "description": "anonymous access level", "jsonPath": ".spec.policy" }"#,
    printcolumn = r#"{ "name": "secret", "type": "string", "description": "credential secret", "jsonPath": ".spec.secretName" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    /// Secret holding the credentials of the bucket's IAM user. When unset
    /// no user is provisioned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default)]
    pub policy: AnonymousAccess,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BucketStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Bucket {
    /// Name of the bucket on the MinIO cluster.
    pub fn bucket_name(&self) -> String {
        names::bucket_name(&self.namespace().unwrap_or_default(), &self.name_any())
    }

    pub fn secret_name(&self) -> Option<&str> {
        self.spec.secret_name.as_deref().filter(|name| !name.is_empty())
    }
}

impl Conditioned for Bucket {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|status| status.conditions.as_slice())
            .unwrap_or_default()
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.status.get_or_insert_with(Default::default).conditions
    }
}
