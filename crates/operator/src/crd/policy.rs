use common::names;
use common::policy::StatementSpec;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::Condition;
use super::Conditioned;

pub const POLICY_FINALIZER: &str = "policy.ixday.github.io/finalizer";
/// Annotation on a credential secret naming the Policy that owns it.
pub const POLICY_SECRET_ANNOTATION: &str = "policy.ixday.github.io/secret";

/// A fine-grained IAM policy on a bucket, bound to a dedicated user.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "Policy",
    group = "minio.ixday.github.io",
    version = "v1alpha1",
    plural = "policies",
    status = "PolicyStatus",
    namespaced,
    printcolumn = r#"{ "name": "bucket", "type": "string", "description": "target Bucket record", "jsonPath": ".spec.bucketName" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    /// Name of a Bucket record in the same namespace.
    pub bucket_name: String,
    /// Credential secret; defaults to the record name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[schemars(length(min = 1))]
    pub statements: Vec<StatementSpec>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Policy {
    /// Name of the canned policy on the MinIO cluster.
    pub fn policy_name(&self) -> String {
        names::policy_name(
            &self.namespace().unwrap_or_default(),
            &self.spec.bucket_name,
            &self.name_any(),
        )
    }

    pub fn secret_name(&self) -> String {
        self.spec
            .secret_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.name_any())
    }
}

impl Conditioned for Policy {
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
