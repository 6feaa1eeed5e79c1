use serde::{Deserialize, Serialize};

use super::PolicyError;

/// S3 actions understood by MinIO policies.
const KNOWN_ACTIONS: &[&str] = &[
    "s3:AbortMultipartUpload",
    "s3:BypassGovernanceRetention",
    "s3:CreateBucket",
    "s3:DeleteBucket",
    "s3:DeleteBucketPolicy",
    "s3:DeleteObject",
    "s3:DeleteObjectTagging",
    "s3:DeleteObjectVersion",
    "s3:DeleteObjectVersionTagging",
    "s3:ForceDeleteBucket",
    "s3:GetBucketEncryption",
    "s3:GetBucketLocation",
    "s3:GetBucketNotification",
    "s3:GetBucketObjectLockConfiguration",
    "s3:GetBucketPolicy",
    "s3:GetBucketPolicyStatus",
    "s3:GetBucketTagging",
    "s3:GetBucketVersioning",
    "s3:GetLifecycleConfiguration",
    "s3:GetObject",
    "s3:GetObjectLegalHold",
    "s3:GetObjectRetention",
    "s3:GetObjectTagging",
    "s3:GetObjectVersion",
    "s3:GetObjectVersionTagging",
    "s3:GetReplicationConfiguration",
    "s3:ListAllMyBuckets",
    "s3:ListBucket",
    "s3:ListBucketMultipartUploads",
    "s3:ListBucketVersions",
    "s3:ListMultipartUploadParts",
    "s3:ListenBucketNotification",
    "s3:ListenNotification",
    "s3:PutBucketEncryption",
    "s3:PutBucketNotification",
    "s3:PutBucketObjectLockConfiguration",
    "s3:PutBucketPolicy",
    "s3:PutBucketTagging",
    "s3:PutBucketVersioning",
    "s3:PutLifecycleConfiguration",
    "s3:PutObject",
    "s3:PutObjectLegalHold",
    "s3:PutObjectRetention",
    "s3:PutObjectTagging",
    "s3:PutObjectVersionTagging",
    "s3:PutReplicationConfiguration",
    "s3:ReplicateDelete",
    "s3:ReplicateObject",
    "s3:ReplicateTags",
    "s3:RestoreObject",
];

/// A single policy action such as `s3:GetObject`.
///
/// Deserialization accepts any string so live documents always parse;
/// use [`Action::parse`] for user input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub const GET_BUCKET_LOCATION: &'static str = "s3:GetBucketLocation";
    pub const LIST_BUCKET: &'static str = "s3:ListBucket";
    pub const LIST_BUCKET_MULTIPART_UPLOADS: &'static str = "s3:ListBucketMultipartUploads";
    pub const LIST_MULTIPART_UPLOAD_PARTS: &'static str = "s3:ListMultipartUploadParts";
    pub const PUT_OBJECT: &'static str = "s3:PutObject";
    pub const ABORT_MULTIPART_UPLOAD: &'static str = "s3:AbortMultipartUpload";
    pub const DELETE_OBJECT: &'static str = "s3:DeleteObject";
    pub const GET_OBJECT: &'static str = "s3:GetObject";

    /// Validate an action name against the known vocabulary.
    ///
    /// `s3:*` and wildcard prefixes matching at least one known action
    /// (`s3:Get*`) are accepted.
    pub fn parse(value: &str) -> Result<Self, PolicyError> {
        let valid = match value.strip_suffix('*') {
            Some(prefix) => {
                prefix.starts_with("s3:")
                    && !prefix.contains('*')
                    && KNOWN_ACTIONS.iter().any(|known| known.starts_with(prefix))
            }
            None => KNOWN_ACTIONS.contains(&value),
        };

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(PolicyError::InvalidAction(value.to_string()))
        }
    }

    pub(crate) fn known(value: &'static str) -> Self {
        Self(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_actions() {
        for action in KNOWN_ACTIONS {
            assert!(Action::parse(action).is_ok(), "{action}");
        }
    }

    #[test]
    fn test_parse_wildcards() {
        assert!(Action::parse("s3:*").is_ok());
        assert!(Action::parse("s3:Get*").is_ok());
        assert!(Action::parse("s3:PutObject*").is_ok());
        assert!(Action::parse("s3:Frobnicate*").is_err());
        assert!(Action::parse("*").is_err());
        assert!(Action::parse("s3:**").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for bad in ["", "GetObject", "s3:getobject", "s3:GetObjects", "admin:*"] {
            assert!(
                matches!(Action::parse(bad), Err(PolicyError::InvalidAction(a)) if a == bad),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_constants_are_known() {
        for action in [
            Action::GET_BUCKET_LOCATION,
            Action::LIST_BUCKET,
            Action::LIST_BUCKET_MULTIPART_UPLOADS,
            Action::LIST_MULTIPART_UPLOAD_PARTS,
            Action::PUT_OBJECT,
            Action::ABORT_MULTIPART_UPLOAD,
            Action::DELETE_OBJECT,
            Action::GET_OBJECT,
        ] {
            assert!(KNOWN_ACTIONS.contains(&action));
        }
    }
}
