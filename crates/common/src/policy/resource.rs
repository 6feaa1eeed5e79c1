use serde::{Deserialize, Serialize};

use super::PolicyError;

const ARN_PREFIX: &str = "arn:aws:s3:::";

/// An S3 resource ARN naming a bucket or an object path inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resource(String);

impl Resource {
    /// `arn:aws:s3:::bucket`
    pub fn bucket(bucket: &str) -> Self {
        Self(format!("{ARN_PREFIX}{bucket}"))
    }

    /// `arn:aws:s3:::bucket/*`
    pub fn objects(bucket: &str) -> Self {
        Self(format!("{ARN_PREFIX}{bucket}/*"))
    }

    /// `arn:aws:s3:::bucket/<sub_path>`, rejecting paths that would not
    /// name a well-formed prefix of the bucket.
    pub fn sub_path(bucket: &str, sub_path: &str) -> Result<Self, PolicyError> {
        let invalid = || PolicyError::InvalidSubPath(sub_path.to_string());

        if sub_path.is_empty() || sub_path.starts_with('/') {
            return Err(invalid());
        }
        if sub_path
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(invalid());
        }

        // a single trailing slash is allowed for directory-style prefixes
        let trimmed = sub_path.strip_suffix('/').unwrap_or(sub_path);
        if trimmed
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid());
        }

        Ok(Self(format!("{ARN_PREFIX}{bucket}/{sub_path}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
