use clap::Args;
use kube::Client;

use minio_operator::control::{ControlApi, ControlError};
use minio_operator::process::{connect_control, StartupError};

/// Print the anonymous access policy of each bucket.
#[derive(Args, Debug, Clone)]
pub struct Lookup {
    /// External bucket names (`<namespace>.<name>`)
    #[arg(required = true)]
    pub buckets: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("failed to create kubernetes client: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to retrieve bucket policy of {bucket}: {source}")]
    Policy {
        bucket: String,
        #[source]
        source: ControlError,
    },
    #[error("bucket {bucket} has an unparseable policy: {source}")]
    Json {
        bucket: String,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Lookup {
    type Error = LookupError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let client = Client::try_default().await?;
        let minio = connect_control(client, &ctx.config).await?;

        let mut documents = Vec::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            let raw = minio
                .anonymous_policy(bucket)
                .await
                .map_err(|source| LookupError::Policy {
                    bucket: bucket.clone(),
                    source,
                })?;
            documents.push(indent(bucket, &raw)?);
        }
        Ok(documents.join("\n"))
    }
}

fn indent(bucket: &str, raw: &str) -> Result<String, LookupError> {
    if raw.trim().is_empty() {
        return Ok(String::new());
    }
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|source| LookupError::Json {
            bucket: bucket.to_string(),
            source,
        })?;
    serde_json::to_string_pretty(&value).map_err(|source| LookupError::Json {
        bucket: bucket.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent() {
        assert_eq!(indent("b", "").unwrap(), "");
        assert_eq!(
            indent("b", r#"{"Version":"2012-10-17"}"#).unwrap(),
            "{\n  \"Version\": \"2012-10-17\"\n}"
        );
        assert!(matches!(indent("b", "{"), Err(LookupError::Json { .. })));
    }
}
