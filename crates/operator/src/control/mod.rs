//! # Control API
//!
//! Capability interface over the MinIO cluster: buckets, anonymous bucket
//! policies, canned IAM policies and users.
//!
//! Every primitive is idempotent where the cluster allows it ("already
//! absent" is success for deletes). [`ControlApi::reconcile_policy`] and
//! [`ControlApi::delete_policy`] compose the primitives into the IAM
//! convergence used by both reconcilers.
//!
//! - [`MinioClient`] speaks the S3 and MinIO admin HTTP APIs.
//! - [`MemoryControl`] is an in-memory fake with a call log and fault
//!   injection.

mod memory;
mod minio;

use async_trait::async_trait;

use common::credentials::Credentials;

pub use memory::{Call, MemoryControl, Operation, User};
pub use minio::MinioClient;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error("{operation} failed with status {status}: {code} {message}")]
    Status {
        operation: &'static str,
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("encryption error: {0}")]
    Crypto(String),
    /// The bootstrap secret for the control API is malformed
    #[error("invalid connection secret: {0}")]
    InvalidSecretFormat(String),
    #[error("{operation} failed: {message}")]
    Injected {
        operation: Operation,
        message: String,
    },
    #[error("{}", join_errors(.0))]
    Multiple(Vec<ControlError>),
}

fn join_errors(errors: &[ControlError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
pub trait ControlApi: Send + Sync + 'static {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ControlError>;

    /// Create a bucket. A bucket already owned by the caller is success.
    async fn create_bucket(&self, bucket: &str) -> Result<(), ControlError>;

    /// Delete a bucket. An absent bucket is success.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), ControlError>;

    /// Raw anonymous-access policy of a bucket, empty when there is none.
    async fn anonymous_policy(&self, bucket: &str) -> Result<String, ControlError>;

    /// Replace the anonymous-access policy; an empty document removes it.
    async fn set_anonymous_policy(&self, bucket: &str, document: &str)
        -> Result<(), ControlError>;

    async fn create_canned_policy(&self, name: &str, document: &str) -> Result<(), ControlError>;

    /// Delete a canned policy. An absent policy is success.
    async fn delete_canned_policy(&self, name: &str) -> Result<(), ControlError>;

    /// Users attached to a canned policy, `None` when the policy has no
    /// mapping at all.
    async fn policy_users(&self, name: &str) -> Result<Option<Vec<String>>, ControlError>;

    async fn create_user(&self, user: &str, password: &str) -> Result<(), ControlError>;

    async fn set_user_password(
        &self,
        user: &str,
        password: &str,
        enabled: bool,
    ) -> Result<(), ControlError>;

    /// Delete a user. An absent user is success.
    async fn delete_user(&self, user: &str) -> Result<(), ControlError>;

    async fn attach_policy(&self, policy: &str, user: &str) -> Result<(), ControlError>;

    /// Converge a canned policy and the single user bound to it.
    ///
    /// - no mapping: create the policy, create the user, attach
    /// - mapping without users: create the user, attach
    /// - the attached user is the desired one: rotate its password and
    ///   make sure it is enabled
    /// - another user is attached: delete it, create the desired user,
    ///   attach (the policy document is left as is)
    async fn reconcile_policy(
        &self,
        name: &str,
        credentials: &Credentials,
        document: &str,
    ) -> Result<(), ControlError> {
        let users = match self.policy_users(name).await? {
            None => {
                tracing::info!(policy = %name, "creating canned policy");
                self.create_canned_policy(name, document).await?;
                return self.create_and_attach(name, credentials).await;
            }
            Some(users) => users,
        };

        let Some(attached) = users.first() else {
            return self.create_and_attach(name, credentials).await;
        };

        if *attached == credentials.user {
            tracing::debug!(policy = %name, user = %attached, "rotating user password");
            return self
                .set_user_password(&credentials.user, &credentials.password, true)
                .await;
        }

        tracing::info!(policy = %name, stale = %attached, user = %credentials.user, "replacing policy user");
        self.delete_user(attached).await?;
        self.create_and_attach(name, credentials).await
    }

    async fn create_and_attach(
        &self,
        name: &str,
        credentials: &Credentials,
    ) -> Result<(), ControlError> {
        self.create_user(&credentials.user, &credentials.password)
            .await?;
        self.attach_policy(name, &credentials.user).await
    }

    /// Delete every user attached to a canned policy, then the policy.
    ///
    /// Every deletion is attempted; failures are collected into
    /// [`ControlError::Multiple`].
    async fn delete_policy(&self, name: &str) -> Result<(), ControlError> {
        let mut errors = Vec::new();

        for user in self.policy_users(name).await?.unwrap_or_default() {
            if let Err(err) = self.delete_user(&user).await {
                tracing::warn!(policy = %name, user = %user, error = %err, "failed to delete policy user");
                errors.push(err);
            }
        }
        if let Err(err) = self.delete_canned_policy(name).await {
            errors.push(err);
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ControlError::Multiple(errors)),
        }
    }
}
