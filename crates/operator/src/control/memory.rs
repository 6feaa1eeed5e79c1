use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use async_trait::async_trait;

use super::{ControlApi, ControlError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    BucketExists,
    CreateBucket,
    DeleteBucket,
    AnonymousPolicy,
    SetAnonymousPolicy,
    CreateCannedPolicy,
    DeleteCannedPolicy,
    PolicyUsers,
    CreateUser,
    SetUserPassword,
    DeleteUser,
    AttachPolicy,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::BucketExists => "bucket-exists",
            Operation::CreateBucket => "create-bucket",
            Operation::DeleteBucket => "delete-bucket",
            Operation::AnonymousPolicy => "get-bucket-policy",
            Operation::SetAnonymousPolicy => "set-bucket-policy",
            Operation::CreateCannedPolicy => "add-canned-policy",
            Operation::DeleteCannedPolicy => "remove-canned-policy",
            Operation::PolicyUsers => "policy-entities",
            Operation::CreateUser => "add-user",
            Operation::SetUserPassword => "set-user",
            Operation::DeleteUser => "remove-user",
            Operation::AttachPolicy => "attach-policy",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded control API call and the bucket, policy or user it targeted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub password: String,
    pub enabled: bool,
}

/// In-memory MinIO cluster.
///
/// Faults injected with [`MemoryControl::fail`] persist until cleared, and
/// failing calls are still recorded.
#[derive(Debug, Clone, Default)]
pub struct MemoryControl {
    inner: Arc<RwLock<MemoryControlInner>>,
}

#[derive(Debug, Default)]
struct MemoryControlInner {
    /// bucket -> anonymous policy document (empty when none)
    buckets: BTreeMap<String, String>,
    /// canned policy name -> document
    policies: BTreeMap<String, String>,
    /// canned policy name -> attached users
    mappings: BTreeMap<String, BTreeSet<String>>,
    users: BTreeMap<String, User>,
    calls: Vec<Call>,
    faults: BTreeMap<Operation, String>,
}

impl MemoryControl {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<RwLockWriteGuard<'_, MemoryControlInner>, ControlError> {
        self.inner
            .write()
            .map_err(|e| ControlError::Decode(format!("failed to acquire lock: {}", e)))
    }

    /// Record the call and fail it if a fault is injected.
    fn enter(
        &self,
        operation: Operation,
        target: &str,
    ) -> Result<RwLockWriteGuard<'_, MemoryControlInner>, ControlError> {
        let mut inner = self.lock()?;
        inner.calls.push(Call {
            operation,
            target: target.to_string(),
        });
        if let Some(message) = inner.faults.get(&operation) {
            return Err(ControlError::Injected {
                operation,
                message: message.clone(),
            });
        }
        Ok(inner)
    }

    /// Make every subsequent `operation` fail.
    pub fn fail(&self, operation: Operation, message: &str) {
        if let Ok(mut inner) = self.inner.write() {
            inner.faults.insert(operation, message.to_string());
        }
    }

    pub fn clear_fault(&self, operation: Operation) {
        if let Ok(mut inner) = self.inner.write() {
            inner.faults.remove(&operation);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner
            .read()
            .map(|inner| inner.calls.clone())
            .unwrap_or_default()
    }

    /// Operations recorded so far, in order.
    pub fn operations(&self) -> Vec<Operation> {
        self.calls().into_iter().map(|call| call.operation).collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.calls.clear();
        }
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.inner
            .read()
            .is_ok_and(|inner| inner.buckets.contains_key(bucket))
    }

    pub fn bucket_policy(&self, bucket: &str) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.buckets.get(bucket).cloned())
    }

    pub fn canned_policy(&self, name: &str) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.policies.get(name).cloned())
    }

    pub fn user(&self, name: &str) -> Option<User> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.users.get(name).cloned())
    }

    pub fn attached_users(&self, policy: &str) -> Vec<String> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.mappings.get(policy).cloned())
            .map(|users| users.into_iter().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ControlApi for MemoryControl {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ControlError> {
        let inner = self.enter(Operation::BucketExists, bucket)?;
        Ok(inner.buckets.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::CreateBucket, bucket)?;
        inner.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::DeleteBucket, bucket)?;
        inner.buckets.remove(bucket);
        Ok(())
    }

    async fn anonymous_policy(&self, bucket: &str) -> Result<String, ControlError> {
        let inner = self.enter(Operation::AnonymousPolicy, bucket)?;
        inner
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| no_such("NoSuchBucket", Operation::AnonymousPolicy, bucket))
    }

    async fn set_anonymous_policy(
        &self,
        bucket: &str,
        document: &str,
    ) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::SetAnonymousPolicy, bucket)?;
        let slot = inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| no_such("NoSuchBucket", Operation::SetAnonymousPolicy, bucket))?;
        *slot = document.to_string();
        Ok(())
    }

    async fn create_canned_policy(&self, name: &str, document: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::CreateCannedPolicy, name)?;
        inner
            .policies
            .insert(name.to_string(), document.to_string());
        Ok(())
    }

    async fn delete_canned_policy(&self, name: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::DeleteCannedPolicy, name)?;
        inner.policies.remove(name);
        inner.mappings.remove(name);
        Ok(())
    }

    async fn policy_users(&self, name: &str) -> Result<Option<Vec<String>>, ControlError> {
        let inner = self.enter(Operation::PolicyUsers, name)?;
        if !inner.policies.contains_key(name) {
            return Ok(None);
        }
        Ok(Some(
            inner
                .mappings
                .get(name)
                .map(|users| users.iter().cloned().collect())
                .unwrap_or_default(),
        ))
    }

    async fn create_user(&self, user: &str, password: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::CreateUser, user)?;
        inner.users.insert(
            user.to_string(),
            User {
                password: password.to_string(),
                enabled: true,
            },
        );
        Ok(())
    }

    async fn set_user_password(
        &self,
        user: &str,
        password: &str,
        enabled: bool,
    ) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::SetUserPassword, user)?;
        inner.users.insert(
            user.to_string(),
            User {
                password: password.to_string(),
                enabled,
            },
        );
        Ok(())
    }

    async fn delete_user(&self, user: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::DeleteUser, user)?;
        inner.users.remove(user);
        for users in inner.mappings.values_mut() {
            users.remove(user);
        }
        Ok(())
    }

    async fn attach_policy(&self, policy: &str, user: &str) -> Result<(), ControlError> {
        let mut inner = self.enter(Operation::AttachPolicy, policy)?;
        if !inner.policies.contains_key(policy) {
            return Err(no_such("NoSuchPolicy", Operation::AttachPolicy, policy));
        }
        if !inner.users.contains_key(user) {
            return Err(no_such("NoSuchUser", Operation::AttachPolicy, user));
        }
        inner
            .mappings
            .entry(policy.to_string())
            .or_default()
            .insert(user.to_string());
        Ok(())
    }
}

fn no_such(code: &str, operation: Operation, target: &str) -> ControlError {
    ControlError::Status {
        operation: operation.as_str(),
        status: 404,
        code: code.to_string(),
        message: target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use common::credentials::Credentials;

    use super::*;

    fn credentials(user: &str, password: &str) -> Credentials {
        Credentials {
            user: user.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn test_reconcile_policy_creates_policy_user_and_mapping() {
        let control = MemoryControl::new();
        control
            .reconcile_policy("ns.b.p", &credentials("ALICE", "password-1"), "{}")
            .await
            .unwrap();

        assert_eq!(control.canned_policy("ns.b.p").as_deref(), Some("{}"));
        assert_eq!(control.attached_users("ns.b.p"), vec!["ALICE".to_string()]);
        assert_eq!(
            control.operations(),
            vec![
                Operation::PolicyUsers,
                Operation::CreateCannedPolicy,
                Operation::CreateUser,
                Operation::AttachPolicy,
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_policy_rotates_user() {
        let control = MemoryControl::new();
        control
            .reconcile_policy("p", &credentials("ALICE", "password-1"), "{}")
            .await
            .unwrap();
        control.clear_calls();

        // a different user replaces the stale one
        control
            .reconcile_policy("p", &credentials("BOB", "password-2"), "{\"changed\":true}")
            .await
            .unwrap();
        assert_eq!(
            control.operations(),
            vec![
                Operation::PolicyUsers,
                Operation::DeleteUser,
                Operation::CreateUser,
                Operation::AttachPolicy,
            ]
        );
        assert!(control.user("ALICE").is_none());
        assert_eq!(control.attached_users("p"), vec!["BOB".to_string()]);
        assert_eq!(control.canned_policy("p").as_deref(), Some("{}"));
        control.clear_calls();

        // the same user only gets its password updated
        control
            .reconcile_policy("p", &credentials("BOB", "password-3"), "{}")
            .await
            .unwrap();
        assert_eq!(
            control.operations(),
            vec![Operation::PolicyUsers, Operation::SetUserPassword]
        );
        assert_eq!(
            control.user("BOB"),
            Some(User {
                password: "password-3".to_string(),
                enabled: true
            })
        );
    }

    #[tokio::test]
    async fn test_reconcile_policy_mapping_without_users() {
        let control = MemoryControl::new();
        control.create_canned_policy("p", "{}").await.unwrap();
        control.clear_calls();

        control
            .reconcile_policy("p", &credentials("ALICE", "password-1"), "{}")
            .await
            .unwrap();
        assert_eq!(
            control.operations(),
            vec![
                Operation::PolicyUsers,
                Operation::CreateUser,
                Operation::AttachPolicy,
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_policy_is_idempotent() {
        let control = MemoryControl::new();
        control
            .reconcile_policy("p", &credentials("ALICE", "password-1"), "{}")
            .await
            .unwrap();

        control.delete_policy("p").await.unwrap();
        assert!(control.canned_policy("p").is_none());
        assert!(control.user("ALICE").is_none());

        control.delete_policy("p").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_policy_attempts_every_deletion() {
        let control = MemoryControl::new();
        control
            .reconcile_policy("p", &credentials("ALICE", "password-1"), "{}")
            .await
            .unwrap();
        control.fail(Operation::DeleteUser, "boom");
        control.fail(Operation::DeleteCannedPolicy, "boom");

        let err = control.delete_policy("p").await.unwrap_err();
        assert!(matches!(err, ControlError::Multiple(ref errors) if errors.len() == 2));
        assert!(control
            .operations()
            .ends_with(&[Operation::DeleteUser, Operation::DeleteCannedPolicy]));
    }

    #[tokio::test]
    async fn test_faults_persist_until_cleared() {
        let control = MemoryControl::new();
        control.fail(Operation::CreateBucket, "unavailable");
        assert!(control.create_bucket("b").await.is_err());
        assert!(control.create_bucket("b").await.is_err());

        control.clear_fault(Operation::CreateBucket);
        control.create_bucket("b").await.unwrap();
        assert!(control.has_bucket("b"));
        assert_eq!(control.bucket_policy("b").as_deref(), Some(""));
    }
}
