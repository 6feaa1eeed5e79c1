use common::policy::from_statements;
use kube::ResourceExt;

use super::secret::{credentials_from_secret, delete_owned_secret, ensure_secret, SecretState};
use super::{
    fetch, persist_conditions, Context, Outcome, ReconcileError, REASON_BUCKET_MISSING,
    REASON_INVALID_CREDENTIALS, REASON_INVALID_SPEC, REASON_RECONCILING,
};
use crate::control::ControlApi;
use crate::crd::{
    add_finalizer, has_finalizer, is_deleting, remove_finalizer, Bucket, Condition,
    ConditionStatus, Conditioned, Policy, AVAILABLE, BUCKET_EXISTS, POLICY_FINALIZER,
    POLICY_SECRET_ANNOTATION,
};
use crate::store::RecordStore;

/// Drives a [`Policy`] record: a canned IAM policy translated from its
/// statements and the single user bound to it.
pub struct PolicyReconciler<S, C> {
    ctx: Context<S, C>,
}

impl<S, C> PolicyReconciler<S, C>
where
    S: RecordStore,
    C: ControlApi,
{
    pub fn new(ctx: Context<S, C>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Context<S, C> {
        &self.ctx
    }

    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Outcome, ReconcileError> {
        let store = &self.ctx.store;

        let Some(mut policy) = fetch::<_, Policy>(store, namespace, name).await? else {
            tracing::debug!("policy record is gone");
            return Ok(Outcome::Done);
        };

        if is_deleting(&policy) {
            if !has_finalizer(&policy, POLICY_FINALIZER) {
                return Ok(Outcome::Done);
            }
            return self.finalize(policy).await;
        }

        if add_finalizer(&mut policy, POLICY_FINALIZER) {
            tracing::debug!("adding finalizer");
            policy = store.update(&policy).await?;
        }

        if policy.conditions().is_empty() {
            let starting = Condition::new(
                AVAILABLE,
                ConditionStatus::Unknown,
                REASON_RECONCILING,
                "Starting reconciliation",
            )
            .observed(policy.metadata.generation);
            policy = persist_conditions(store, policy, [starting]).await?;
        }

        if rejected_generation(&policy) {
            tracing::debug!("statements were rejected for this generation, skipping");
            return Ok(Outcome::Done);
        }

        let bucket_record = policy.spec.bucket_name.clone();
        let Some(bucket) = fetch::<_, Bucket>(store, namespace, &bucket_record).await? else {
            tracing::warn!(bucket = %bucket_record, "policy references a missing bucket record");
            let missing = Condition::new(
                BUCKET_EXISTS,
                ConditionStatus::False,
                REASON_BUCKET_MISSING,
                "BucketRef must reference an existing bucket to be attached",
            )
            .observed(policy.metadata.generation);
            persist_conditions(store, policy, [missing]).await?;
            return Err(ReconcileError::BucketMissing {
                bucket: bucket_record,
            });
        };

        let document = match from_statements(&bucket.bucket_name(), &policy.spec.statements) {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting policy statements");
                let invalid = Condition::new(
                    AVAILABLE,
                    ConditionStatus::False,
                    REASON_INVALID_SPEC,
                    err.to_string(),
                )
                .observed(policy.metadata.generation);
                persist_conditions(store, policy, [bucket_exists(&bucket_record), invalid])
                    .await?;
                return Ok(Outcome::Done);
            }
        };

        let secret_name = policy.secret_name();
        let secret = match ensure_secret(store, &policy, &secret_name, POLICY_SECRET_ANNOTATION)
            .await
        {
            Ok(SecretState::Created) => {
                return Ok(Outcome::RequeueAfter(self.ctx.settings.secret_requeue));
            }
            Ok(SecretState::Ready(secret)) => secret,
            Err(err @ ReconcileError::KeyGeneration(_)) => {
                let message = format!(
                    "Failed to create Secret for the custom resource ({}): ({})",
                    policy.name_any(),
                    err
                );
                self.unavailable(policy, REASON_RECONCILING, message).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let credentials = match credentials_from_secret(&secret) {
            Ok(credentials) => credentials,
            Err(err) => {
                tracing::warn!(secret = %secret_name, error = %err, "unusable credentials");
                self.unavailable(policy, REASON_INVALID_CREDENTIALS, err.to_string())
                    .await?;
                return Err(err);
            }
        };

        let policy_name = policy.policy_name();
        self.ctx
            .control
            .reconcile_policy(&policy_name, &credentials, &document.to_json()?)
            .await?;

        let available = Condition::new(
            AVAILABLE,
            ConditionStatus::True,
            REASON_RECONCILING,
            format!("Policy {} created successfully", policy_name),
        )
        .observed(policy.metadata.generation);
        persist_conditions(store, policy, [bucket_exists(&bucket_record), available]).await?;
        Ok(Outcome::Done)
    }

    async fn finalize(&self, mut policy: Policy) -> Result<Outcome, ReconcileError> {
        let store = &self.ctx.store;
        let policy_name = policy.policy_name();

        tracing::info!(policy = %policy_name, "deleting associated users and policy");
        self.ctx.control.delete_policy(&policy_name).await?;
        delete_owned_secret(store, &policy, &policy.secret_name()).await?;

        remove_finalizer(&mut policy, POLICY_FINALIZER);
        match store.update(&policy).await {
            Err(err) if !err.is_not_found() => Err(err.into()),
            _ => Ok(Outcome::Done),
        }
    }

    async fn unavailable(
        &self,
        policy: Policy,
        reason: &str,
        message: String,
    ) -> Result<Policy, ReconcileError> {
        let condition = Condition::new(AVAILABLE, ConditionStatus::False, reason, message)
            .observed(policy.metadata.generation);
        Ok(persist_conditions(&self.ctx.store, policy, [condition]).await?)
    }
}

/// The current generation's statements were already rejected.
fn rejected_generation(policy: &Policy) -> bool {
    policy.condition(AVAILABLE).is_some_and(|condition| {
        condition.status == ConditionStatus::False
            && condition.reason == REASON_INVALID_SPEC
            && condition.observed_generation == policy.metadata.generation
    })
}

fn bucket_exists(bucket: &str) -> Condition {
    Condition::new(
        BUCKET_EXISTS,
        ConditionStatus::True,
        REASON_RECONCILING,
        format!("Bucket {} exists", bucket),
    )
}
