use common::policy::{bucket_user_policy, decide};
use kube::ResourceExt;

use super::secret::{credentials_from_secret, delete_owned_secret, ensure_secret, SecretState};
use super::{
    fetch, persist_conditions, Context, Outcome, ReconcileError, REASON_INVALID_CREDENTIALS,
    REASON_RECONCILING,
};
use crate::control::ControlApi;
use crate::crd::{
    add_finalizer, has_finalizer, is_deleting, remove_finalizer, Bucket, Condition,
    ConditionStatus, Conditioned, AVAILABLE, BUCKET_FINALIZER, BUCKET_SECRET_ANNOTATION,
};
use crate::store::RecordStore;

/// Drives a [`Bucket`] record: the external bucket, its anonymous access
/// policy and, when the record names a secret, a dedicated IAM user bound
/// to a canned policy named after the bucket.
pub struct BucketReconciler<S, C> {
    ctx: Context<S, C>,
}

impl<S, C> BucketReconciler<S, C>
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
        let control = &self.ctx.control;

        let Some(mut bucket) = fetch::<_, Bucket>(store, namespace, name).await? else {
            tracing::debug!("bucket record is gone");
            return Ok(Outcome::Done);
        };
        let bucket_name = bucket.bucket_name();

        if is_deleting(&bucket) {
            if !has_finalizer(&bucket, BUCKET_FINALIZER) {
                return Ok(Outcome::Done);
            }
            return self.finalize(bucket).await;
        }

        if add_finalizer(&mut bucket, BUCKET_FINALIZER) {
            tracing::debug!("adding finalizer");
            bucket = store.update(&bucket).await?;
        }

        if bucket.conditions().is_empty() {
            let starting = Condition::new(
                AVAILABLE,
                ConditionStatus::Unknown,
                REASON_RECONCILING,
                "Starting reconciliation",
            )
            .observed(bucket.metadata.generation);
            bucket = persist_conditions(store, bucket, [starting]).await?;
        }

        let exists = match control.bucket_exists(&bucket_name).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(bucket = %bucket_name, error = %err, "failed to check bucket existence, attempting creation");
                false
            }
        };
        if !exists {
            tracing::info!(bucket = %bucket_name, "creating bucket");
            control.create_bucket(&bucket_name).await?;
            return Ok(Outcome::RequeueAfter(self.ctx.settings.bucket_requeue));
        }

        let current = control.anonymous_policy(&bucket_name).await?;
        let decision = decide(&bucket_name, &current, bucket.spec.policy)?;
        if let Some(document) = decision.document() {
            tracing::info!(bucket = %bucket_name, policy = %bucket.spec.policy, "updating anonymous access policy");
            control
                .set_anonymous_policy(&bucket_name, document)
                .await?;
        }

        let Some(secret_name) = bucket.secret_name().map(str::to_string) else {
            self.available(bucket).await?;
            return Ok(Outcome::Done);
        };

        let secret = match ensure_secret(store, &bucket, &secret_name, BUCKET_SECRET_ANNOTATION).await
        {
            Ok(SecretState::Created) => {
                return Ok(Outcome::RequeueAfter(self.ctx.settings.secret_requeue));
            }
            Ok(SecretState::Ready(secret)) => secret,
            Err(err @ ReconcileError::KeyGeneration(_)) => {
                let message = format!(
                    "Failed to create Secret for the custom resource ({}): ({})",
                    bucket.name_any(),
                    err
                );
                self.unavailable(bucket, REASON_RECONCILING, message).await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let credentials = match credentials_from_secret(&secret) {
            Ok(credentials) => credentials,
            Err(err) => {
                tracing::warn!(secret = %secret_name, error = %err, "unusable credentials");
                self.unavailable(bucket, REASON_INVALID_CREDENTIALS, err.to_string())
                    .await?;
                return Err(err);
            }
        };

        let document = bucket_user_policy(&bucket_name).to_json()?;
        control
            .reconcile_policy(&bucket_name, &credentials, &document)
            .await?;

        self.available(bucket).await?;
        Ok(Outcome::Done)
    }

    /// Remove the external resources, then release the finalizer.
    async fn finalize(&self, mut bucket: Bucket) -> Result<Outcome, ReconcileError> {
        let store = &self.ctx.store;
        let control = &self.ctx.control;
        let bucket_name = bucket.bucket_name();

        tracing::info!(bucket = %bucket_name, "deleting bucket user, policy and bucket");
        control.delete_policy(&bucket_name).await?;
        control.delete_bucket(&bucket_name).await?;
        if let Some(secret_name) = bucket.secret_name().map(str::to_string) {
            delete_owned_secret(store, &bucket, &secret_name).await?;
        }

        remove_finalizer(&mut bucket, BUCKET_FINALIZER);
        match store.update(&bucket).await {
            Err(err) if !err.is_not_found() => Err(err.into()),
            _ => Ok(Outcome::Done),
        }
    }

    async fn available(&self, bucket: Bucket) -> Result<Bucket, ReconcileError> {
        let condition = Condition::new(
            AVAILABLE,
            ConditionStatus::True,
            REASON_RECONCILING,
            format!("Bucket {} created successfully", bucket.name_any()),
        )
        .observed(bucket.metadata.generation);
        Ok(persist_conditions(&self.ctx.store, bucket, [condition]).await?)
    }

    async fn unavailable(
        &self,
        bucket: Bucket,
        reason: &str,
        message: String,
    ) -> Result<Bucket, ReconcileError> {
        let condition = Condition::new(AVAILABLE, ConditionStatus::False, reason, message)
            .observed(bucket.metadata.generation);
        Ok(persist_conditions(&self.ctx.store, bucket, [condition]).await?)
    }
}
