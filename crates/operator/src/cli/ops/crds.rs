use clap::Args;

use minio_operator::crd::crds;

/// Print the CustomResourceDefinitions as a `kubectl apply`-able list.
#[derive(Args, Debug, Clone)]
pub struct Crds;

#[derive(Debug, thiserror::Error)]
pub enum CrdsError {
    #[error("failed to render CRDs: {0}")]
    Json(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Crds {
    type Error = CrdsError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let list = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": crds(),
        });
        Ok(serde_json::to_string_pretty(&list)?)
    }
}
