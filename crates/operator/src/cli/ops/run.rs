use clap::Args;

use minio_operator::config::Overrides;
use minio_operator::spawn_operator;

#[derive(Args, Debug, Clone)]
pub struct Run {
    /// Override the health server port (default from config)
    #[arg(long)]
    pub health_port: Option<u16>,

    /// Directory for log files (logs to stdout only if not set)
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("operator failed: {0}")]
    Failed(String),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Run {
    type Error = RunError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = ctx.config.clone();
        config.apply(Overrides {
            health_port: self.health_port,
            log_dir: self.log_dir.clone(),
            ..Default::default()
        });

        spawn_operator(&config).await;
        Ok("operator stopped".to_string())
    }
}
