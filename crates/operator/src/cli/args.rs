pub use clap::Parser;

use std::path::PathBuf;

use minio_operator::config::Overrides;

#[derive(Parser, Debug)]
#[command(name = "minio-operator")]
#[command(about = "Reconciles MinIO buckets, bucket policies and IAM users from Kubernetes records")]
pub struct Args {
    /// Path to a TOML config file
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Name of the secret holding the MinIO endpoint and admin credentials
    #[arg(long, global = true)]
    pub connection_secret: Option<String>,

    /// Namespace of the connection secret (defaults to POD_NAMESPACE)
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    #[command(subcommand)]
    pub command: crate::Command,
}

impl Args {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            connection_secret: self.connection_secret.clone(),
            namespace: self.namespace.clone(),
            log_level: self.log_level,
            ..Default::default()
        }
    }
}
