pub mod utils;

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{ConfigError, OperatorConfig};
use crate::control::{ControlError, MinioClient};
use crate::controller::{self, shutdown_signal};
use crate::http_server::{self, health::OperatorReadiness};
use crate::reconcile::{BucketReconciler, Context, PolicyReconciler};
use crate::store::KubeStore;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
    #[error("failed to create kubernetes client: {0}")]
    Kube(#[from] kube::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to retrieve connection secret {namespace}/{name}: {source}")]
    ConnectionSecret {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error(transparent)]
    Control(#[from] ControlError),
}

/// Handle for gracefully shutting down the operator.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the operator shuts down (via signal or explicit shutdown).
    pub async fn wait(self) {
        shutdown_and_join(self.graceful_waiter, self.handles).await;
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(config: &OperatorConfig) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // Stdout layer
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = &config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "minio-operator.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(config.log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Build the MinIO client from the connection secret in the operator's
/// namespace.
pub async fn connect_control(
    client: Client,
    config: &OperatorConfig,
) -> Result<MinioClient, StartupError> {
    let namespace = config.resolve_namespace()?;
    let name = config.connection_secret.clone();

    let secret = Api::<Secret>::namespaced(client, &namespace)
        .get(&name)
        .await
        .map_err(|source| StartupError::ConnectionSecret {
            namespace: namespace.clone(),
            name: name.clone(),
            source,
        })?;

    let minio = MinioClient::from_secret(&secret)?;
    tracing::info!(endpoint = %minio.endpoint(), secret = %name, namespace = %namespace, "connected to minio");
    Ok(minio)
}

/// Wait for shutdown and join all handles with timeout.
async fn shutdown_and_join(
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
) {
    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}

/// Drive the controllers, reporting ready only while they are running.
async fn supervise<F>(readiness: OperatorReadiness, controllers: F)
where
    F: Future<Output = ()>,
{
    readiness.set_running(true);
    controllers.await;
    readiness.set_running(false);
    tracing::info!("controllers stopped");
}

/// Connect to the cluster and MinIO, then spawn both controllers and the
/// health server.
pub async fn start_operator(config: &OperatorConfig) -> Result<ShutdownHandle, StartupError> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) =
        utils::graceful_shutdown_blocker().map_err(StartupError::Signals)?;

    let client = Client::try_default().await?;
    let minio = connect_control(client.clone(), config).await?;

    let ctx = Context::new(
        KubeStore::new(client.clone()),
        Arc::new(minio),
        config.settings(),
    );
    let readiness = OperatorReadiness::new(shutdown_rx.clone());
    let mut handles = Vec::new();

    let buckets = Arc::new(BucketReconciler::new(ctx.clone()));
    let policies = Arc::new(PolicyReconciler::new(ctx));
    let bucket_shutdown = shutdown_signal(shutdown_rx.clone());
    let policy_shutdown = shutdown_signal(shutdown_rx.clone());
    let controllers = async move {
        tokio::join!(
            controller::run(client.clone(), None, buckets, bucket_shutdown),
            controller::run(client, None, policies, policy_shutdown),
        );
    };
    handles.push(tokio::spawn(supervise(readiness.clone(), controllers)));

    let health_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.health_port));
    let health_config = http_server::Config::new(health_addr);
    let health_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http_server::run(health_config, Arc::new(readiness), health_rx).await {
            tracing::error!("health server error: {}", e);
        }
    }));

    tracing::info!(health_port = config.health_port, "Running: bucket + policy controllers");

    Ok(ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    })
}

/// Runs the operator until a shutdown signal is received. Use for CLI
/// binary usage.
pub async fn spawn_operator(config: &OperatorConfig) {
    let _guards = init_logging(config);
    let handle = match start_operator(config).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("error starting the operator: {}", e);
            std::process::exit(3);
        }
    };
    handle.wait().await;
}
