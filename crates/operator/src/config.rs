use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reconcile::Settings;

/// Secret holding `endpoint`, `user` and `password` of the MinIO cluster.
pub const DEFAULT_CONNECTION_SECRET: &str = "minio-controller-secret";
pub const DEFAULT_HEALTH_PORT: u16 = 8081;
/// Environment variable naming the namespace the operator runs in.
pub const NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const SERVICE_ACCOUNT_NAMESPACE: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorConfig {
    /// Name of the connection secret, looked up in `namespace`
    #[serde(default = "default_connection_secret")]
    pub connection_secret: String,
    /// Namespace the operator runs in. Resolved from `POD_NAMESPACE` or the
    /// service account when unset.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Port of the `/_status` health server
    #[serde(default = "default_health_port")]
    pub health_port: u16,
    #[serde(default = "default_bucket_requeue_secs")]
    pub bucket_requeue_secs: u64,
    #[serde(default = "default_secret_requeue_secs")]
    pub secret_requeue_secs: u64,
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
    #[serde(default = "default_log_level", with = "level")]
    pub log_level: tracing::Level,
    /// Daily rolling log files are written here when set
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_connection_secret() -> String {
    DEFAULT_CONNECTION_SECRET.to_string()
}

fn default_health_port() -> u16 {
    DEFAULT_HEALTH_PORT
}

fn default_bucket_requeue_secs() -> u64 {
    5
}

fn default_secret_requeue_secs() -> u64 {
    5
}

fn default_retry_secs() -> u64 {
    30
}

fn default_log_level() -> tracing::Level {
    tracing::Level::INFO
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            connection_secret: default_connection_secret(),
            namespace: None,
            health_port: default_health_port(),
            bucket_requeue_secs: default_bucket_requeue_secs(),
            secret_requeue_secs: default_secret_requeue_secs(),
            retry_secs: default_retry_secs(),
            log_level: default_log_level(),
            log_dir: None,
        }
    }
}

/// Values given on the command line; they win over the file and the
/// environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub connection_secret: Option<String>,
    pub namespace: Option<String>,
    pub health_port: Option<u16>,
    pub log_level: Option<tracing::Level>,
    pub log_dir: Option<PathBuf>,
}

impl OperatorConfig {
    /// Read a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }

    /// File (or defaults), then `POD_NAMESPACE`, then `overrides`.
    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_namespace_env(std::env::var(NAMESPACE_ENV).ok());
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn apply_namespace_env(&mut self, value: Option<String>) {
        if let Some(namespace) = value.filter(|value| !value.trim().is_empty()) {
            self.namespace = Some(namespace.trim().to_string());
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(secret) = overrides.connection_secret {
            self.connection_secret = secret;
        }
        if let Some(namespace) = overrides.namespace {
            self.namespace = Some(namespace);
        }
        if let Some(port) = overrides.health_port {
            self.health_port = port;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        if let Some(log_dir) = overrides.log_dir {
            self.log_dir = Some(log_dir);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "connection_secret must not be empty".into(),
            ));
        }
        for (field, value) in [
            ("bucket_requeue_secs", self.bucket_requeue_secs),
            ("secret_requeue_secs", self.secret_requeue_secs),
            ("retry_secs", self.retry_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be positive")));
            }
        }
        Ok(())
    }

    /// The configured namespace, falling back to the service account's.
    pub fn resolve_namespace(&self) -> Result<String, ConfigError> {
        self.resolve_namespace_from(Path::new(SERVICE_ACCOUNT_NAMESPACE))
    }

    pub fn resolve_namespace_from(&self, service_account: &Path) -> Result<String, ConfigError> {
        if let Some(namespace) = &self.namespace {
            return Ok(namespace.clone());
        }
        match fs::read_to_string(service_account) {
            Ok(namespace) if !namespace.trim().is_empty() => Ok(namespace.trim().to_string()),
            Ok(_) => Err(ConfigError::NoNamespace),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NoNamespace),
            Err(source) => Err(ConfigError::Io {
                path: service_account.to_path_buf(),
                source,
            }),
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            bucket_requeue: Duration::from_secs(self.bucket_requeue_secs),
            secret_requeue: Duration::from_secs(self.secret_requeue_secs),
            retry: Duration::from_secs(self.retry_secs),
            ..Settings::default()
        }
    }
}

mod level {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(level: &tracing::Level, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&level.to_string().to_lowercase())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<tracing::Level, D::Error> {
        let value = String::deserialize(deserializer)?;
        tracing::Level::from_str(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("no namespace configured: set {NAMESPACE_ENV} or run inside a pod")]
    NoNamespace,
}
