//! Kubernetes operator reconciling `Bucket` and `Policy` records against a
//! MinIO cluster.

pub mod config;
pub mod control;
pub mod controller;
pub mod crd;
pub mod http_server;
pub mod process;
pub mod reconcile;
pub mod store;
pub mod watch;

pub use config::OperatorConfig;
pub use process::{spawn_operator, start_operator, ShutdownHandle};
