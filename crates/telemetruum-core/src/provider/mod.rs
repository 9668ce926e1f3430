//! Data providers.
//!
//! A provider wraps one external system (local OS, container runtime,
//! orchestration cluster), establishes its identity once at initialization and
//! exposes named operations that populate collector states. Composition
//! happens in the caller: each operation is attached to the runner of the
//! state it writes, and providers never reference each other.
//!
//! ```text
//! ┌─────────────────┐  host_info ─────────────► CollectorRunner<HostInfo>
//! │ SystemProvider  │  workload_host_id ──┐
//! └─────────────────┘                     ├───► CollectorRunner<WorkloadInfo>
//! ┌─────────────────┐  workload_info ─────┤
//! │ DockerProvider  │  nuvla_orch_info ───┼───► CollectorRunner<OrchInfo>
//! │                 │  nuvla_peripherals ─┼───► CollectorRunner<NodeMounted>
//! └─────────────────┘                     │
//! ┌─────────────────┐  workload_info ─────┘
//! │ Kubernetes-     │  ocm_orch_info (leader only) ─► CollectorRunner<OrchInfo>
//! │ Provider        │  nuvla_orch_info ─────────────► CollectorRunner<OrchInfo>
//! └─────────────────┘
//! ```

mod annotations;
pub mod docker;
pub mod fs;
mod kube_client;
pub mod kubernetes;
pub mod mock;
mod nuvla;
pub mod system;

pub use docker::{ContainerRuntime, DockerClient, DockerEndpoint, DockerProvider};
pub use fs::{FileSystem, RealFs};
pub use kube_client::{ClusterSettings, KubeClient, KubeLease};
pub use kubernetes::{ClusterApi, KubernetesProvider, PodSelector};
pub use system::SystemProvider;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::runner::DataProvider;

/// Errors raised while talking to an external system.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::Api { status: 404, .. })
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::Decode(e.to_string())
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.to_string())
    }
}

/// Settings shared by the providers.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Root under which host identity and descriptor files are read.
    pub root_fs: PathBuf,
    /// `ip:port` used to select the outbound interface. Never contacted.
    pub ip_hint: String,
    /// Kubernetes node this replica runs on.
    pub node_name: String,
    /// Namespace holding the election lease. Empty until resolved against
    /// the cluster settings.
    pub namespace: String,
    /// Identity of this replica in leader election.
    pub pod_name: String,
    /// Kubeconfig file; in-cluster configuration when `None`.
    pub kube_config: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            root_fs: PathBuf::from("/"),
            ip_hint: "8.8.8.8:80".to_string(),
            node_name: String::new(),
            namespace: String::new(),
            pod_name: String::new(),
            kube_config: None,
        }
    }
}

impl ProviderConfig {
    /// Resolves an absolute host path (e.g. `/etc/machine-id`) under `root_fs`.
    pub fn host_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root_fs.join(path.strip_prefix("/").unwrap_or(path))
    }
}

/// Lifecycle shared by all providers.
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Launches the provider's background activity, if any.
    ///
    /// Handles are pushed onto `tasks` so the caller can await them on
    /// shutdown; every task stops once `token` is cancelled.
    fn start(&self, _token: &CancellationToken, _tasks: &mut Vec<JoinHandle<()>>) {}
}

/// Future returned by a bound provider method.
pub type OperationFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

type OperationFn<P, T> = for<'a> fn(&'a P, &'a CancellationToken, &'a mut T) -> OperationFuture<'a>;

/// A provider method bound to its provider, ready to attach to a runner.
pub struct Operation<P, T> {
    name: &'static str,
    provider: Arc<P>,
    call: OperationFn<P, T>,
}

impl<P, T> Operation<P, T> {
    pub fn new(name: &'static str, provider: Arc<P>, call: OperationFn<P, T>) -> Self {
        Self {
            name,
            provider,
            call,
        }
    }
}

#[async_trait]
impl<P, T> DataProvider<T> for Operation<P, T>
where
    P: Send + Sync + 'static,
    T: Send + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn provide(&self, ctx: &CancellationToken, state: &mut T) {
        (self.call)(&*self.provider, ctx, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_path_under_root() {
        let config = ProviderConfig {
            root_fs: PathBuf::from("/rootfs"),
            ..Default::default()
        };
        assert_eq!(
            config.host_path("/etc/machine-id"),
            PathBuf::from("/rootfs/etc/machine-id")
        );
        assert_eq!(
            config.host_path("etc/machine-location"),
            PathBuf::from("/rootfs/etc/machine-location")
        );
    }

    #[test]
    fn test_host_path_default_root() {
        let config = ProviderConfig::default();
        assert_eq!(
            config.host_path("/etc/machine-id"),
            PathBuf::from("/etc/machine-id")
        );
    }

    #[test]
    fn test_not_found_detection() {
        let err = ProviderError::Api {
            status: 404,
            message: "leases not found".into(),
        };
        assert!(err.is_not_found());
        assert!(!ProviderError::Decode("x".into()).is_not_found());
    }
}
