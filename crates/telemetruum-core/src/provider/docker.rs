//! Docker container runtime provider.
//!
//! Workloads are the running containers of the local engine. On NuvlaEdge
//! devices the engine host also carries the NuvlaEdge context and the
//! peripherals descriptor, read from `<root>/nuvla_peripherals/`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::annotations::icos_annotations;
use super::fs::FileSystem;
use super::{Operation, Provider, ProviderConfig, ProviderError, nuvla};
use crate::collector::{NodeMounted, OrchInfo, Workload, WorkloadInfo};

const NUVLA_CONTEXT: &str = "/nuvla_peripherals/.context";
const NUVLA_PERIPHERALS: &str = "/nuvla_peripherals/.peripherals/local_peripherals.json";

const WORKLOAD_KIND: &str = "container";

pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// Subset of `GET /info`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub server_version: String,
    #[serde(default)]
    pub swarm: SwarmInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwarmInfo {
    #[serde(rename = "NodeID", default)]
    pub node_id: String,
}

/// Subset of one `GET /containers/json` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Container runtime queries used by [`DockerProvider`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn info(&self) -> Result<RuntimeInfo, ProviderError>;

    /// Running containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ProviderError>;
}

pub struct DockerProvider {
    runtime: Arc<dyn ContainerRuntime>,
    fs: Arc<dyn FileSystem>,
    config: ProviderConfig,
    node_id: String,
}

impl DockerProvider {
    /// Connects to the runtime and caches its swarm node id.
    pub async fn initialize(
        runtime: Arc<dyn ContainerRuntime>,
        fs: Arc<dyn FileSystem>,
        config: ProviderConfig,
    ) -> Result<Self, ProviderError> {
        let info = runtime.info().await?;
        info!(
            engine = %info.name,
            version = %info.server_version,
            node_id = %info.swarm.node_id,
            "docker runtime detected"
        );
        Ok(Self {
            runtime,
            fs,
            config,
            node_id: info.swarm.node_id,
        })
    }

    pub fn workload_info(self: &Arc<Self>) -> Operation<Self, WorkloadInfo> {
        Operation::new("docker.workload_info", self.clone(), |p, _ctx, state| {
            Box::pin(p.provide_workload_info(state))
        })
    }

    pub fn nuvla_orch_info(self: &Arc<Self>) -> Operation<Self, OrchInfo> {
        Operation::new("docker.nuvla_orch_info", self.clone(), |p, _ctx, state| {
            Box::pin(async move { p.provide_nuvla_orch_info(state) })
        })
    }

    pub fn nuvla_peripherals(self: &Arc<Self>) -> Operation<Self, NodeMounted> {
        Operation::new("docker.nuvla_peripherals", self.clone(), |p, _ctx, state| {
            Box::pin(async move { p.provide_nuvla_peripherals(state) })
        })
    }

    pub async fn provide_workload_info(&self, state: &mut WorkloadInfo) {
        let containers = match self.runtime.list_containers().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "cannot list containers, keeping previous workloads");
                return;
            }
        };

        state.workloads = containers
            .into_iter()
            .map(|c| {
                let name = c.names.into_iter().next().unwrap_or(c.id);
                let annotations = c
                    .labels
                    .as_ref()
                    .map(|labels| icos_annotations(labels))
                    .unwrap_or_default();
                Workload {
                    name,
                    kind: WORKLOAD_KIND.to_string(),
                    annotations,
                }
            })
            .collect();
        state.cluster_id = self.node_id.clone();
        debug!(count = state.workloads.len(), "containers collected");
    }

    pub fn provide_nuvla_orch_info(&self, state: &mut OrchInfo) {
        let path = self.config.host_path(NUVLA_CONTEXT);
        nuvla::provide_orch_info(self.fs.as_ref(), &path, state);
    }

    pub fn provide_nuvla_peripherals(&self, state: &mut NodeMounted) {
        let path = self.config.host_path(NUVLA_PERIPHERALS);
        match nuvla::read_peripherals(self.fs.as_ref(), &path) {
            Ok(peripherals) => state.peripherals = peripherals,
            Err(e) => warn!(path = %path.display(), error = %e, "cannot read Nuvla peripherals"),
        }
    }
}

impl Provider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }
}

/// Where the Docker Engine API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerEndpoint {
    Unix(PathBuf),
    Tcp(String),
}

impl DockerEndpoint {
    /// Parses a `DOCKER_HOST` value (`unix:///path` or `tcp://host:port`).
    pub fn parse(host: &str) -> Result<Self, ProviderError> {
        if let Some(path) = host.strip_prefix("unix://") {
            return Ok(DockerEndpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = host.strip_prefix("tcp://") {
            return Ok(DockerEndpoint::Tcp(addr.trim_end_matches('/').to_string()));
        }
        Err(ProviderError::Config(format!(
            "unsupported docker host '{host}', expected unix:// or tcp://"
        )))
    }

    /// `DOCKER_HOST` when set, the default socket otherwise.
    pub fn from_env() -> Result<Self, ProviderError> {
        match std::env::var("DOCKER_HOST") {
            Ok(host) if !host.is_empty() => Self::parse(&host),
            _ => Ok(DockerEndpoint::Unix(PathBuf::from(DEFAULT_DOCKER_SOCKET))),
        }
    }
}

/// Minimal Docker Engine API client.
///
/// Requests are HTTP/1.0 so the engine closes the connection after the
/// response and the body can be read to EOF without chunked decoding.
#[derive(Debug, Clone)]
pub struct DockerClient {
    endpoint: DockerEndpoint,
}

impl DockerClient {
    pub fn new(endpoint: DockerEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self::new(DockerEndpoint::from_env()?))
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        let request = format!(
            "GET {path} HTTP/1.0\r\nHost: docker\r\nAccept: application/json\r\nConnection: close\r\n\r\n"
        );
        let raw = match &self.endpoint {
            #[cfg(unix)]
            DockerEndpoint::Unix(socket) => {
                let mut stream = tokio::net::UnixStream::connect(socket).await?;
                exchange(&mut stream, &request).await?
            }
            #[cfg(not(unix))]
            DockerEndpoint::Unix(_) => {
                return Err(ProviderError::Config(
                    "unix sockets are not supported on this platform".into(),
                ));
            }
            DockerEndpoint::Tcp(addr) => {
                let mut stream = TcpStream::connect(addr).await?;
                exchange(&mut stream, &request).await?
            }
        };
        parse_response(&raw)
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn info(&self) -> Result<RuntimeInfo, ProviderError> {
        let body = self.get("/info").await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, ProviderError> {
        let body = self.get("/containers/json").await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn exchange<S>(stream: &mut S, request: &str) -> std::io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Splits a raw HTTP response, returning the body of a 2xx response.
fn parse_response(raw: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ProviderError::Transport("truncated HTTP response".into()))?;
    let head = String::from_utf8_lossy(&raw[..split]);
    let body = raw[split + 4..].to_vec();

    let status = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| ProviderError::Transport(format!("malformed status line in '{head}'")))?;

    if !(200..300).contains(&status) {
        return Err(ProviderError::Api {
            status,
            message: String::from_utf8_lossy(&body).trim().to_string(),
        });
    }
    Ok(body)
}
