//! Local operating system provider.
//!
//! Reports host identity: platform, hostname, outbound IP, machine id and the
//! optional `lat:lon` machine location. Identity files are read below
//! [`ProviderConfig::root_fs`] so the agent can run in a container with the
//! host tree mounted elsewhere.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::process;
use std::sync::Arc;

use tokio::net::{UdpSocket, lookup_host};
use tracing::{debug, warn};

use super::fs::FileSystem;
use super::{Operation, Provider, ProviderConfig, ProviderError};
use crate::collector::{HostInfo, WorkloadInfo};

const MACHINE_ID: &str = "/etc/machine-id";
const MACHINE_LOCATION: &str = "/etc/machine-location";
const KERNEL_HOSTNAME: &str = "/proc/sys/kernel/hostname";

pub struct SystemProvider {
    fs: Arc<dyn FileSystem>,
    config: ProviderConfig,
}

impl SystemProvider {
    /// Creates the provider after checking that the OS reports a hostname.
    pub fn new(fs: Arc<dyn FileSystem>, config: ProviderConfig) -> Result<Self, ProviderError> {
        hostname()?;
        Ok(Self { fs, config })
    }

    pub fn host_info(self: &Arc<Self>) -> Operation<Self, HostInfo> {
        Operation::new("system.host_info", self.clone(), |p, _ctx, state| {
            Box::pin(p.provide_host_info(state))
        })
    }

    pub fn workload_host_id(self: &Arc<Self>) -> Operation<Self, WorkloadInfo> {
        Operation::new("system.workload_host_id", self.clone(), |p, _ctx, state| {
            Box::pin(async move { p.provide_workload_host_id(state) })
        })
    }

    pub async fn provide_host_info(&self, state: &mut HostInfo) {
        debug!("collecting host info");

        state.os = go_os().to_string();
        state.arch = go_arch().to_string();

        match hostname() {
            Ok(name) => state.hostname = name,
            Err(e) => warn!(error = %e, "hostname lookup failed, keeping previous value"),
        }

        state.ip = match outbound_ip(&self.config.ip_hint).await {
            Ok(ip) => ip.to_string(),
            Err(e) => {
                warn!(hint = %self.config.ip_hint, error = %e, "cannot determine outbound IP");
                String::new()
            }
        };

        state.id = self.machine_id();

        if let Some((latitude, longitude)) = self.machine_location() {
            state.latitude = latitude;
            state.longitude = longitude;
        }
    }

    pub fn provide_workload_host_id(&self, state: &mut WorkloadInfo) {
        state.host_id = self.machine_id();
    }

    /// Machine id, empty when the file is missing.
    fn machine_id(&self) -> String {
        let path = self.config.host_path(MACHINE_ID);
        match self.fs.read_to_string(&path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read machine id");
                String::new()
            }
        }
    }

    /// `(latitude, longitude)`; empty when the file is missing, `None` when
    /// the content is not `lat:lon`.
    fn machine_location(&self) -> Option<(String, String)> {
        let path = self.config.host_path(MACHINE_LOCATION);
        let content = match self.fs.read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read machine location");
                return Some((String::new(), String::new()));
            }
        };

        match content.trim().split_once(':') {
            Some((lat, lon)) if !lon.contains(':') => Some((lat.to_string(), lon.to_string())),
            _ => {
                warn!(path = %path.display(), content = %content.trim(), "malformed machine location, expected lat:lon");
                None
            }
        }
    }
}

impl Provider for SystemProvider {
    fn name(&self) -> &'static str {
        "system"
    }
}

/// Hostname as reported by the kernel, falling back to `hostname(1)`.
pub fn hostname() -> Result<String, ProviderError> {
    if let Ok(name) = std::fs::read_to_string(KERNEL_HOSTNAME) {
        let name = name.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }

    let out = process::Command::new("hostname").output()?;
    let name = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if !out.status.success() || name.is_empty() {
        return Err(ProviderError::Io(io::Error::other(
            "the operating system did not report a hostname",
        )));
    }
    Ok(name)
}

/// Local address the OS would use to reach `hint`.
///
/// Connecting a UDP socket only selects a route; no packet is sent.
pub async fn outbound_ip(hint: &str) -> io::Result<IpAddr> {
    let target = lookup_host(hint)
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "ip hint did not resolve"))?;
    let bind: SocketAddr = if target.is_ipv4() {
        ([0u8; 4], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(target).await?;
    Ok(socket.local_addr()?.ip())
}

/// Operating system name in the `GOOS` vocabulary used by existing dashboards.
fn go_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// Architecture name in the `GOARCH` vocabulary.
fn go_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "loongarch64" => "loong64",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockFs;
    use std::path::PathBuf;

    fn provider(fs: MockFs) -> Arc<SystemProvider> {
        let config = ProviderConfig {
            root_fs: PathBuf::from("/host"),
            ip_hint: "127.0.0.1:9".into(),
            ..Default::default()
        };
        Arc::new(SystemProvider::new(Arc::new(fs), config).unwrap())
    }

    #[tokio::test]
    async fn test_host_info_reads_identity_files() {
        let p = provider(
            MockFs::new()
                .with_file("/host/etc/machine-id", "abc123\n")
                .with_file("/host/etc/machine-location", "45.07:7.68\n"),
        );
        let mut state = HostInfo::default();

        p.provide_host_info(&mut state).await;

        assert_eq!(state.id, "abc123");
        assert_eq!(state.latitude, "45.07");
        assert_eq!(state.longitude, "7.68");
        assert_eq!(state.ip, "127.0.0.1");
        assert_eq!(state.hostname, hostname().unwrap());
        assert_eq!(state.os, go_os());
        assert_eq!(state.arch, go_arch());
    }

    #[tokio::test]
    async fn test_missing_files_yield_empty_values() {
        let p = provider(MockFs::new());
        let mut state = HostInfo {
            latitude: "1".into(),
            longitude: "2".into(),
            id: "old".into(),
            ..Default::default()
        };

        p.provide_host_info(&mut state).await;

        assert!(state.id.is_empty());
        assert!(state.latitude.is_empty());
        assert!(state.longitude.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_location_keeps_previous() {
        let p = provider(MockFs::new().with_file("/host/etc/machine-location", "somewhere"));
        let mut state = HostInfo {
            latitude: "45.07".into(),
            longitude: "7.68".into(),
            ..Default::default()
        };

        p.provide_host_info(&mut state).await;

        assert_eq!(state.latitude, "45.07");
        assert_eq!(state.longitude, "7.68");
    }

    #[test]
    fn test_workload_host_id() {
        let p = provider(MockFs::new().with_file("/host/etc/machine-id", "abc123\n"));
        let mut state = WorkloadInfo {
            cluster_id: "swarm-1".into(),
            ..Default::default()
        };

        p.provide_workload_host_id(&mut state);

        assert_eq!(state.host_id, "abc123");
        assert_eq!(state.cluster_id, "swarm-1");
    }

    #[tokio::test]
    async fn test_outbound_ip_bad_hint() {
        assert!(outbound_ip("not an address").await.is_err());
    }

    #[test]
    fn test_go_platform_names() {
        assert!(!go_os().is_empty());
        assert_ne!(go_arch(), "x86_64");
        assert_ne!(go_arch(), "aarch64");
    }
}
