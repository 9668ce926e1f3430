//! Command line configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use telemetruum_core::provider::ProviderConfig;

/// Telemetry agent exposing host, orchestrator, workload and peripheral facts.
#[derive(Parser, Debug)]
#[command(name = "telemetruum-agent", about = "Telemetry agent for edge nodes", version = telemetruum_core::VERSION)]
pub struct Args {
    /// Address of the metrics endpoint (`:2545` binds all interfaces).
    #[arg(long, default_value = ":2545", value_parser = parse_bind)]
    pub bind: SocketAddr,

    /// Enable the Docker provider. Disable with --docker=false.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub docker: bool,

    /// Enable the Kubernetes provider. Disable with --kubernetes=false.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub kubernetes: bool,

    /// Enable the system provider. Disable with --system=false.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub system: bool,

    /// Interval for host info metrics (e.g. "5m", "90s", "1m30s").
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub host_info_interval: Duration,

    /// Interval for orchestrator info metrics.
    #[arg(long, default_value = "2m", value_parser = parse_duration)]
    pub orch_info_interval: Duration,

    /// Interval for workload info metrics.
    #[arg(long, default_value = "1m", value_parser = parse_duration)]
    pub workload_info_interval: Duration,

    /// Interval for node mounted peripheral metrics.
    #[arg(long, default_value = "1m", value_parser = parse_duration)]
    pub node_mount_interval: Duration,

    /// Root of the host filesystem (when running in a container with the
    /// host mounted elsewhere).
    #[arg(long, default_value = "/")]
    pub path_rootfs: PathBuf,

    /// An ip:port used to identify the device's IP. The endpoint is never called.
    #[arg(long, default_value = "8.8.8.8:80")]
    pub ip_hint: String,

    /// Kubernetes configuration file. In-cluster configuration when unset.
    #[arg(long)]
    pub kube_config: Option<PathBuf>,

    /// Kubernetes node this agent runs on.
    #[arg(long, env = "NODE_NAME", default_value = "")]
    pub node_name: String,

    /// Namespace of the leader election lease. Defaults to the service
    /// account or kubeconfig context namespace.
    #[arg(long, env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Identity of this replica in leader election. Defaults to the hostname.
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Provider settings. `hostname` backs the election identity when no pod
    /// name is configured.
    pub fn provider_config(&self, hostname: &str) -> ProviderConfig {
        ProviderConfig {
            root_fs: self.path_rootfs.clone(),
            ip_hint: self.ip_hint.clone(),
            node_name: self.node_name.clone(),
            namespace: self.namespace.clone().unwrap_or_default(),
            pod_name: self
                .pod_name
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| hostname.to_string()),
            kube_config: self.kube_config.clone(),
        }
    }
}

/// Parses `host:port`; a bare `:port` binds all IPv4 interfaces.
pub fn parse_bind(s: &str) -> Result<SocketAddr, String> {
    let s = s.trim();
    let addr = match s.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => s.to_string(),
    };
    addr.parse().map_err(|e| format!("invalid bind address '{s}': {e}"))
}

/// Parses a duration such as `"300ms"`, `"90s"`, `"1m30s"`, `"1.5h"` or `"0"`.
///
/// Units: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`. Values must fit in
/// `u64` nanoseconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    let invalid = || format!("invalid duration '{s}'");
    let overflow = || format!("duration '{s}' out of range");

    let mut nanos: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let num_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..num_len];
        rest = &rest[num_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale: u128 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            "" => return Err(format!("missing unit in duration '{s}'")),
            unit => return Err(format!("unknown unit '{unit}' in duration '{s}'")),
        };
        rest = &rest[unit_len..];

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if fraction.contains('.') {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| overflow())?
        };
        // digits past nanosecond precision of the largest unit are dropped
        let fraction = &fraction[..fraction.len().min(18)];
        let fraction_nanos = if fraction.is_empty() {
            0
        } else {
            let digits: u128 = fraction.parse().map_err(|_| invalid())?;
            digits * scale / 10u128.pow(fraction.len() as u32)
        };

        nanos = whole
            .checked_mul(scale)
            .and_then(|n| n.checked_add(fraction_nanos))
            .and_then(|n| n.checked_add(nanos))
            .ok_or_else(overflow)?;
    }

    u64::try_from(nanos)
        .map(Duration::from_nanos)
        .map_err(|_| overflow())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert_eq!(parse_duration("300ms"), Ok(Duration::from_millis(300)));
        assert_eq!(parse_duration("90s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5h"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse_duration("250us"), Ok(Duration::from_micros(250)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m5").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(parse_duration(".m").is_err());
        assert!(parse_duration("1.2.3s").is_err());
    }

    #[test]
    fn test_parse_duration_exact_fractions() {
        assert_eq!(parse_duration("0.1s"), Ok(Duration::from_millis(100)));
        assert_eq!(parse_duration(".5m"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1.000000001s"), Ok(Duration::new(1, 1)));
        assert_eq!(parse_duration("2h45m0.5s"), Ok(Duration::new(9900, 500_000_000)));
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        // u64::MAX nanoseconds is about 5124095h
        assert!(parse_duration("5124095h").is_ok());
        assert!(parse_duration("5124096h").is_err());
        assert!(parse_duration("99999999999999999999999999999999999999999h").is_err());
        assert!(parse_duration("3000000h3000000h").is_err());
    }

    #[test]
    fn test_parse_bind() {
        assert_eq!(parse_bind(":2545"), Ok("0.0.0.0:2545".parse::<SocketAddr>().unwrap()));
        assert_eq!(parse_bind("127.0.0.1:9000"), Ok("127.0.0.1:9000".parse::<SocketAddr>().unwrap()));
        assert!(parse_bind("localhost").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["telemetruum-agent"]).unwrap();
        assert_eq!(args.bind, "0.0.0.0:2545".parse::<SocketAddr>().unwrap());
        assert!(args.docker && args.kubernetes && args.system);
        assert_eq!(args.host_info_interval, Duration::from_secs(300));
        assert_eq!(args.orch_info_interval, Duration::from_secs(120));
        assert_eq!(args.workload_info_interval, Duration::from_secs(60));
        assert_eq!(args.node_mount_interval, Duration::from_secs(60));
        assert_eq!(args.path_rootfs, PathBuf::from("/"));
        assert_eq!(args.ip_hint, "8.8.8.8:80");
    }

    #[test]
    fn test_provider_toggles_and_overrides() {
        let args = Args::try_parse_from([
            "telemetruum-agent",
            "--docker=false",
            "--kubernetes",
            "false",
            "--host-info-interval",
            "1m30s",
            "--path-rootfs",
            "/host",
            "--pod-name",
            "agent-7",
            "--namespace",
            "telemetruum",
        ])
        .unwrap();
        assert!(!args.docker);
        assert!(!args.kubernetes);
        assert!(args.system);
        assert_eq!(args.host_info_interval, Duration::from_secs(90));

        let config = args.provider_config("node-host");
        assert_eq!(config.root_fs, PathBuf::from("/host"));
        assert_eq!(config.pod_name, "agent-7");
        assert_eq!(config.namespace, "telemetruum");
    }

    #[test]
    fn test_pod_name_falls_back_to_hostname() {
        let args = Args::try_parse_from(["telemetruum-agent", "--pod-name", ""]).unwrap();
        assert_eq!(args.provider_config("node-host").pod_name, "node-host");
    }

    #[test]
    fn test_invalid_interval_rejected() {
        assert!(Args::try_parse_from(["telemetruum-agent", "--orch-info-interval", "soon"]).is_err());
    }
}
