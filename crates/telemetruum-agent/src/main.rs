//! telemetruum-agent - telemetry agent for edge nodes.
//!
//! Polls the local system, the container runtime and the orchestration
//! cluster, and exposes what it finds as Prometheus info gauges.

mod config;
mod server;

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use telemetruum_core::collector::{HostInfo, NodeMounted, OrchInfo, WorkloadInfo};
use telemetruum_core::leader::{LEASE_NAME, LeaseLock};
use telemetruum_core::metrics::PrometheusBackend;
use telemetruum_core::provider::system::hostname;
use telemetruum_core::provider::{
    DockerClient, DockerProvider, FileSystem, KubeClient, KubeLease, KubernetesProvider, Provider,
    ProviderConfig, ProviderError, RealFs, SystemProvider,
};
use telemetruum_core::CollectorRunner;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Args;

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for krate in ["telemetruum_agent", "telemetruum_core"] {
        if let Ok(directive) = format!("{krate}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(async_main(args)) {
        error!("agent stopped: {e:#}");
        process::exit(1);
    }
}

/// The four collector runners, one per state kind.
struct Runners {
    hosts: CollectorRunner<HostInfo>,
    orchestrators: CollectorRunner<OrchInfo>,
    workloads: CollectorRunner<WorkloadInfo>,
    peripherals: CollectorRunner<NodeMounted>,
}

impl Runners {
    fn new(args: &Args) -> Self {
        Self {
            hosts: CollectorRunner::new("host_info", args.host_info_interval),
            orchestrators: CollectorRunner::new("orch_info", args.orch_info_interval),
            workloads: CollectorRunner::new("workload_info", args.workload_info_interval),
            peripherals: CollectorRunner::new("node_mounted", args.node_mount_interval),
        }
    }

    fn initialize(&mut self, backend: &PrometheusBackend) -> anyhow::Result<()> {
        self.hosts
            .initialize(backend)
            .context("registering host info metrics")?;
        self.orchestrators
            .initialize(backend)
            .context("registering orchestrator metrics")?;
        self.workloads
            .initialize(backend)
            .context("registering workload metrics")?;
        self.peripherals
            .initialize(backend)
            .context("registering peripheral metrics")?;
        Ok(())
    }

    fn start(self, token: &CancellationToken, tasks: &mut Vec<JoinHandle<()>>) {
        tasks.push(self.hosts.start(token.clone()));
        tasks.push(self.orchestrators.start(token.clone()));
        tasks.push(self.workloads.start(token.clone()));
        tasks.push(self.peripherals.start(token.clone()));
    }
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    info!(version = telemetruum_core::VERSION, "telemetruum-agent starting");

    let host = hostname().unwrap_or_default();
    let config = args.provider_config(&host);
    info!(
        bind = %args.bind,
        rootfs = %config.root_fs.display(),
        node = %config.node_name,
        docker = args.docker,
        kubernetes = args.kubernetes,
        system = args.system,
        "configuration loaded"
    );

    let fs: Arc<dyn FileSystem> = Arc::new(RealFs::new());
    let backend = Arc::new(PrometheusBackend::new());
    let token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut runners = Runners::new(&args);

    if args.kubernetes {
        match kubernetes_provider(fs.clone(), config.clone()).await {
            Ok(kubernetes) => {
                let kubernetes = Arc::new(kubernetes);
                start_provider(kubernetes.as_ref(), &token, &mut tasks);
                runners.orchestrators.attach(kubernetes.ocm_orch_info());
                runners.workloads.attach(kubernetes.workload_info());
                runners.orchestrators.attach(kubernetes.nuvla_orch_info());
            }
            Err(e) => warn!(error = %e, "kubernetes provider disabled"),
        }
    }

    if args.system {
        let system = SystemProvider::new(fs.clone(), config.clone())
            .context("initializing system provider")?;
        let system = Arc::new(system);
        start_provider(system.as_ref(), &token, &mut tasks);
        runners.hosts.attach(system.host_info());
        runners.workloads.attach(system.workload_host_id());
    }

    if args.docker {
        match docker_provider(fs.clone(), config.clone()).await {
            Ok(docker) => {
                let docker = Arc::new(docker);
                start_provider(docker.as_ref(), &token, &mut tasks);
                runners.workloads.attach(docker.workload_info());
                runners.orchestrators.attach(docker.nuvla_orch_info());
                runners.peripherals.attach(docker.nuvla_peripherals());
            }
            Err(e) => warn!(error = %e, "docker provider disabled"),
        }
    }

    runners.initialize(&backend)?;
    runners.start(&token, &mut tasks);

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(addr = %args.bind, "serving metrics on /metrics");
    let server = tokio::spawn(server::serve(listener, backend, token.clone()));

    shutdown_signal().await;
    info!("received shutdown signal");
    token.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "background task failed");
        }
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "metrics server failed"),
        Err(e) => error!(error = %e, "metrics server task failed"),
    }

    info!("telemetruum-agent stopped");
    Ok(())
}

fn start_provider(provider: &dyn Provider, token: &CancellationToken, tasks: &mut Vec<JoinHandle<()>>) {
    info!(provider = provider.name(), "provider enabled");
    provider.start(token, tasks);
}

async fn kubernetes_provider(
    fs: Arc<dyn FileSystem>,
    config: ProviderConfig,
) -> Result<KubernetesProvider, ProviderError> {
    let client = KubeClient::from_config(&config)?;
    let config = ProviderConfig {
        namespace: client.resolve_namespace(&config.namespace),
        ..config
    };
    let lease = KubeLease::new(client.clone(), config.namespace.clone(), LEASE_NAME);
    info!(lease = %lease.describe(), "kubernetes leader election configured");
    KubernetesProvider::initialize(Arc::new(client), Arc::new(lease), fs, config).await
}

async fn docker_provider(
    fs: Arc<dyn FileSystem>,
    config: ProviderConfig,
) -> Result<DockerProvider, ProviderError> {
    let client = DockerClient::from_env()?;
    DockerProvider::initialize(Arc::new(client), fs, config).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
