//! Kubernetes orchestration cluster provider.
//!
//! The cluster is identified by the UID of the `kube-system` namespace. Per-node
//! facts (pods scheduled here, the local NuvlaEdge agent) are reported by every
//! replica; cluster-wide facts (the OCM klusterlet identity) only by the replica
//! holding the election lease.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::annotations::icos_annotations;
use super::fs::FileSystem;
use super::{Operation, Provider, ProviderConfig, ProviderError, nuvla};
use crate::collector::{OrchInfo, Workload, WorkloadInfo};
use crate::leader::{ElectionConfig, LeaderGate, LeaseElector, LeaseLock, LeadershipTracker};

const CLUSTER_ID_NAMESPACE: &str = "kube-system";
const OCM_WORK_AGENT_PREFIX: &str = "klusterlet-work-agent";
const OCM_CLUSTER_NAME_ARG: &str = "--spoke-cluster-name=";
const OCM_AGENT_ID_ARG: &str = "--agent-id=";
const NUVLAEDGE_AGENT_SELECTOR: &str = "app.kubernetes.io/name=nuvlaedge,component=agent";
const WORKLOAD_KIND: &str = "pod";

pub const OCM_ORCHESTRATOR: &str = "ocm";

/// Object metadata common to all resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Pod {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Container {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Field and label selectors of a cluster-wide pod listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodSelector {
    pub field: Option<String>,
    pub label: Option<String>,
}

impl PodSelector {
    /// Every pod in every namespace.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn on_node(node_name: &str) -> Self {
        Self {
            field: Some(format!("spec.nodeName={node_name}")),
            label: None,
        }
    }

    pub fn labeled(selector: &str) -> Self {
        Self {
            field: None,
            label: Some(selector.to_string()),
        }
    }
}

/// Cluster queries used by [`KubernetesProvider`].
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn namespace_uid(&self, name: &str) -> Result<String, ProviderError>;

    async fn list_pods(&self, selector: &PodSelector) -> Result<Vec<Pod>, ProviderError>;
}

pub struct KubernetesProvider {
    api: Arc<dyn ClusterApi>,
    lease: Arc<dyn LeaseLock>,
    fs: Arc<dyn FileSystem>,
    config: ProviderConfig,
    election: ElectionConfig,
    cluster_id: String,
    tracker: Arc<LeadershipTracker>,
    gate: LeaderGate,
}

impl KubernetesProvider {
    /// Resolves the cluster id. The election starts with [`Provider::start`].
    pub async fn initialize(
        api: Arc<dyn ClusterApi>,
        lease: Arc<dyn LeaseLock>,
        fs: Arc<dyn FileSystem>,
        config: ProviderConfig,
    ) -> Result<Self, ProviderError> {
        if config.pod_name.is_empty() {
            return Err(ProviderError::Config(
                "pod name is required as leader election identity".into(),
            ));
        }

        let cluster_id = api.namespace_uid(CLUSTER_ID_NAMESPACE).await.map_err(|e| {
            ProviderError::Config(format!(
                "cannot read cluster id from the {CLUSTER_ID_NAMESPACE} namespace: {e}"
            ))
        })?;
        info!(cluster_id = %cluster_id, node = %config.node_name, "kubernetes cluster detected");

        let tracker = Arc::new(LeadershipTracker::new(config.pod_name.clone()));
        let gate = tracker.gate();
        Ok(Self {
            api,
            lease,
            fs,
            config,
            election: ElectionConfig::default(),
            cluster_id,
            tracker,
            gate,
        })
    }

    pub fn workload_info(self: &Arc<Self>) -> Operation<Self, WorkloadInfo> {
        Operation::new("kubernetes.workload_info", self.clone(), |p, _ctx, state| {
            Box::pin(p.provide_workload_info(state))
        })
    }

    pub fn ocm_orch_info(self: &Arc<Self>) -> Operation<Self, OrchInfo> {
        Operation::new("kubernetes.ocm_orch_info", self.clone(), |p, _ctx, state| {
            Box::pin(p.provide_ocm_orch_info(state))
        })
    }

    pub fn nuvla_orch_info(self: &Arc<Self>) -> Operation<Self, OrchInfo> {
        Operation::new("kubernetes.nuvla_orch_info", self.clone(), |p, _ctx, state| {
            Box::pin(p.provide_nuvla_orch_info(state))
        })
    }

    pub async fn provide_workload_info(&self, state: &mut WorkloadInfo) {
        debug!(node = %self.config.node_name, "listing pods on node");
        let pods = match self.api.list_pods(&PodSelector::on_node(&self.config.node_name)).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "cannot list pods, keeping previous workloads");
                return;
            }
        };

        state.workloads = pods
            .into_iter()
            .map(|pod| Workload {
                annotations: icos_annotations(&pod.metadata.annotations),
                name: pod.metadata.name,
                kind: WORKLOAD_KIND.to_string(),
            })
            .collect();
        state.cluster_id = self.cluster_id.clone();
    }

    /// OCM klusterlet identity. Only the leader reports it.
    pub async fn provide_ocm_orch_info(&self, state: &mut OrchInfo) {
        if !self.gate.is_leader() {
            debug!(leadership = ?self.gate.state(), "not the leader, skipping OCM agent info");
            return;
        }

        debug!("getting OCM agent info from klusterlet pod");
        let pods = match self.api.list_pods(&PodSelector::all()).await {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "cannot list pods for OCM agent info");
                return;
            }
        };

        for pod in pods
            .iter()
            .filter(|p| p.metadata.name.starts_with(OCM_WORK_AGENT_PREFIX))
        {
            let args = pod
                .spec
                .containers
                .first()
                .map(|c| c.args.as_slice())
                .unwrap_or_default();

            let mut agent_name = "";
            let mut agent_id = "";
            for arg in args {
                if let Some(v) = arg.strip_prefix(OCM_CLUSTER_NAME_ARG) {
                    agent_name = v;
                }
                if let Some(v) = arg.strip_prefix(OCM_AGENT_ID_ARG) {
                    agent_id = v;
                }
            }

            if agent_name.is_empty() || agent_id.is_empty() {
                warn!(pod = %pod.metadata.name, args = ?args, "cannot determine OCM agent id and name from container args");
                continue;
            }

            state.kind = OCM_ORCHESTRATOR.to_string();
            state.agent_name = agent_name.to_string();
            state.agent_id = agent_id.to_string();
            state.cluster_id = self.cluster_id.clone();
        }
    }

    /// NuvlaEdge identity, when the NuvlaEdge agent runs on this node.
    pub async fn provide_nuvla_orch_info(&self, state: &mut OrchInfo) {
        let pods = match self
            .api
            .list_pods(&PodSelector::labeled(NUVLAEDGE_AGENT_SELECTOR))
            .await
        {
            Ok(pods) => pods,
            Err(e) => {
                warn!(error = %e, "cannot list NuvlaEdge pods");
                return;
            }
        };

        let pod = match pods.as_slice() {
            [] => {
                warn!("no NuvlaEdge pod found");
                return;
            }
            [pod] => pod,
            _ => {
                warn!(count = pods.len(), "more than one NuvlaEdge agent pod found, skipping Nuvla info");
                return;
            }
        };
        debug!(pod = %pod.metadata.name, "NuvlaEdge pod found");

        if pod.spec.node_name != self.config.node_name {
            warn!(
                nuvla_node = %pod.spec.node_name,
                node = %self.config.node_name,
                "NuvlaEdge runs on a different node, not reading its context file"
            );
            return;
        }

        let path = self.config.host_path(format!(
            "/var/lib/nuvlaedge/{}/.context",
            pod.metadata.namespace
        ));
        if !self.fs.exists(&path) {
            warn!(path = %path.display(), "Nuvla context file not found");
            return;
        }
        nuvla::provide_orch_info(self.fs.as_ref(), &path, state);
    }
}

impl Provider for KubernetesProvider {
    fn name(&self) -> &'static str {
        "kubernetes"
    }

    fn start(&self, token: &CancellationToken, tasks: &mut Vec<JoinHandle<()>>) {
        let elector = LeaseElector::new(
            self.lease.clone(),
            self.config.pod_name.clone(),
            self.election.clone(),
        );
        tasks.push(tokio::spawn(elector.run(token.clone(), self.tracker.clone())));
    }
}
