use super::{CollectorState, attributes};
use crate::metrics::{MetricHandle, Observer};

pub const ORCH_INFO: MetricHandle =
    MetricHandle::new("tlum_orch_info", "info about the orchestrator");

/// Pre-`tlum_orch_info` schema, still read by older aggregators.
pub const OCM_AGENT_INFO: MetricHandle = MetricHandle::new(
    "tlum_ocm_agent_info",
    "info about the orchestrator. Legacy, do not use",
);

/// Orchestrator kind that is additionally reported on [`OCM_AGENT_INFO`].
pub const LEGACY_ORCHESTRATOR: &str = "ocm";

/// Identity of the orchestrator managing this node.
///
/// An empty `kind` means no orchestrator has been detected and nothing is
/// reported for this family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchInfo {
    pub kind: String,
    pub agent_id: String,
    pub agent_name: String,
    pub cluster_id: String,
}

impl CollectorState for OrchInfo {
    fn metrics() -> Vec<MetricHandle> {
        vec![ORCH_INFO, OCM_AGENT_INFO]
    }

    fn observe(&self, observer: &mut dyn Observer) {
        if self.kind.is_empty() {
            return;
        }

        observer.observe(
            &ORCH_INFO,
            1,
            attributes([
                ("type", &self.kind),
                ("agent-id", &self.agent_id),
                ("agent-name", &self.agent_name),
                ("cluster_id", &self.cluster_id),
            ]),
        );

        // TODO: drop once the aggregator stops reading tlum_ocm_agent_info
        if self.kind == LEGACY_ORCHESTRATOR {
            observer.observe(
                &OCM_AGENT_INFO,
                1,
                attributes([("id", &self.agent_id), ("name", &self.agent_name)]),
            );
        }
    }
}
