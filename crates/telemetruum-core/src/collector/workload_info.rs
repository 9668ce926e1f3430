use std::collections::BTreeMap;

use super::CollectorState;
use crate::metrics::{MetricHandle, Observer};

pub const WORKLOAD_INFO: MetricHandle = MetricHandle::new(
    "tlum_workload_info",
    "info about the workloads running in the node",
);

/// A workload (pod or container) running on this node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub kind: String,
    /// Free-form annotations, each rendered as its own attribute.
    pub annotations: BTreeMap<String, String>,
}

impl Workload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Workloads running on this node together with the owning host and cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub workloads: Vec<Workload>,
    pub host_id: String,
    pub cluster_id: String,
}

impl CollectorState for WorkloadInfo {
    fn metrics() -> Vec<MetricHandle> {
        vec![WORKLOAD_INFO]
    }

    fn observe(&self, observer: &mut dyn Observer) {
        for workload in &self.workloads {
            let mut attrs: Vec<(String, String)> =
                Vec::with_capacity(3 + workload.annotations.len());
            attrs.push(("name".into(), workload.name.clone()));
            attrs.push(("cluster_id".into(), self.cluster_id.clone()));
            attrs.push(("host_id".into(), self.host_id.clone()));

            // An annotation shadows a fixed attribute of the same key.
            for (key, value) in &workload.annotations {
                match attrs.iter_mut().find(|(k, _)| k == key) {
                    Some(existing) => existing.1 = value.clone(),
                    None => attrs.push((key.clone(), value.clone())),
                }
            }

            observer.observe(&WORKLOAD_INFO, 1, attrs);
        }
    }
}
