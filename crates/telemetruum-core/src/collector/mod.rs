//! Collector states: the latest known facts for each metric family.
//!
//! A collector state is a plain record that providers overwrite on every tick
//! and that renders itself into observations on every scrape. States hold no
//! history and no metric-library handles.
//!
//! | state            | metrics                                   |
//! |------------------|-------------------------------------------|
//! | [`HostInfo`]     | `tlum_host_info`                          |
//! | [`OrchInfo`]     | `tlum_orch_info`, `tlum_ocm_agent_info`   |
//! | [`WorkloadInfo`] | `tlum_workload_info`                      |
//! | [`NodeMounted`]  | `node_mounted`                            |

mod host_info;
mod node_mounted;
mod orch_info;
mod workload_info;

pub use host_info::{HOST_INFO, HostInfo};
pub use node_mounted::{NODE_MOUNTED, NodeMounted, Peripheral};
pub use orch_info::{LEGACY_ORCHESTRATOR, OCM_AGENT_INFO, ORCH_INFO, OrchInfo};
pub use workload_info::{WORKLOAD_INFO, Workload, WorkloadInfo};

use crate::metrics::{MetricHandle, Observer};

/// Capability set every collector state implements.
///
/// The runner clones the state to build the next tick's snapshot, hands it to
/// providers from a background task, and renders it from the scrape path,
/// hence the bounds.
pub trait CollectorState: Clone + Default + Send + Sync + 'static {
    /// Observable metrics this state reports on.
    fn metrics() -> Vec<MetricHandle>;

    /// Emits the observations describing the current state.
    fn observe(&self, observer: &mut dyn Observer);
}

/// Builds an attribute list from fixed keys and borrowed field values.
pub(crate) fn attributes<const N: usize>(pairs: [(&str, &String); N]) -> Vec<(String, String)> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
