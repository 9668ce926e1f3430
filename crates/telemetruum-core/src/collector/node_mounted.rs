use super::{CollectorState, attributes};
use crate::metrics::{MetricHandle, Observer};

pub const NODE_MOUNTED: MetricHandle =
    MetricHandle::new("node_mounted", "info about the attached peripherals");

/// A peripheral attached to the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peripheral {
    pub device: String,
    pub resource_path: String,
    pub available: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMounted {
    pub peripherals: Vec<Peripheral>,
}

impl CollectorState for NodeMounted {
    fn metrics() -> Vec<MetricHandle> {
        vec![NODE_MOUNTED]
    }

    fn observe(&self, observer: &mut dyn Observer) {
        for p in &self.peripherals {
            observer.observe(
                &NODE_MOUNTED,
                i64::from(p.available),
                attributes([("device", &p.device), ("resource_path", &p.resource_path)]),
            );
        }
    }
}
