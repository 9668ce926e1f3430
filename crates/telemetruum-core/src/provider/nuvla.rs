//! NuvlaEdge descriptor files shared by the Docker and Kubernetes providers.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use super::ProviderError;
use super::fs::FileSystem;
use crate::collector::{OrchInfo, Peripheral};

pub const ORCHESTRATOR: &str = "nuvla";

/// Only peripherals on this interface are reported.
const USB_INTERFACE: &str = "USB";

#[derive(Debug, Deserialize)]
struct NuvlaContext {
    #[serde(default)]
    id: String,
    #[allow(dead_code)]
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct PeripheralDescriptor {
    #[serde(default)]
    identifier: String,
    #[serde(default)]
    available: bool,
    #[serde(default)]
    interface: String,
    #[serde(rename = "device-path", default)]
    device_path: String,
    #[serde(default)]
    name: String,
}

/// Fills `state` from a NuvlaEdge `.context` file.
///
/// A missing file leaves `state` untouched. A file that exists but does not
/// decode still marks the orchestrator as `nuvla`, without identifiers.
pub fn provide_orch_info(fs: &dyn FileSystem, path: &Path, state: &mut OrchInfo) {
    let content = match fs.read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read Nuvla context file");
            return;
        }
    };

    state.kind = ORCHESTRATOR.to_string();

    let context: NuvlaContext = match serde_json::from_str(&content) {
        Ok(context) => context,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "malformed Nuvla context file");
            return;
        }
    };

    state.agent_id = context.id.clone();
    state.agent_name = context.id.clone();
    state.cluster_id = context.id;
}

/// Reads the local peripherals descriptor, keeping USB devices only.
///
/// The result is sorted by device name.
pub fn read_peripherals(fs: &dyn FileSystem, path: &Path) -> Result<Vec<Peripheral>, ProviderError> {
    let content = fs.read_to_string(path)?;
    let descriptors: HashMap<String, PeripheralDescriptor> = serde_json::from_str(&content)?;

    let mut peripherals: Vec<Peripheral> = descriptors
        .into_values()
        .filter(|d| d.interface == USB_INTERFACE)
        .map(|d| Peripheral {
            device: device_name(&d.name, &d.identifier),
            resource_path: d.device_path,
            available: d.available,
        })
        .collect();
    peripherals.sort_by(|a, b| a.device.cmp(&b.device));
    Ok(peripherals)
}

/// `"Logitech Webcam"`, `"046d:0825"` → `"logitech-webcam_046d_0825"`.
pub fn device_name(name: &str, identifier: &str) -> String {
    format!(
        "{}_{}",
        name.replace(' ', "-").to_lowercase(),
        identifier.replace(':', "_").to_lowercase()
    )
}
