use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CameraError;
use crate::transport::{DeviceDescriptor, Transport};

/// How to pick one device out of an enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSelector {
    Index(usize),
    /// Matches the serial number, the network address or the transport id
    Serial(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Index(0)
    }
}

/// Pick a device from an enumeration result
pub fn select_device<'a>(
    devices: &'a [DeviceDescriptor],
    selector: &DeviceSelector,
) -> Result<&'a DeviceDescriptor, CameraError> {
    if devices.is_empty() {
        return Err(CameraError::Connection("no cameras found".into()));
    }

    match selector {
        DeviceSelector::Index(index) => devices.get(*index).ok_or_else(|| {
            CameraError::Connection(format!(
                "camera index {} out of range, {} camera(s) found",
                index,
                devices.len()
            ))
        }),
        DeviceSelector::Serial(wanted) => devices
            .iter()
            .find(|d| {
                d.serial == *wanted
                    || d.transport_id == *wanted
                    || d.address.as_deref() == Some(wanted.as_str())
            })
            .ok_or_else(|| CameraError::Connection(format!("no camera matches `{}`", wanted))),
    }
}

/// Enumerate and log every reachable camera
pub fn list_devices(transport: &mut dyn Transport) -> Result<Vec<DeviceDescriptor>, CameraError> {
    info!("Searching for cameras on the {} transport...", transport.name());
    let devices = transport.enumerate()?;

    if devices.is_empty() {
        warn!("No cameras found");
    }
    for (i, device) in devices.iter().enumerate() {
        info!("[{}] {} ({})", i, device, device.transport_id);
    }
    Ok(devices)
}
