//! Vendor-neutral transport contract.
//!
//! The acquisition core talks to cameras only through these three traits. A
//! backend enumerates devices ([`Transport`]), exposes a GenICam-style feature
//! map on an open device ([`Connection`]) and exchanges raw buffers on a
//! stream channel ([`StreamChannel`]). Backends are chosen once, when the
//! session is built, by [`open_transport`].

pub mod buffer;
#[cfg(feature = "gstreamer-transport")]
pub mod gst;
pub mod sim;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CameraError;
use crate::TransportConfig;

pub use buffer::{BufferId, BufferStatus, HardwareBuffer, ImageInfo};
pub use sim::{SimCameraConfig, SimTransport};

/// Well-known GenICam feature names
pub mod features {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    pub const FRAME_RATE: &str = "AcquisitionFrameRate";
    pub const FRAME_RATE_ENABLE: &str = "AcquisitionFrameRateEnable";
    pub const ACQUISITION_MODE: &str = "AcquisitionMode";
    pub const PAYLOAD_SIZE: &str = "PayloadSize";
    pub const SENSOR_WIDTH: &str = "SensorWidth";
    pub const SENSOR_HEIGHT: &str = "SensorHeight";
    pub const VENDOR_NAME: &str = "DeviceVendorName";
    pub const MODEL_NAME: &str = "DeviceModelName";
    pub const SERIAL_NUMBER: &str = "DeviceSerialNumber";

    pub const ACQUISITION_START: &str = "AcquisitionStart";
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
}

/// Snapshot of one enumerated device. Missing strings are empty, never absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub transport_id: String,
    pub address: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(
        vendor: Option<&str>,
        model: Option<&str>,
        serial: Option<&str>,
        transport_id: &str,
        address: Option<&str>,
    ) -> Self {
        Self {
            vendor: vendor.unwrap_or_default().to_string(),
            model: model.unwrap_or_default().to_string(),
            serial: serial.unwrap_or_default().to_string(),
            transport_id: transport_id.to_string(),
            address: address.filter(|a| !a.is_empty()).map(str::to_string),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vendor = if self.vendor.is_empty() { "Unknown" } else { &self.vendor };
        let model = if self.model.is_empty() { "Unknown" } else { &self.model };
        write!(f, "{} {} (Serial: {})", vendor, model, self.serial)?;
        if let Some(address) = &self.address {
            write!(f, " @ {}", address)?;
        }
        Ok(())
    }
}

/// Value of a device feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Enumeration entry, e.g. a pixel format symbol
    Enum(String),
    String(String),
}

impl FeatureValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Int(v) => Some(*v),
            FeatureValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Enum(v) | FeatureValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Int(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{}", v),
            FeatureValue::Bool(v) => write!(f, "{}", v),
            FeatureValue::Enum(v) | FeatureValue::String(v) => f.write_str(v),
        }
    }
}

/// Device discovery and connection
pub trait Transport: Send {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, CameraError>;

    /// Fails with [`CameraError::Connection`] on stale or unreachable devices
    fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Connection>, CameraError>;
}

/// Feature access on one open device
pub trait Connection: Send {
    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError>;

    /// Fails with `FeatureUnsupported`, `FeatureReadOnly` or `InvalidFeatureValue`
    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError>;

    /// Entries of an enumeration feature the device currently advertises
    fn feature_options(&self, name: &str) -> Result<Vec<String>, CameraError>;

    fn execute(&mut self, command: &str) -> Result<(), CameraError>;

    fn payload_size(&self) -> Result<usize, CameraError>;

    fn create_stream(&mut self) -> Result<Box<dyn StreamChannel>, CameraError>;
}

/// Raw buffer exchange with the device's streaming channel.
///
/// Buffers move in with `enqueue` and come back out of `dequeue` or `flush`;
/// the channel never hands out a buffer it was not given.
pub trait StreamChannel: Send {
    fn enqueue(&mut self, buffer: HardwareBuffer);

    /// Next filled buffer, or [`CameraError::Timeout`]
    fn dequeue(&mut self, timeout: Duration) -> Result<HardwareBuffer, CameraError>;

    /// Return every buffer the channel currently holds, filled or not
    fn flush(&mut self) -> Vec<HardwareBuffer>;
}

/// Which backend to build, the `transport_hint` of the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[serde(alias = "fake")]
    Sim,
    #[serde(alias = "gstreamer", alias = "aravis")]
    Gst,
}

impl FromStr for TransportKind {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sim" | "fake" => Ok(TransportKind::Sim),
            "gst" | "gstreamer" | "aravis" => Ok(TransportKind::Gst),
            other => Err(CameraError::Transport(format!("unknown transport `{}`", other))),
        }
    }
}

/// Build the configured backend
pub fn open_transport(config: &TransportConfig) -> Result<Box<dyn Transport>, CameraError> {
    match config.kind {
        TransportKind::Sim => Ok(Box::new(SimTransport::new(config.sim.cameras.clone()))),
        #[cfg(feature = "gstreamer-transport")]
        TransportKind::Gst => Ok(Box::new(gst::GstTransport::new(config.gst.clone())?)),
        #[cfg(not(feature = "gstreamer-transport"))]
        TransportKind::Gst => Err(CameraError::Transport(
            "built without the `gstreamer-transport` feature".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_falls_back_to_empty_strings() {
        let descriptor = DeviceDescriptor::new(None, Some("acA1300"), None, "GV:10.0.0.2", Some(""));
        assert_eq!(descriptor.vendor, "");
        assert_eq!(descriptor.serial, "");
        assert_eq!(descriptor.address, None);
        assert_eq!(descriptor.to_string(), "Unknown acA1300 (Serial: )");
    }

    #[test]
    fn transport_hint_parses_aliases() {
        assert_eq!("Aravis".parse::<TransportKind>().unwrap(), TransportKind::Gst);
        assert_eq!("fake".parse::<TransportKind>().unwrap(), TransportKind::Sim);
        assert!("usb3".parse::<TransportKind>().is_err());
    }
}
