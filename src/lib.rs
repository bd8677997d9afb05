pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod sinks;
pub mod transport;
pub mod utils;

use std::path::Path;
use std::time::Duration;

use arc_swap::ArcSwap;
use capture::frame::PixelFormat;
use capture::session::SessionOptions;
use serde::{Deserialize, Serialize};

pub use capture::{DecodedFrame, DeviceSession};
pub use error::CameraError;
pub use pipeline::{FramePipeline, RateGovernor};

use crate::transport::{SimCameraConfig, TransportKind};
use crate::utils::DeviceSelector;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub transport: TransportConfig,
    pub publisher: PublisherConfig,
    pub snapshot: SnapshotConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device_index: usize,
    /// Select by serial number or network address instead of index
    pub serial: Option<String>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: f64,
    pub buffer_count: usize,
    pub grab_timeout_ms: u64,
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Outbound delivery rate; `None` delivers as fast as frames arrive
    pub target_fps: Option<f64>,
    /// Pin the acquisition thread to this core
    pub pin_core: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub sim: SimConfig,
    #[cfg(feature = "gstreamer-transport")]
    pub gst: transport::gst::GstConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub cameras: Vec<SimCameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub enabled: bool,
    pub queue_depth: usize,
    pub track_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub output_dir: String,
    /// Save the first delivered frame
    pub on_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub ring_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            serial: None,
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::Mono8,
            frame_rate: 30.0,
            buffer_count: capture::pool::DEFAULT_POOL_SIZE,
            grab_timeout_ms: 1000,
            drain_timeout_ms: 500,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: Some(30.0),
            pin_core: None,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Sim,
            sim: SimConfig::default(),
            #[cfg(feature = "gstreamer-transport")]
            gst: transport::gst::GstConfig::default(),
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cameras: vec![SimCameraConfig::default()],
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_depth: 2,
            track_name: "gige-camera".into(),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            output_dir: "recordings".into(),
            on_start: true,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            width: 1280,
            height: 720,
            ring_size: 4,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `GIGECAST__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("GIGECAST")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

impl CaptureConfig {
    pub fn selector(&self) -> DeviceSelector {
        match &self.serial {
            Some(serial) => DeviceSelector::Serial(serial.clone()),
            None => DeviceSelector::Index(self.device_index),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            buffer_count: self.buffer_count,
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_the_reference_streamer() {
        let config = Config::default();
        assert_eq!((config.capture.width, config.capture.height), (1280, 720));
        assert_eq!(config.capture.buffer_count, 10);
        assert_eq!(config.capture.grab_timeout(), Duration::from_secs(1));
        assert_eq!(config.capture.selector(), DeviceSelector::Index(0));
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nwidth = 640\nheight = 480\npixel_format = \"BayerRG8\"\nserial = \"SIM0001\"\n\n[pipeline]\ntarget_fps = 10.0"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!(config.capture.pixel_format, PixelFormat::BayerRG8);
        assert_eq!(
            config.capture.selector(),
            DeviceSelector::Serial("SIM0001".into())
        );
        assert_eq!(config.pipeline.target_fps, Some(10.0));
        assert_eq!(config.transport.kind, TransportKind::Sim);
        assert_eq!(config.transport.sim.cameras.len(), 1);
    }
}
