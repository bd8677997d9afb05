//! GigE Vision cameras through GStreamer's `aravissrc` element.
//!
//! The feature map lives on our side and is turned into caps and element
//! properties when the stream channel is created. AcquisitionStart and
//! AcquisitionStop drive the pipeline between Playing and Null.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::Duration;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    features, BufferStatus, Connection, DeviceDescriptor, FeatureValue, HardwareBuffer, ImageInfo,
    StreamChannel, Transport,
};
use crate::capture::frame::PixelFormat;
use crate::error::{AcquisitionFault, CameraError};

const MAX_DIMENSION: i64 = 16384;
const SUPPORTED_FORMATS: [PixelFormat; 4] = [
    PixelFormat::Mono8,
    PixelFormat::BayerRG8,
    PixelFormat::Rgb8,
    PixelFormat::Bgr8,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GstConfig {
    /// Aravis camera ids (`Vendor-Serial`) or IP addresses
    pub cameras: Vec<String>,
    /// Samples kept in the appsink before the oldest is dropped
    pub max_buffers: u32,
    pub default_width: u32,
    pub default_height: u32,
}

impl Default for GstConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            max_buffers: 3,
            default_width: 1280,
            default_height: 720,
        }
    }
}

fn gst_error(context: &str, e: impl std::fmt::Display) -> CameraError {
    CameraError::Transport(format!("{}: {}", context, e))
}

/// Aravis names cameras `Vendor-Serial`; anything else is taken as a serial
fn describe(name: &str) -> DeviceDescriptor {
    if name.parse::<IpAddr>().is_ok() {
        return DeviceDescriptor::new(None, None, None, &format!("ARV:{}", name), Some(name));
    }
    let (vendor, serial) = match name.split_once('-') {
        Some((vendor, serial)) => (Some(vendor), serial),
        None => (None, name),
    };
    DeviceDescriptor::new(vendor, None, Some(serial), &format!("ARV:{}", name), None)
}

pub struct GstTransport {
    config: GstConfig,
}

impl GstTransport {
    pub fn new(config: GstConfig) -> Result<Self, CameraError> {
        gst::init().map_err(|e| gst_error("failed to initialize GStreamer", e))?;
        if gst::ElementFactory::find("aravissrc").is_none() {
            return Err(CameraError::Transport(
                "GStreamer element `aravissrc` not found, install the Aravis plugin".into(),
            ));
        }
        Ok(Self { config })
    }
}

impl Transport for GstTransport {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        Ok(self.config.cameras.iter().map(|name| describe(name)).collect())
    }

    fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Connection>, CameraError> {
        let name = self
            .config
            .cameras
            .iter()
            .find(|name| describe(name).transport_id == descriptor.transport_id)
            .ok_or_else(|| {
                CameraError::Connection(format!("stale descriptor: {}", descriptor.transport_id))
            })?;

        // Bring a bare source to Ready to find out whether the camera answers
        let source = gst::ElementFactory::make("aravissrc")
            .property("camera-name", name.as_str())
            .build()
            .map_err(|e| gst_error("failed to create aravissrc", e))?;
        let reachable = source.set_state(gst::State::Ready).is_ok();
        let _ = source.set_state(gst::State::Null);
        if !reachable {
            return Err(CameraError::Connection(format!("{} did not respond", descriptor)));
        }

        info!("Opened {} through aravissrc", descriptor);
        Ok(Box::new(GstConnection {
            camera: name.clone(),
            descriptor: descriptor.clone(),
            width: self.config.default_width,
            height: self.config.default_height,
            pixel_format: PixelFormat::Mono8,
            frame_rate: 30.0,
            frame_rate_enable: false,
            max_buffers: self.config.max_buffers,
            pipeline: None,
            acquiring: false,
        }))
    }
}

pub struct GstConnection {
    camera: String,
    descriptor: DeviceDescriptor,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    frame_rate: f64,
    frame_rate_enable: bool,
    max_buffers: u32,
    pipeline: Option<gst::Pipeline>,
    acquiring: bool,
}

impl GstConnection {
    fn invalid(name: &str, reason: impl Into<String>) -> CameraError {
        CameraError::InvalidFeatureValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    fn caps(&self) -> Result<gst::Caps, CameraError> {
        let width = self.width as i32;
        let height = self.height as i32;
        let format = match self.pixel_format {
            PixelFormat::Mono8 => gst_video::VideoFormat::Gray8,
            PixelFormat::Rgb8 => gst_video::VideoFormat::Rgb,
            PixelFormat::Bgr8 => gst_video::VideoFormat::Bgr,
            PixelFormat::BayerRG8 => {
                return Ok(gst::Caps::builder("video/x-bayer")
                    .field("format", "rggb")
                    .field("width", width)
                    .field("height", height)
                    .build())
            }
            ref other => return Err(CameraError::UnsupportedFormat(other.clone())),
        };
        Ok(gst_video::VideoCapsBuilder::new()
            .format(format)
            .width(width)
            .height(height)
            .build())
    }

    fn build_pipeline(&self) -> Result<(gst::Pipeline, gst_app::AppSink), CameraError> {
        let mut source = format!("aravissrc camera-name=\"{}\"", self.camera);
        if self.frame_rate_enable {
            source.push_str(&format!(" frame-rate={}", self.frame_rate));
        }
        let pipeline_str = format!("{} ! {} ! appsink name=appsink", source, self.caps()?);
        debug!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| gst_error("failed to build pipeline", e))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CameraError::Transport("launch line is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CameraError::Transport("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CameraError::Transport("`appsink` is not an AppSink".into()))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", self.max_buffers);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        Ok((pipeline, appsink))
    }

    fn set_state(&self, state: gst::State) -> Result<(), CameraError> {
        let Some(pipeline) = &self.pipeline else {
            return Err(CameraError::Acquisition(AcquisitionFault::NotStreaming));
        };
        pipeline
            .set_state(state)
            .map_err(|e| gst_error("pipeline state change failed", format!("{:?}", e)))?;
        Ok(())
    }
}

impl Connection for GstConnection {
    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        let value = match name {
            features::WIDTH => FeatureValue::Int(self.width as i64),
            features::HEIGHT => FeatureValue::Int(self.height as i64),
            features::PIXEL_FORMAT => FeatureValue::Enum(self.pixel_format.to_string()),
            features::FRAME_RATE => FeatureValue::Float(self.frame_rate),
            features::FRAME_RATE_ENABLE => FeatureValue::Bool(self.frame_rate_enable),
            features::ACQUISITION_MODE => FeatureValue::Enum("Continuous".into()),
            features::PAYLOAD_SIZE => FeatureValue::Int(self.payload_size()? as i64),
            features::VENDOR_NAME => FeatureValue::String(self.descriptor.vendor.clone()),
            features::MODEL_NAME => FeatureValue::String(self.descriptor.model.clone()),
            features::SERIAL_NUMBER => FeatureValue::String(self.descriptor.serial.clone()),
            other => return Err(CameraError::FeatureUnsupported(other.to_string())),
        };
        Ok(value)
    }

    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        match name {
            features::PAYLOAD_SIZE
            | features::VENDOR_NAME
            | features::MODEL_NAME
            | features::SERIAL_NUMBER => return Err(CameraError::FeatureReadOnly(name.to_string())),
            // Caps are fixed once the pipeline exists
            features::WIDTH | features::HEIGHT | features::PIXEL_FORMAT | features::FRAME_RATE
                if self.pipeline.is_some() =>
            {
                return Err(CameraError::FeatureReadOnly(name.to_string()))
            }
            features::WIDTH | features::HEIGHT => {
                let v = value
                    .as_i64()
                    .filter(|v| (1..=MAX_DIMENSION).contains(v))
                    .ok_or_else(|| Self::invalid(name, format!("{} outside 1..={}", value, MAX_DIMENSION)))?;
                if name == features::WIDTH {
                    self.width = v as u32;
                } else {
                    self.height = v as u32;
                }
            }
            features::PIXEL_FORMAT => {
                let format: PixelFormat = value
                    .as_str()
                    .ok_or_else(|| Self::invalid(name, format!("expected enum entry, got {}", value)))?
                    .parse()
                    .unwrap_or_else(|never| match never {});
                if !SUPPORTED_FORMATS.contains(&format) {
                    return Err(Self::invalid(name, format!("`{}` is not an entry", format)));
                }
                self.pixel_format = format;
            }
            features::FRAME_RATE => {
                self.frame_rate = value
                    .as_f64()
                    .filter(|fps| *fps > 0.0 && fps.is_finite())
                    .ok_or_else(|| Self::invalid(name, format!("bad frame rate {}", value)))?;
            }
            features::FRAME_RATE_ENABLE => {
                self.frame_rate_enable = value
                    .as_bool()
                    .ok_or_else(|| Self::invalid(name, format!("expected bool, got {}", value)))?;
            }
            features::ACQUISITION_MODE => {
                if value.as_str() != Some("Continuous") {
                    return Err(Self::invalid(name, "only Continuous is supported"));
                }
            }
            other => return Err(CameraError::FeatureUnsupported(other.to_string())),
        }
        Ok(())
    }

    fn feature_options(&self, name: &str) -> Result<Vec<String>, CameraError> {
        match name {
            features::PIXEL_FORMAT => Ok(SUPPORTED_FORMATS.iter().map(|f| f.to_string()).collect()),
            features::ACQUISITION_MODE => Ok(vec!["Continuous".into()]),
            other => Err(CameraError::FeatureUnsupported(other.to_string())),
        }
    }

    fn execute(&mut self, command: &str) -> Result<(), CameraError> {
        match command {
            features::ACQUISITION_START => {
                self.set_state(gst::State::Playing)?;
                self.acquiring = true;
            }
            features::ACQUISITION_STOP => {
                if self.pipeline.is_some() {
                    self.set_state(gst::State::Null)?;
                }
                // The stream channel holding the appsink goes away on stop
                self.pipeline = None;
                self.acquiring = false;
            }
            other => return Err(CameraError::FeatureUnsupported(other.to_string())),
        }
        debug!(command, "executed");
        Ok(())
    }

    fn payload_size(&self) -> Result<usize, CameraError> {
        let bpp = self
            .pixel_format
            .bytes_per_pixel()
            .ok_or_else(|| CameraError::UnsupportedFormat(self.pixel_format.clone()))?;
        Ok(self.width as usize * self.height as usize * bpp)
    }

    fn create_stream(&mut self) -> Result<Box<dyn StreamChannel>, CameraError> {
        if self.acquiring {
            return Err(CameraError::Acquisition(AcquisitionFault::AlreadyStreaming));
        }
        let (pipeline, appsink) = self.build_pipeline()?;
        self.pipeline = Some(pipeline.clone());
        Ok(Box::new(GstStream {
            pipeline,
            appsink,
            pixel_format: self.pixel_format.clone(),
            queued: VecDeque::new(),
        }))
    }
}

impl Drop for GstConnection {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}

/// Copies each pulled sample into the oldest queued hardware buffer
pub struct GstStream {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    pixel_format: PixelFormat,
    queued: VecDeque<HardwareBuffer>,
}

impl GstStream {
    fn pull(&self, timeout: Duration) -> Result<gst::Sample, CameraError> {
        let wait = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        match self.appsink.try_pull_sample(wait) {
            Some(sample) => Ok(sample),
            None if self.appsink.is_eos() => {
                Err(CameraError::Acquisition(AcquisitionFault::StreamClosed))
            }
            None => Err(CameraError::Timeout(timeout)),
        }
    }
}

impl StreamChannel for GstStream {
    fn enqueue(&mut self, buffer: HardwareBuffer) {
        self.queued.push_back(buffer);
    }

    fn dequeue(&mut self, timeout: Duration) -> Result<HardwareBuffer, CameraError> {
        let sample = self.pull(timeout)?;
        let Some(mut buffer) = self.queued.pop_front() else {
            // No empty buffer queued: the frame is lost on our side of the wire
            debug!("Sample discarded, no buffer queued");
            return Err(CameraError::Timeout(timeout));
        };

        let Some(data) = sample.buffer() else {
            buffer.set_status(BufferStatus::Aborted);
            return Ok(buffer);
        };
        let map = match data.map_readable() {
            Ok(map) => map,
            Err(e) => {
                warn!("Failed to map sample: {}", e);
                buffer.set_status(BufferStatus::Aborted);
                return Ok(buffer);
            }
        };

        let (width, height) = sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| Some((s.get::<i32>("width").ok()?, s.get::<i32>("height").ok()?)))
            .unwrap_or((0, 0));

        if !buffer.write_payload(map.as_slice()) {
            warn!("Sample of {} bytes overflows a {} byte buffer", map.len(), buffer.capacity());
        }
        buffer.set_image_info(ImageInfo {
            width: width.max(0) as u32,
            height: height.max(0) as u32,
            pixel_format: self.pixel_format.clone(),
        });
        Ok(buffer)
    }

    fn flush(&mut self) -> Vec<HardwareBuffer> {
        self.queued.drain(..).collect()
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
