//! Simulated GigE Vision camera.
//!
//! Behaves like a real device behind a GenTL-style producer: a feature map
//! with locked registers during acquisition, a stream channel fed by a
//! worker thread at the configured frame rate, and frames lost in the
//! "hardware" whenever no empty buffer is queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::{
    features, BufferStatus, Connection, DeviceDescriptor, FeatureValue, HardwareBuffer, ImageInfo,
    StreamChannel, Transport,
};
use crate::capture::frame::PixelFormat;
use crate::error::{AcquisitionFault, CameraError};

const IDLE_POLL: Duration = Duration::from_millis(2);
const ACQUISITION_MODES: [&str; 3] = ["Continuous", "SingleFrame", "MultiFrame"];

/// One simulated camera on the virtual network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCameraConfig {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub address: Option<String>,
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub max_frame_rate: f64,
    pub pixel_formats: Vec<PixelFormat>,
    /// `false` models a camera on the wrong subnet: discoverable, not openable
    pub reachable: bool,
    /// Every n-th frame arrives incomplete
    pub fail_every: Option<u64>,
}

impl Default for SimCameraConfig {
    fn default() -> Self {
        Self {
            vendor: "Gigecast".into(),
            model: "SimCam-GV".into(),
            serial: "SIM0001".into(),
            address: Some("192.168.10.20".into()),
            sensor_width: 1920,
            sensor_height: 1200,
            max_frame_rate: 60.0,
            pixel_formats: vec![
                PixelFormat::Mono8,
                PixelFormat::BayerRG8,
                PixelFormat::Rgb8,
                PixelFormat::Bgr8,
                PixelFormat::Mono16,
            ],
            reachable: true,
            fail_every: None,
        }
    }
}

impl SimCameraConfig {
    fn transport_id(&self) -> String {
        format!("SIM:{}", self.serial)
    }

    fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor::new(
            Some(&self.vendor),
            Some(&self.model),
            Some(&self.serial),
            &self.transport_id(),
            self.address.as_deref(),
        )
    }
}

/// Transport backed entirely by in-process simulated cameras
pub struct SimTransport {
    cameras: Vec<SimCameraConfig>,
}

impl SimTransport {
    pub fn new(cameras: Vec<SimCameraConfig>) -> Self {
        Self { cameras }
    }
}

impl Transport for SimTransport {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, CameraError> {
        Ok(self.cameras.iter().map(SimCameraConfig::descriptor).collect())
    }

    fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Connection>, CameraError> {
        let camera = self
            .cameras
            .iter()
            .find(|c| c.transport_id() == descriptor.transport_id && c.serial == descriptor.serial)
            .ok_or_else(|| {
                CameraError::Connection(format!("stale descriptor: {}", descriptor.transport_id))
            })?;

        if !camera.reachable {
            return Err(CameraError::Connection(format!(
                "{} at {} is unreachable (wrong subnet?)",
                descriptor,
                camera.address.as_deref().unwrap_or("unknown address")
            )));
        }

        info!("Opened simulated camera {}", descriptor);
        Ok(Box::new(SimConnection::new(camera.clone())))
    }
}

#[derive(Debug, Clone)]
struct Registers {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    frame_rate: f64,
    frame_rate_enable: bool,
    acquisition_mode: String,
}

impl Registers {
    fn payload_size(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel().unwrap_or(1)
    }

    fn frame_interval(&self, max_frame_rate: f64) -> Duration {
        let fps = if self.frame_rate_enable {
            self.frame_rate
        } else {
            max_frame_rate
        };
        Duration::from_secs_f64(1.0 / fps.max(0.1))
    }
}

/// State shared between the control connection and the stream worker
struct Shared {
    registers: ArcSwap<Registers>,
    acquiring: AtomicBool,
}

pub struct SimConnection {
    camera: SimCameraConfig,
    shared: Arc<Shared>,
}

impl SimConnection {
    fn new(camera: SimCameraConfig) -> Self {
        let registers = Registers {
            width: camera.sensor_width,
            height: camera.sensor_height,
            pixel_format: camera
                .pixel_formats
                .first()
                .cloned()
                .unwrap_or(PixelFormat::Mono8),
            frame_rate: camera.max_frame_rate,
            frame_rate_enable: false,
            acquisition_mode: "Continuous".into(),
        };
        Self {
            camera,
            shared: Arc::new(Shared {
                registers: ArcSwap::from_pointee(registers),
                acquiring: AtomicBool::new(false),
            }),
        }
    }

    fn invalid(name: &str, reason: impl Into<String>) -> CameraError {
        CameraError::InvalidFeatureValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    fn dimension(&self, name: &str, value: &FeatureValue, max: u32) -> Result<u32, CameraError> {
        let v = value
            .as_i64()
            .ok_or_else(|| Self::invalid(name, format!("expected integer, got {}", value)))?;
        if v < 1 || v > max as i64 {
            return Err(Self::invalid(name, format!("{} outside 1..={}", v, max)));
        }
        Ok(v as u32)
    }
}

impl Connection for SimConnection {
    fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
        let regs = self.shared.registers.load();
        let value = match name {
            features::WIDTH => FeatureValue::Int(regs.width as i64),
            features::HEIGHT => FeatureValue::Int(regs.height as i64),
            features::PIXEL_FORMAT => FeatureValue::Enum(regs.pixel_format.to_string()),
            features::FRAME_RATE => FeatureValue::Float(regs.frame_rate),
            features::FRAME_RATE_ENABLE => FeatureValue::Bool(regs.frame_rate_enable),
            features::ACQUISITION_MODE => FeatureValue::Enum(regs.acquisition_mode.clone()),
            features::PAYLOAD_SIZE => FeatureValue::Int(regs.payload_size() as i64),
            features::SENSOR_WIDTH => FeatureValue::Int(self.camera.sensor_width as i64),
            features::SENSOR_HEIGHT => FeatureValue::Int(self.camera.sensor_height as i64),
            features::VENDOR_NAME => FeatureValue::String(self.camera.vendor.clone()),
            features::MODEL_NAME => FeatureValue::String(self.camera.model.clone()),
            features::SERIAL_NUMBER => FeatureValue::String(self.camera.serial.clone()),
            other => return Err(CameraError::FeatureUnsupported(other.to_string())),
        };
        Ok(value)
    }

    fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
        let acquiring = self.shared.acquiring.load(Ordering::Acquire);
        let mut regs = Registers::clone(&self.shared.registers.load());

        match name {
            features::PAYLOAD_SIZE
            | features::SENSOR_WIDTH
            | features::SENSOR_HEIGHT
            | features::VENDOR_NAME
            | features::MODEL_NAME
            | features::SERIAL_NUMBER => return Err(CameraError::FeatureReadOnly(name.to_string())),
            // Transport-layer parameters are locked while streaming
            features::WIDTH | features::HEIGHT | features::PIXEL_FORMAT if acquiring => {
                return Err(CameraError::FeatureReadOnly(name.to_string()))
            }
            features::WIDTH => regs.width = self.dimension(name, &value, self.camera.sensor_width)?,
            features::HEIGHT => {
                regs.height = self.dimension(name, &value, self.camera.sensor_height)?
            }
            features::PIXEL_FORMAT => {
                let symbol = value
                    .as_str()
                    .ok_or_else(|| Self::invalid(name, format!("expected enum entry, got {}", value)))?;
                let format: PixelFormat = symbol.parse().unwrap_or(PixelFormat::Other(symbol.into()));
                if !self.camera.pixel_formats.contains(&format) {
                    return Err(Self::invalid(name, format!("`{}` is not an entry", symbol)));
                }
                regs.pixel_format = format;
            }
            features::FRAME_RATE => {
                let fps = value
                    .as_f64()
                    .ok_or_else(|| Self::invalid(name, format!("expected float, got {}", value)))?;
                if !(fps > 0.0 && fps <= self.camera.max_frame_rate) {
                    return Err(Self::invalid(
                        name,
                        format!("{} outside (0, {}]", fps, self.camera.max_frame_rate),
                    ));
                }
                regs.frame_rate = fps;
            }
            features::FRAME_RATE_ENABLE => {
                regs.frame_rate_enable = value
                    .as_bool()
                    .ok_or_else(|| Self::invalid(name, format!("expected bool, got {}", value)))?;
            }
            features::ACQUISITION_MODE => {
                let mode = value
                    .as_str()
                    .filter(|m| ACQUISITION_MODES.contains(m))
                    .ok_or_else(|| Self::invalid(name, format!("unknown mode {}", value)))?;
                regs.acquisition_mode = mode.to_string();
            }
            other => return Err(CameraError::FeatureUnsupported(other.to_string())),
        }

        trace!(feature = name, %value, "register write");
        self.shared.registers.store(Arc::new(regs));
        Ok(())
    }

    fn feature_options(&self, name: &str) -> Result<Vec<String>, CameraError> {
        match name {
            features::PIXEL_FORMAT => Ok(self
                .camera
                .pixel_formats
                .iter()
                .map(|f| f.to_string())
                .collect()),
            features::ACQUISITION_MODE => Ok(ACQUISITION_MODES.iter().map(|m| m.to_string()).collect()),
            other => Err(CameraError::FeatureUnsupported(other.to_string())),
        }
    }

    fn execute(&mut self, command: &str) -> Result<(), CameraError> {
        match command {
            features::ACQUISITION_START => self.shared.acquiring.store(true, Ordering::Release),
            features::ACQUISITION_STOP => self.shared.acquiring.store(false, Ordering::Release),
            other => return Err(CameraError::FeatureUnsupported(other.to_string())),
        }
        debug!(command, "executed");
        Ok(())
    }

    fn payload_size(&self) -> Result<usize, CameraError> {
        Ok(self.shared.registers.load().payload_size())
    }

    fn create_stream(&mut self) -> Result<Box<dyn StreamChannel>, CameraError> {
        Ok(Box::new(SimStream::spawn(
            self.shared.clone(),
            self.camera.clone(),
        )?))
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        self.shared.acquiring.store(false, Ordering::Release);
    }
}

/// Stream channel: an input queue of empty buffers and an output queue of
/// filled ones, with the worker thread standing in for the camera.
pub struct SimStream {
    input_tx: Sender<HardwareBuffer>,
    input_rx: Receiver<HardwareBuffer>,
    output_rx: Receiver<HardwareBuffer>,
    alive: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimStream {
    fn spawn(shared: Arc<Shared>, camera: SimCameraConfig) -> Result<Self, CameraError> {
        let (input_tx, input_rx) = flume::unbounded();
        let (output_tx, output_rx) = flume::unbounded();
        let alive = Arc::new(AtomicBool::new(true));

        let worker = StreamWorker {
            shared,
            camera,
            input: input_rx.clone(),
            output: output_tx,
            alive: alive.clone(),
        };
        let handle = thread::Builder::new()
            .name("sim-stream".into())
            .spawn(move || worker.run())
            .map_err(|e| CameraError::Transport(format!("failed to spawn stream worker: {}", e)))?;

        Ok(Self {
            input_tx,
            input_rx,
            output_rx,
            alive,
            worker: Some(handle),
        })
    }
}

impl StreamChannel for SimStream {
    fn enqueue(&mut self, buffer: HardwareBuffer) {
        // Cannot fail: this channel keeps its own receiver alive.
        let _ = self.input_tx.send(buffer);
    }

    fn dequeue(&mut self, timeout: Duration) -> Result<HardwareBuffer, CameraError> {
        match self.output_rx.recv_timeout(timeout) {
            Ok(buffer) => Ok(buffer),
            Err(RecvTimeoutError::Timeout) => Err(CameraError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CameraError::Acquisition(AcquisitionFault::StreamClosed))
            }
        }
    }

    fn flush(&mut self) -> Vec<HardwareBuffer> {
        self.input_rx
            .try_iter()
            .chain(self.output_rx.try_iter())
            .collect()
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("Simulated stream worker panicked");
            }
        }
    }
}

struct StreamWorker {
    shared: Arc<Shared>,
    camera: SimCameraConfig,
    input: Receiver<HardwareBuffer>,
    output: Sender<HardwareBuffer>,
    alive: Arc<AtomicBool>,
}

impl StreamWorker {
    fn run(self) {
        let mut sequence = 0u64;
        let mut lost = 0u64;
        let mut next_tick: Option<Instant> = None;

        while self.alive.load(Ordering::Acquire) {
            if !self.shared.acquiring.load(Ordering::Acquire) {
                next_tick = None;
                thread::sleep(IDLE_POLL);
                continue;
            }

            let regs = self.shared.registers.load_full();
            let interval = regs.frame_interval(self.camera.max_frame_rate);
            let now = Instant::now();
            let tick = *next_tick.get_or_insert(now);
            if tick > now {
                // Short naps so stop and drop are noticed promptly
                thread::sleep((tick - now).min(IDLE_POLL));
                continue;
            }
            next_tick = Some(if now - tick > interval {
                now + interval
            } else {
                tick + interval
            });

            let mut buffer = match self.input.try_recv() {
                Ok(buffer) => buffer,
                Err(TryRecvError::Empty) => {
                    lost += 1;
                    sequence += 1;
                    trace!(sequence, "no buffer queued, frame lost");
                    continue;
                }
                Err(TryRecvError::Disconnected) => break,
            };

            self.expose(&mut buffer, &regs, sequence);
            sequence += 1;

            if !self.shared.acquiring.load(Ordering::Acquire) {
                buffer.set_status(BufferStatus::Aborted);
            }
            if self.output.send(buffer).is_err() {
                break;
            }
        }

        debug!(frames = sequence, lost, "Simulated stream worker exiting");
    }

    fn expose(&self, buffer: &mut HardwareBuffer, regs: &Registers, sequence: u64) {
        if let Some(n) = self.camera.fail_every.filter(|n| *n > 0) {
            if (sequence + 1) % n == 0 {
                buffer.set_status(BufferStatus::Timeout);
                return;
            }
        }

        let Some(dst) = buffer.payload_mut(regs.payload_size()) else {
            buffer.set_status(BufferStatus::Aborted);
            return;
        };
        fill_test_pattern(dst, regs.width, regs.height, &regs.pixel_format, sequence);

        buffer.set_status(BufferStatus::Success);
        buffer.set_image_info(ImageInfo {
            width: regs.width,
            height: regs.height,
            pixel_format: regs.pixel_format.clone(),
        });
    }
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Scrolling colour bars, the scene every simulated sensor looks at
fn scene(x: u32, width: u32, sequence: u64) -> [u8; 3] {
    let shifted = (x as u64 + sequence) % width.max(1) as u64;
    BARS[(shifted * BARS.len() as u64 / width.max(1) as u64) as usize]
}

fn fill_test_pattern(dst: &mut [u8], width: u32, height: u32, format: &PixelFormat, sequence: u64) {
    let w = width as usize;
    for y in 0..height as usize {
        for x in 0..w {
            let i = y * w + x;
            match format {
                PixelFormat::Mono8 => dst[i] = (x + y).wrapping_add(sequence as usize) as u8,
                PixelFormat::Mono16 => {
                    let v = ((x + y + sequence as usize) as u16).wrapping_mul(64);
                    dst[i * 2..i * 2 + 2].copy_from_slice(&v.to_le_bytes());
                }
                PixelFormat::BayerRG8 => {
                    let rgb = scene(x as u32, width, sequence);
                    let channel = match (y & 1, x & 1) {
                        (0, 0) => 0,
                        (1, 1) => 2,
                        _ => 1,
                    };
                    dst[i] = rgb[channel];
                }
                PixelFormat::Rgb8 => {
                    dst[i * 3..i * 3 + 3].copy_from_slice(&scene(x as u32, width, sequence))
                }
                PixelFormat::Bgr8 => {
                    let [r, g, b] = scene(x as u32, width, sequence);
                    dst[i * 3..i * 3 + 3].copy_from_slice(&[b, g, r]);
                }
                _ => {
                    let bpp = format.bytes_per_pixel().unwrap_or(1);
                    dst[i * bpp..(i + 1) * bpp].fill(0x80);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_default() -> Box<dyn Connection> {
        let mut transport = SimTransport::new(vec![SimCameraConfig::default()]);
        let descriptor = transport.enumerate().unwrap().remove(0);
        transport.open(&descriptor).unwrap()
    }

    #[test]
    fn unreachable_camera_is_listed_but_cannot_be_opened() {
        let mut transport = SimTransport::new(vec![SimCameraConfig {
            reachable: false,
            ..Default::default()
        }]);
        let devices = transport.enumerate().unwrap();
        assert_eq!(devices.len(), 1);
        assert!(matches!(
            transport.open(&devices[0]),
            Err(CameraError::Connection(_))
        ));
    }

    #[test]
    fn stale_descriptor_is_rejected() {
        let mut transport = SimTransport::new(vec![SimCameraConfig::default()]);
        let stale = DeviceDescriptor::new(Some("Gigecast"), None, Some("GONE"), "SIM:GONE", None);
        assert!(matches!(transport.open(&stale), Err(CameraError::Connection(_))));
    }

    #[test]
    fn read_only_and_unknown_features_are_rejected() {
        let mut conn = open_default();
        assert!(matches!(
            conn.set_feature(features::PAYLOAD_SIZE, FeatureValue::Int(1)),
            Err(CameraError::FeatureReadOnly(_))
        ));
        assert!(matches!(
            conn.set_feature("GevSCPSPacketSize", FeatureValue::Int(9000)),
            Err(CameraError::FeatureUnsupported(_))
        ));
        assert!(matches!(
            conn.set_feature(features::WIDTH, FeatureValue::Int(100_000)),
            Err(CameraError::InvalidFeatureValue { .. })
        ));
    }

    #[test]
    fn geometry_is_locked_while_acquiring() {
        let mut conn = open_default();
        conn.execute(features::ACQUISITION_START).unwrap();
        assert!(matches!(
            conn.set_feature(features::WIDTH, FeatureValue::Int(640)),
            Err(CameraError::FeatureReadOnly(_))
        ));
        conn.set_feature(features::FRAME_RATE, FeatureValue::Float(10.0))
            .unwrap();
        conn.execute(features::ACQUISITION_STOP).unwrap();
        conn.set_feature(features::WIDTH, FeatureValue::Int(640)).unwrap();
    }

    #[test]
    fn payload_size_follows_geometry_and_format() {
        let mut conn = open_default();
        conn.set_feature(features::WIDTH, FeatureValue::Int(640)).unwrap();
        conn.set_feature(features::HEIGHT, FeatureValue::Int(480)).unwrap();
        conn.set_feature(features::PIXEL_FORMAT, FeatureValue::Enum("RGB8".into()))
            .unwrap();
        assert_eq!(conn.payload_size().unwrap(), 640 * 480 * 3);
    }

    #[test]
    fn queued_buffer_comes_back_filled() {
        let mut conn = open_default();
        conn.set_feature(features::WIDTH, FeatureValue::Int(16)).unwrap();
        conn.set_feature(features::HEIGHT, FeatureValue::Int(8)).unwrap();
        let payload = conn.payload_size().unwrap();

        let mut stream = conn.create_stream().unwrap();
        stream.enqueue(HardwareBuffer::new(
            crate::transport::BufferId { generation: 0, index: 0 },
            payload,
        ));
        conn.execute(features::ACQUISITION_START).unwrap();

        let buffer = stream.dequeue(Duration::from_secs(1)).unwrap();
        assert_eq!(buffer.status(), BufferStatus::Success);
        assert_eq!(buffer.payload().len(), 16 * 8);
        assert_eq!(buffer.image_info().unwrap().pixel_format, PixelFormat::Mono8);
        conn.execute(features::ACQUISITION_STOP).unwrap();
    }

    #[test]
    fn flush_returns_queued_buffers() {
        let mut conn = open_default();
        let mut stream = conn.create_stream().unwrap();
        for index in 0..3 {
            stream.enqueue(HardwareBuffer::new(
                crate::transport::BufferId { generation: 0, index },
                8,
            ));
        }
        assert_eq!(stream.flush().len(), 3);
        assert!(matches!(
            stream.dequeue(Duration::from_millis(5)),
            Err(CameraError::Timeout(_))
        ));
    }
}
