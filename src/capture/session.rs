//! Device session: one open camera, its configuration and acquisition state.
//!
//! ```text
//! Idle --connect--> Connected --start_acquisition--> Streaming
//!                       ^                                |
//!                       +--------stop_acquisition--------+
//! Connected/Streaming --disconnect--> Closed
//! ```
//!
//! Only the control calls on this type change the acquisition state. The
//! frame loop borrows the session through [`FrameSource`] and merely reads it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::engine::{FrameGeometry, StreamEngine};
use super::frame::{DecodedFrame, PixelFormat};
use super::pool::{BufferPool, DEFAULT_POOL_SIZE};
use crate::error::{AcquisitionFault, CameraError};
use crate::pipeline::stats::{StatsSnapshot, StreamStats};
use crate::pipeline::FrameSource;
use crate::transport::{features, Connection, DeviceDescriptor, FeatureValue, Transport};
use crate::utils::{select_device, DeviceSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionState {
    Idle,
    Configuring,
    Streaming,
    Stopping,
}

/// Lifecycle of the session as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Streaming,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub frame_rate: f64,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub buffer_count: usize,
    /// Upper bound on waiting for in-flight buffers when stopping
    pub drain_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_POOL_SIZE,
            drain_timeout: Duration::from_millis(500),
        }
    }
}

pub struct DeviceSession {
    transport: Box<dyn Transport>,
    options: SessionOptions,
    descriptor: Option<DeviceDescriptor>,
    connection: Option<Box<dyn Connection>>,
    engine: Option<StreamEngine>,
    settings: Option<AcquisitionSettings>,
    acquisition: AcquisitionState,
    closed: bool,
    stats: Arc<StreamStats>,
}

impl DeviceSession {
    pub fn new(transport: Box<dyn Transport>, options: SessionOptions) -> Self {
        Self {
            transport,
            options,
            descriptor: None,
            connection: None,
            engine: None,
            settings: None,
            acquisition: AcquisitionState::Idle,
            closed: false,
            stats: Arc::new(StreamStats::new()),
        }
    }

    /// Enumerate, pick a device and connect. Nothing is returned on failure.
    pub fn open(
        mut transport: Box<dyn Transport>,
        selector: &DeviceSelector,
        options: SessionOptions,
    ) -> Result<Self, CameraError> {
        let devices = transport.enumerate()?;
        debug!("{} backend found {} device(s)", transport.name(), devices.len());
        let descriptor = select_device(&devices, selector)?.clone();

        let mut session = Self::new(transport, options);
        session.connect(descriptor)?;
        Ok(session)
    }

    #[instrument(skip(self), fields(device = %descriptor))]
    pub fn connect(&mut self, descriptor: DeviceDescriptor) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::SessionClosed);
        }
        if let Some(current) = &self.descriptor {
            return Err(CameraError::AlreadyConnected(current.to_string()));
        }

        let mut connection = self.transport.open(&descriptor)?;

        if let Err(e) = connection.set_feature(
            features::ACQUISITION_MODE,
            FeatureValue::Enum("Continuous".into()),
        ) {
            debug!("Leaving acquisition mode unchanged: {}", e);
        }

        let settings = read_settings(connection.as_ref());
        info!(
            "Connected to camera: {} ({}x{} {} @ {:.1} FPS)",
            descriptor, settings.width, settings.height, settings.pixel_format, settings.frame_rate
        );

        self.stats = Arc::new(StreamStats::new());
        self.connection = Some(connection);
        self.descriptor = Some(descriptor);
        self.settings = Some(settings);
        self.acquisition = AcquisitionState::Idle;
        Ok(())
    }

    /// Apply geometry, pixel format and frame rate.
    ///
    /// A running acquisition is stopped around the change and restarted
    /// afterwards. Whatever fails, a session that was streaming is left
    /// streaming: a rejected setting keeps the previous values, and if the
    /// new ones cannot be streamed the previous values are put back first.
    #[instrument(skip(self))]
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        pixel_format: PixelFormat,
        frame_rate: f64,
    ) -> Result<(), CameraError> {
        let advertised = self.advertised_formats()?;
        if !advertised.contains(&pixel_format) {
            return Err(CameraError::UnsupportedFormat(pixel_format));
        }

        let previous = self.settings.clone();
        let was_streaming = self.acquisition == AcquisitionState::Streaming;
        if was_streaming {
            if let Err(e) = self.stop_acquisition() {
                warn!("Could not stop for reconfiguration: {}", e);
                self.resume();
                return Err(e);
            }
        }

        self.acquisition = AcquisitionState::Configuring;
        let result = self.apply(&AcquisitionSettings {
            width,
            height,
            pixel_format,
            frame_rate,
        });
        self.acquisition = AcquisitionState::Idle;

        match &result {
            Ok(()) => {
                self.refresh_settings();
                info!("Configured {}x{} @ {:.1} FPS", width, height, frame_rate);
            }
            Err(e) => warn!("Configuration rejected, previous settings restored: {}", e),
        }

        if !was_streaming {
            return result;
        }
        let Err(e) = self.start_acquisition() else {
            return result;
        };
        if result.is_err() {
            warn!("Could not resume acquisition: {}", e);
            return result;
        }

        warn!("Cannot stream with the new settings, reverting: {}", e);
        if let Some(previous) = previous {
            match self.apply(&previous) {
                Ok(()) => self.refresh_settings(),
                Err(undo) => warn!("Failed to restore previous settings: {}", undo),
            }
        }
        self.resume();
        Err(e)
    }

    fn resume(&mut self) {
        if let Err(e) = self.start_acquisition() {
            warn!("Could not resume acquisition: {}", e);
        }
    }

    fn refresh_settings(&mut self) {
        if let Some(conn) = self.connection.as_deref() {
            self.settings = Some(read_settings(conn));
        }
    }

    /// Pixel formats the device currently offers
    pub fn advertised_formats(&self) -> Result<Vec<PixelFormat>, CameraError> {
        let conn = self.connection()?;
        let options = conn.feature_options(features::PIXEL_FORMAT)?;
        Ok(options.iter().map(|o| o.parse().unwrap_or(PixelFormat::Other(o.clone()))).collect())
    }

    fn apply(&mut self, target: &AcquisitionSettings) -> Result<(), CameraError> {
        let conn = self.connection_mut()?;

        // (feature, value, may the device lack it)
        let steps = [
            (features::WIDTH, FeatureValue::Int(target.width as i64), false),
            (features::HEIGHT, FeatureValue::Int(target.height as i64), false),
            (
                features::PIXEL_FORMAT,
                FeatureValue::Enum(target.pixel_format.to_string()),
                false,
            ),
            (features::FRAME_RATE_ENABLE, FeatureValue::Bool(true), true),
            (features::FRAME_RATE, FeatureValue::Float(target.frame_rate), false),
        ];

        let mut applied: Vec<(&str, FeatureValue)> = Vec::new();
        for (name, value, optional) in steps {
            let outcome = conn
                .get_feature(name)
                .and_then(|previous| conn.set_feature(name, value).map(|()| previous));
            match outcome {
                Ok(previous) => applied.push((name, previous)),
                Err(CameraError::FeatureUnsupported(_)) if optional => {}
                Err(e) => {
                    for (name, previous) in applied.into_iter().rev() {
                        if let Err(undo) = conn.set_feature(name, previous) {
                            warn!("Failed to restore {}: {}", name, undo);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Queue the buffer ring, then tell the device to stream
    #[instrument(skip(self))]
    pub fn start_acquisition(&mut self) -> Result<(), CameraError> {
        if self.acquisition == AcquisitionState::Streaming {
            return Err(AcquisitionFault::AlreadyStreaming.into());
        }
        self.connection()?;

        let geometry = self
            .settings
            .as_ref()
            .map(|s| FrameGeometry {
                width: s.width,
                height: s.height,
                pixel_format: s.pixel_format.clone(),
            })
            .ok_or(CameraError::NotConnected)?;
        let buffer_count = self.options.buffer_count;
        let drain_timeout = self.options.drain_timeout;
        let stats = self.stats.clone();

        let conn = self.connection_mut()?;
        let payload_size = conn.payload_size()?;
        let stream = conn.create_stream()?;
        let engine = StreamEngine::start(stream, buffer_count, payload_size, geometry, stats)?;

        if let Err(e) = conn.execute(features::ACQUISITION_START) {
            engine.stop(drain_timeout);
            return Err(e);
        }

        self.engine = Some(engine);
        self.acquisition = AcquisitionState::Streaming;
        info!("Started image acquisition");
        Ok(())
    }

    /// Stop streaming and reclaim the ring. Stopping an idle session is a no-op.
    #[instrument(skip(self))]
    pub fn stop_acquisition(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::SessionClosed);
        }
        if self.acquisition != AcquisitionState::Streaming {
            return Ok(());
        }

        self.acquisition = AcquisitionState::Stopping;
        let command = match self.connection.as_mut() {
            Some(conn) => conn.execute(features::ACQUISITION_STOP),
            None => Ok(()),
        };
        if let Err(e) = &command {
            warn!("AcquisitionStop failed, draining anyway: {}", e);
        }

        if let Some(engine) = self.engine.take() {
            let report = engine.stop(self.options.drain_timeout);
            debug!(?report, "Stream drained");
        }
        self.acquisition = AcquisitionState::Idle;
        info!("Stopped image acquisition");
        command
    }

    /// Release the device. The session is unusable afterwards.
    pub fn disconnect(&mut self) -> Result<(), CameraError> {
        if self.closed {
            return Err(CameraError::SessionClosed);
        }
        if let Err(e) = self.stop_acquisition() {
            warn!("Error while stopping before disconnect: {}", e);
        }

        self.engine = None;
        self.connection = None;
        self.closed = true;
        if let Some(descriptor) = &self.descriptor {
            info!("Disconnected from camera {}", descriptor);
        }
        Ok(())
    }

    pub fn grab(&mut self, timeout: Duration) -> Result<DecodedFrame, CameraError> {
        if self.closed {
            return Err(CameraError::SessionClosed);
        }
        match (self.acquisition, self.engine.as_mut()) {
            (AcquisitionState::Streaming, Some(engine)) => engine.grab(timeout),
            _ => Err(AcquisitionFault::NotStreaming.into()),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.descriptor.is_none() {
            SessionState::Idle
        } else if self.acquisition == AcquisitionState::Streaming {
            SessionState::Streaming
        } else {
            SessionState::Connected
        }
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition
    }

    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn settings(&self) -> Option<&AcquisitionSettings> {
        self.settings.as_ref()
    }

    /// (width, height), or (0, 0) before connecting
    pub fn resolution(&self) -> (u32, u32) {
        self.settings
            .as_ref()
            .map_or((0, 0), |s| (s.width, s.height))
    }

    pub fn frame_rate(&self) -> f64 {
        self.settings.as_ref().map_or(0.0, |s| s.frame_rate)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Shared counters, for readers on other threads
    pub fn stats_handle(&self) -> Arc<StreamStats> {
        self.stats.clone()
    }

    /// Ledger of the active buffer ring, if streaming
    pub fn buffer_pool(&self) -> Option<&BufferPool> {
        self.engine.as_ref().map(StreamEngine::pool)
    }

    fn connection(&self) -> Result<&dyn Connection, CameraError> {
        if self.closed {
            return Err(CameraError::SessionClosed);
        }
        self.connection.as_deref().ok_or(CameraError::NotConnected)
    }

    fn connection_mut(&mut self) -> Result<&mut Box<dyn Connection>, CameraError> {
        if self.closed {
            return Err(CameraError::SessionClosed);
        }
        self.connection.as_mut().ok_or(CameraError::NotConnected)
    }
}

impl FrameSource for DeviceSession {
    fn grab(&mut self, timeout: Duration) -> Result<DecodedFrame, CameraError> {
        DeviceSession::grab(self, timeout)
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.disconnect();
        }
    }
}

fn read_settings(conn: &dyn Connection) -> AcquisitionSettings {
    let int = |name: &str| {
        conn.get_feature(name)
            .ok()
            .and_then(|v| v.as_i64())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    };
    AcquisitionSettings {
        width: int(features::WIDTH),
        height: int(features::HEIGHT),
        pixel_format: conn
            .get_feature(features::PIXEL_FORMAT)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.parse().unwrap_or(PixelFormat::Other(s.into()))))
            .unwrap_or(PixelFormat::Mono8),
        frame_rate: conn
            .get_feature(features::FRAME_RATE)
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::transport::{SimCameraConfig, SimTransport, StreamChannel};

    fn sim(cameras: Vec<SimCameraConfig>) -> Box<dyn Transport> {
        Box::new(SimTransport::new(cameras))
    }

    fn connected() -> DeviceSession {
        DeviceSession::open(
            sim(vec![SimCameraConfig::default()]),
            &DeviceSelector::Index(0),
            SessionOptions::default(),
        )
        .unwrap()
    }

    /// Commands the next connection will refuse
    #[derive(Clone, Default)]
    struct Refusals {
        stop: Arc<AtomicBool>,
        starts: Arc<AtomicUsize>,
    }

    /// Simulated camera whose acquisition commands can be made to fail
    struct Stubborn {
        inner: SimTransport,
        refusals: Refusals,
    }

    struct StubbornConnection {
        inner: Box<dyn Connection>,
        refusals: Refusals,
    }

    impl Transport for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, CameraError> {
            self.inner.enumerate()
        }

        fn open(&mut self, descriptor: &DeviceDescriptor) -> Result<Box<dyn Connection>, CameraError> {
            Ok(Box::new(StubbornConnection {
                inner: self.inner.open(descriptor)?,
                refusals: self.refusals.clone(),
            }))
        }
    }

    impl Connection for StubbornConnection {
        fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
            self.inner.get_feature(name)
        }

        fn set_feature(&mut self, name: &str, value: FeatureValue) -> Result<(), CameraError> {
            self.inner.set_feature(name, value)
        }

        fn feature_options(&self, name: &str) -> Result<Vec<String>, CameraError> {
            self.inner.feature_options(name)
        }

        fn execute(&mut self, command: &str) -> Result<(), CameraError> {
            let refused = match command {
                features::ACQUISITION_STOP => self.refusals.stop.load(Ordering::SeqCst),
                features::ACQUISITION_START => self
                    .refusals
                    .starts
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok(),
                _ => false,
            };
            if refused {
                return Err(CameraError::Transport(format!("{} refused", command)));
            }
            self.inner.execute(command)
        }

        fn payload_size(&self) -> Result<usize, CameraError> {
            self.inner.payload_size()
        }

        fn create_stream(&mut self) -> Result<Box<dyn StreamChannel>, CameraError> {
            self.inner.create_stream()
        }
    }

    fn stubborn_streaming() -> (DeviceSession, Refusals) {
        let refusals = Refusals::default();
        let transport = Stubborn {
            inner: SimTransport::new(vec![SimCameraConfig::default()]),
            refusals: refusals.clone(),
        };
        let mut session = DeviceSession::open(
            Box::new(transport),
            &DeviceSelector::Index(0),
            SessionOptions::default(),
        )
        .unwrap();
        session.configure(64, 48, PixelFormat::Mono8, 30.0).unwrap();
        session.start_acquisition().unwrap();
        (session, refusals)
    }

    /// Reports out-of-range geometry, as a misbehaving device might
    struct OutOfRange;

    impl Connection for OutOfRange {
        fn get_feature(&self, name: &str) -> Result<FeatureValue, CameraError> {
            match name {
                features::WIDTH => Ok(FeatureValue::Int(-5)),
                features::HEIGHT => Ok(FeatureValue::Int(1 << 40)),
                features::PIXEL_FORMAT => Ok(FeatureValue::Enum("Mono8".into())),
                features::FRAME_RATE => Ok(FeatureValue::Float(30.0)),
                other => Err(CameraError::FeatureUnsupported(other.to_string())),
            }
        }

        fn set_feature(&mut self, name: &str, _value: FeatureValue) -> Result<(), CameraError> {
            Err(CameraError::FeatureUnsupported(name.to_string()))
        }

        fn feature_options(&self, name: &str) -> Result<Vec<String>, CameraError> {
            Err(CameraError::FeatureUnsupported(name.to_string()))
        }

        fn execute(&mut self, command: &str) -> Result<(), CameraError> {
            Err(CameraError::FeatureUnsupported(command.to_string()))
        }

        fn payload_size(&self) -> Result<usize, CameraError> {
            Ok(0)
        }

        fn create_stream(&mut self) -> Result<Box<dyn StreamChannel>, CameraError> {
            Err(CameraError::FeatureUnsupported("stream".into()))
        }
    }

    #[test]
    fn connect_reads_device_settings() {
        let session = connected();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.resolution(), (1920, 1200));
        assert_eq!(session.settings().unwrap().pixel_format, PixelFormat::Mono8);
    }

    #[test]
    fn second_connect_is_rejected_without_side_effects() {
        let mut session = connected();
        let descriptor = session.descriptor().cloned().unwrap();
        assert!(matches!(
            session.connect(descriptor.clone()),
            Err(CameraError::AlreadyConnected(_))
        ));
        assert_eq!(session.descriptor(), Some(&descriptor));
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn operations_before_connect_report_not_connected() {
        let mut session = DeviceSession::new(sim(vec![]), SessionOptions::default());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(matches!(
            session.configure(640, 480, PixelFormat::Mono8, 30.0),
            Err(CameraError::NotConnected)
        ));
        assert!(matches!(
            session.start_acquisition(),
            Err(CameraError::NotConnected)
        ));
    }

    #[test]
    fn unadvertised_format_is_refused_before_touching_the_device() {
        let mut session = connected();
        let before = session.settings().cloned();
        let err = session
            .configure(640, 480, PixelFormat::Yuv422Packed, 30.0)
            .unwrap_err();
        assert!(matches!(err, CameraError::UnsupportedFormat(PixelFormat::Yuv422Packed)));
        assert_eq!(session.settings().cloned(), before);
    }

    #[test]
    fn rejected_setting_rolls_back_earlier_ones() {
        let mut session = connected();
        let err = session
            .configure(640, 480, PixelFormat::Rgb8, 500.0)
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidFeatureValue { .. }));
        assert_eq!(session.resolution(), (1920, 1200));
        let width = session
            .connection()
            .unwrap()
            .get_feature(features::WIDTH)
            .unwrap();
        assert_eq!(width, FeatureValue::Int(1920));
    }

    #[test]
    fn configure_while_streaming_restarts_acquisition() {
        let mut session = connected();
        session.configure(64, 48, PixelFormat::Mono8, 30.0).unwrap();
        session.start_acquisition().unwrap();

        session.configure(32, 24, PixelFormat::Rgb8, 30.0).unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.buffer_pool().unwrap().buffer_size(), 32 * 24 * 3);

        let frame = session.grab(Duration::from_secs(1)).unwrap();
        assert_eq!((frame.width, frame.height), (32, 24));
    }

    #[test]
    fn failed_configure_still_resumes_streaming() {
        let mut session = connected();
        session.configure(64, 48, PixelFormat::Mono8, 30.0).unwrap();
        session.start_acquisition().unwrap();

        assert!(session.configure(64, 48, PixelFormat::Mono8, -1.0).is_err());
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(session.grab(Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn refused_stop_leaves_the_session_streaming() {
        let (mut session, refusals) = stubborn_streaming();
        refusals.stop.store(true, Ordering::SeqCst);

        let err = session
            .configure(32, 24, PixelFormat::Rgb8, 30.0)
            .unwrap_err();
        assert!(matches!(err, CameraError::Transport(_)));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.resolution(), (64, 48));

        let frame = session.grab(Duration::from_secs(1)).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
    }

    #[test]
    fn refused_restart_puts_the_previous_settings_back() {
        let (mut session, refusals) = stubborn_streaming();
        refusals.starts.store(1, Ordering::SeqCst);

        let err = session
            .configure(32, 24, PixelFormat::Rgb8, 30.0)
            .unwrap_err();
        assert!(matches!(err, CameraError::Transport(_)));
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.resolution(), (64, 48));
        assert_eq!(session.settings().unwrap().pixel_format, PixelFormat::Mono8);

        let frame = session.grab(Duration::from_secs(1)).unwrap();
        assert_eq!((frame.width, frame.height), (64, 48));
    }

    #[test]
    fn out_of_range_geometry_reads_as_zero() {
        let settings = read_settings(&OutOfRange);
        assert_eq!((settings.width, settings.height), (0, 0));
        assert_eq!(settings.pixel_format, PixelFormat::Mono8);
        assert_eq!(settings.frame_rate, 30.0);
    }

    #[test]
    fn start_twice_fails_and_stop_is_idempotent() {
        let mut session = connected();
        session.configure(64, 48, PixelFormat::Mono8, 30.0).unwrap();

        session.stop_acquisition().unwrap();
        assert_eq!(session.acquisition_state(), AcquisitionState::Idle);

        session.start_acquisition().unwrap();
        assert!(matches!(
            session.start_acquisition(),
            Err(CameraError::Acquisition(AcquisitionFault::AlreadyStreaming))
        ));
        assert_eq!(session.acquisition_state(), AcquisitionState::Streaming);
    }

    #[test]
    fn closed_session_rejects_everything() {
        let mut session = connected();
        session.disconnect().unwrap();
        assert_eq!(session.state(), SessionState::Closed);

        assert!(matches!(session.disconnect(), Err(CameraError::SessionClosed)));
        assert!(matches!(session.start_acquisition(), Err(CameraError::SessionClosed)));
        assert!(matches!(session.stop_acquisition(), Err(CameraError::SessionClosed)));
        assert!(matches!(
            session.grab(Duration::from_millis(1)),
            Err(CameraError::SessionClosed)
        ));
        assert!(matches!(
            session.configure(64, 48, PixelFormat::Mono8, 30.0),
            Err(CameraError::SessionClosed)
        ));
    }

    #[test]
    fn disconnect_while_streaming_stops_first() {
        let mut session = connected();
        session.configure(64, 48, PixelFormat::Mono8, 30.0).unwrap();
        session.start_acquisition().unwrap();
        session.disconnect().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.buffer_pool().is_none());
    }
}
