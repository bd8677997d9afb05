//! Stream engine: sole owner of the transport stream and its buffer ring

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, trace, warn};

use super::decoder;
use super::frame::{DecodedFrame, PixelFormat};
use super::pool::BufferPool;
use crate::error::{AcquisitionFault, CameraError};
use crate::pipeline::stats::{FpsWindow, StreamStats};
use crate::transport::{BufferStatus, HardwareBuffer, StreamChannel};

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Geometry used when a buffer carries no image info of its own
#[derive(Debug, Clone, PartialEq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Outcome of draining the ring on stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub reclaimed: usize,
    /// Buffers the transport never returned within the wait
    pub abandoned: usize,
}

pub struct StreamEngine {
    stream: Box<dyn StreamChannel>,
    pool: BufferPool,
    geometry: FrameGeometry,
    stats: Arc<StreamStats>,
    fps: FpsWindow,
    sequence: u64,
}

impl StreamEngine {
    /// Allocate the ring and queue every buffer on `stream`.
    ///
    /// Must run before the device is told to start, or the first frames
    /// have nowhere to land.
    #[instrument(skip(stream, stats))]
    pub fn start(
        mut stream: Box<dyn StreamChannel>,
        pool_size: usize,
        payload_size: usize,
        geometry: FrameGeometry,
        stats: Arc<StreamStats>,
    ) -> Result<Self, CameraError> {
        if pool_size == 0 || payload_size == 0 {
            return Err(CameraError::Transport(format!(
                "cannot stream with {} buffers of {} bytes",
                pool_size, payload_size
            )));
        }

        let (mut pool, buffers) = BufferPool::allocate(pool_size, payload_size);
        for buffer in buffers {
            pool.check_in(buffer.id())
                .map_err(|e| CameraError::Transport(e.to_string()))?;
            stream.enqueue(buffer);
        }

        info!(
            "Stream engine queued {} buffers of {} bytes",
            pool_size, payload_size
        );

        Ok(Self {
            stream,
            pool,
            geometry,
            stats,
            fps: FpsWindow::default(),
            sequence: 0,
        })
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Wait up to `timeout` for one frame.
    ///
    /// Whatever happens the dequeued buffer is back on the stream before
    /// this returns.
    pub fn grab(&mut self, timeout: Duration) -> Result<DecodedFrame, CameraError> {
        let buffer = match self.stream.dequeue(timeout) {
            Ok(buffer) => buffer,
            Err(e @ CameraError::Timeout(_)) => {
                self.stats.record_timeout();
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.pool.check_out(buffer.id()) {
            // Leftover from a previous ring: let it go
            warn!("Discarding dequeued buffer: {}", e);
            self.stats.record_dropped();
            return Err(CameraError::Acquisition(AcquisitionFault::Buffer(
                BufferStatus::Aborted,
            )));
        }

        let status = buffer.status();
        if status != BufferStatus::Success {
            self.requeue(buffer);
            self.stats.record_dropped();
            trace!(?status, "Buffer failed");
            return Err(CameraError::Acquisition(AcquisitionFault::Buffer(status)));
        }

        let decode_start = Instant::now();
        let decoded = self.decode(&buffer);
        self.requeue(buffer);
        metrics::histogram!("gigecast_decode_time_us")
            .record(decode_start.elapsed().as_micros() as f64);

        match decoded {
            Ok(frame) => {
                self.sequence += 1;
                let fps = self.fps.tick(frame.timestamp);
                self.stats.record_delivered(fps);
                Ok(frame)
            }
            Err(e) => {
                self.stats.record_dropped();
                Err(e)
            }
        }
    }

    fn decode(&self, buffer: &HardwareBuffer) -> Result<DecodedFrame, CameraError> {
        let (width, height, format) = match buffer.image_info() {
            Some(info) => (info.width, info.height, &info.pixel_format),
            None => (
                self.geometry.width,
                self.geometry.height,
                &self.geometry.pixel_format,
            ),
        };
        decoder::decode_frame(buffer.payload(), width, height, format, self.sequence)
    }

    fn requeue(&mut self, mut buffer: HardwareBuffer) {
        match self.pool.check_in(buffer.id()) {
            Ok(()) => {
                buffer.recycle();
                self.stream.enqueue(buffer);
            }
            Err(e) => warn!("Refusing to queue buffer: {}", e),
        }
    }

    /// Take every buffer back from the transport, waiting at most `wait`,
    /// then release the ring. Call after the device stopped acquiring.
    #[instrument(skip(self))]
    pub fn stop(mut self, wait: Duration) -> DrainReport {
        let deadline = Instant::now() + wait;

        loop {
            for buffer in self.stream.flush() {
                self.reclaim(buffer);
            }
            if self.pool.queued() == 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            if let Ok(buffer) = self.stream.dequeue(DRAIN_POLL.min(deadline - now)) {
                self.reclaim(buffer);
            }
        }

        let report = DrainReport {
            reclaimed: self.pool.held(),
            abandoned: self.pool.queued(),
        };
        if report.abandoned > 0 {
            warn!(
                "{} buffers still with the transport after {:?}; pool will be rebuilt",
                report.abandoned, wait
            );
        } else {
            debug!("Reclaimed all {} buffers", report.reclaimed);
        }
        report
    }

    fn reclaim(&mut self, buffer: HardwareBuffer) {
        if let Err(e) = self.pool.check_out(buffer.id()) {
            debug!("Dropping buffer during drain: {}", e);
        }
    }
}
