//! Frame pipeline: pulls frames from a source, normalizes them to RGB and
//! fans them out to consumers on the acquisition loop.

pub mod governor;
pub mod ringbuf;
pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::{debug, error, info, trace};

use crate::capture::decoder;
use crate::capture::frame::DecodedFrame;
use crate::error::CameraError;

pub use governor::RateGovernor;

pub const DEFAULT_GRAB_TIMEOUT: Duration = Duration::from_millis(1000);

/// Anything that can hand out decoded frames with a bounded wait
pub trait FrameSource {
    fn grab(&mut self, timeout: Duration) -> Result<DecodedFrame, CameraError>;
}

/// Receives every delivered frame, synchronously, on the acquisition loop.
///
/// Implementations must return quickly; slow work belongs on a queue of
/// the consumer's own.
pub trait FrameConsumer: Send {
    fn name(&self) -> &str;

    fn on_frame(&mut self, frame: DecodedFrame, timestamp: Instant) -> Result<()>;
}

/// Adapts a closure into a named [`FrameConsumer`]
pub struct FnConsumer<F> {
    name: String,
    f: F,
}

impl<F> FnConsumer<F>
where
    F: FnMut(DecodedFrame, Instant) -> Result<()> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> FrameConsumer for FnConsumer<F>
where
    F: FnMut(DecodedFrame, Instant) -> Result<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_frame(&mut self, frame: DecodedFrame, timestamp: Instant) -> Result<()> {
        (self.f)(frame, timestamp)
    }
}

/// Cooperative cancellation flag for a running pipeline.
///
/// Observed after every grab timeout and every delivered frame, so stopping
/// takes up to one grab timeout.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Result of one pass through the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Delivered,
    /// Timeout or a single bad frame; nothing was produced
    Skipped,
}

pub struct FramePipeline {
    consumers: Vec<Box<dyn FrameConsumer>>,
    grab_timeout: Duration,
    governor: Option<RateGovernor>,
    last_delivery: Option<Instant>,
    stop: StopHandle,
}

impl Default for FramePipeline {
    fn default() -> Self {
        Self::new(DEFAULT_GRAB_TIMEOUT)
    }
}

impl FramePipeline {
    pub fn new(grab_timeout: Duration) -> Self {
        Self {
            consumers: Vec::new(),
            grab_timeout,
            governor: None,
            last_delivery: None,
            stop: StopHandle::default(),
        }
    }

    pub fn with_governor(mut self, governor: RateGovernor) -> Self {
        self.governor = Some(governor);
        self
    }

    /// Consumers are called in registration order
    pub fn register(&mut self, consumer: impl FrameConsumer + 'static) {
        debug!("Registered consumer `{}`", consumer.name());
        self.consumers.push(Box::new(consumer));
    }

    pub fn register_fn<F>(&mut self, name: &str, f: F)
    where
        F: FnMut(DecodedFrame, Instant) -> Result<()> + Send + 'static,
    {
        self.register(FnConsumer::new(name, f));
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Grab once and, if a frame arrived, deliver it.
    ///
    /// With a governor, a delivery never starts sooner than one interval
    /// after the previous one, however long the grab waited.
    /// Transient errors are swallowed as [`Step::Skipped`]; anything else
    /// is returned.
    pub fn step(&mut self, source: &mut dyn FrameSource) -> Result<Step, CameraError> {
        let frame = match source.grab(self.grab_timeout) {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => {
                trace!("No frame this round: {}", e);
                return Ok(Step::Skipped);
            }
            Err(e) => return Err(e),
        };

        let frame = decoder::normalize(frame);

        if let (Some(governor), Some(previous)) = (&self.governor, self.last_delivery) {
            governor.pace(previous);
        }
        self.last_delivery = Some(Instant::now());
        self.dispatch(frame);
        Ok(Step::Delivered)
    }

    /// Run until stopped or the source fails for good; returns frames delivered
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<u64, CameraError> {
        info!(
            "Frame pipeline running with {} consumer(s)",
            self.consumers.len()
        );
        let mut delivered = 0u64;

        while !self.stop.is_stopped() {
            match self.step(source) {
                Ok(Step::Delivered) => delivered += 1,
                Ok(Step::Skipped) => {}
                Err(e) => {
                    error!("Frame pipeline aborted: {}", e);
                    return Err(e);
                }
            }
        }

        info!("Frame pipeline stopped after {} frames", delivered);
        Ok(delivered)
    }

    fn dispatch(&mut self, frame: DecodedFrame) {
        let timestamp = frame.timestamp;
        let Some((last, rest)) = self.consumers.split_last_mut() else {
            return;
        };

        for consumer in rest {
            deliver(consumer.as_mut(), frame.clone(), timestamp);
        }
        deliver(last.as_mut(), frame, timestamp);
    }
}

fn deliver(consumer: &mut dyn FrameConsumer, frame: DecodedFrame, timestamp: Instant) {
    if let Err(e) = consumer.on_frame(frame, timestamp) {
        metrics::counter!("gigecast_consumer_errors_total").increment(1);
        error!("Consumer `{}` failed: {:#}", consumer.name(), e);
    }
}
