//! Hand-off from the acquisition loop to an outbound video track.
//!
//! The loop side ([`PublisherSink`]) never blocks: when the queue is full the
//! frame is dropped and counted. The publishing side runs as a tokio task,
//! converts RGB to RGBA and paces delivery with the rate governor.

use std::time::{Duration, Instant};

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::capture::decoder;
use crate::capture::frame::{DecodedFrame, FrameLayout};
use crate::pipeline::stats::FpsWindow;
use crate::pipeline::{FrameConsumer, RateGovernor};

/// One RGBA frame as handed to a video source
#[derive(Debug, Clone)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
    pub sequence: u64,
    pub timestamp: Instant,
}

/// Outbound video source, e.g. a WebRTC track
pub trait VideoTrack: Send {
    fn name(&self) -> &str;

    fn capture_frame(&mut self, frame: RgbaFrame) -> Result<()>;
}

pub fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    rgba
}

/// Bounded queue between the acquisition loop and [`run_publisher`]
pub fn channel(depth: usize) -> (PublisherSink, PublisherFeed) {
    let (tx, rx) = flume::bounded(depth.max(1));
    (PublisherSink { tx, dropped: 0 }, PublisherFeed { rx })
}

pub struct PublisherSink {
    tx: Sender<DecodedFrame>,
    dropped: u64,
}

impl PublisherSink {
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameConsumer for PublisherSink {
    fn name(&self) -> &str {
        "publisher"
    }

    fn on_frame(&mut self, frame: DecodedFrame, _timestamp: Instant) -> Result<()> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                self.dropped += 1;
                metrics::counter!("gigecast_publisher_dropped_total").increment(1);
                debug!("Publisher queue full, dropped frame {}", frame.sequence);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(eyre!("publisher task has exited")),
        }
    }
}

pub struct PublisherFeed {
    rx: Receiver<DecodedFrame>,
}

/// Publish until every [`PublisherSink`] is gone; returns frames published
pub async fn run_publisher<T: VideoTrack>(
    feed: PublisherFeed,
    mut track: T,
    governor: Option<RateGovernor>,
) -> u64 {
    info!("Publishing to track `{}`", track.name());
    let mut published = 0u64;

    while let Ok(frame) = feed.rx.recv_async().await {
        let started = Instant::now();
        let frame = match frame.layout {
            FrameLayout::Rgb8 => frame,
            _ => decoder::normalize(frame),
        };

        let rgba = RgbaFrame {
            width: frame.width,
            height: frame.height,
            data: Bytes::from(rgb_to_rgba(&frame.data)),
            sequence: frame.sequence,
            timestamp: frame.timestamp,
        };

        match track.capture_frame(rgba) {
            Ok(()) => published += 1,
            Err(e) => warn!("Track `{}` rejected frame: {:#}", track.name(), e),
        }

        if let Some(governor) = &governor {
            governor.pace_async(started).await;
        }
    }

    info!("Publisher finished after {} frames", published);
    published
}

/// Track that only counts frames and logs the rate now and then
pub struct StatsTrack {
    name: String,
    frames: u64,
    fps: FpsWindow,
    log_every: Duration,
    last_log: Instant,
}

impl StatsTrack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            fps: FpsWindow::default(),
            log_every: Duration::from_secs(5),
            last_log: Instant::now(),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl VideoTrack for StatsTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn capture_frame(&mut self, frame: RgbaFrame) -> Result<()> {
        let expected = frame.width as usize * frame.height as usize * 4;
        if frame.data.len() != expected {
            return Err(eyre!(
                "frame {} has {} bytes, expected {}",
                frame.sequence,
                frame.data.len(),
                expected
            ));
        }

        self.frames += 1;
        let now = Instant::now();
        let fps = self.fps.tick(now);
        if now.duration_since(self.last_log) >= self.log_every {
            info!(track = %self.name, frames = self.frames, "Publishing at {:.1} FPS", fps);
            self.last_log = now;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn rgb_frame(sequence: u64) -> DecodedFrame {
        DecodedFrame {
            width: 2,
            height: 1,
            layout: FrameLayout::Rgb8,
            data: Bytes::from_static(&[1, 2, 3, 4, 5, 6]),
            sequence,
            timestamp: Instant::now(),
        }
    }

    struct Recording(Arc<Mutex<Vec<RgbaFrame>>>);

    impl VideoTrack for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn capture_frame(&mut self, frame: RgbaFrame) -> Result<()> {
            self.0.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[test]
    fn rgba_conversion_adds_opaque_alpha() {
        assert_eq!(rgb_to_rgba(&[1, 2, 3, 4, 5, 6]), vec![1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (mut sink, _feed) = channel(1);
        sink.on_frame(rgb_frame(0), Instant::now()).unwrap();
        sink.on_frame(rgb_frame(1), Instant::now()).unwrap();
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn sink_reports_a_gone_publisher() {
        let (mut sink, feed) = channel(1);
        drop(feed);
        assert!(sink.on_frame(rgb_frame(0), Instant::now()).is_err());
    }

    #[tokio::test]
    async fn publisher_converts_and_exits_when_the_sink_is_dropped() {
        let (mut sink, feed) = channel(4);
        sink.on_frame(rgb_frame(7), Instant::now()).unwrap();
        sink.on_frame(rgb_frame(8), Instant::now()).unwrap();
        drop(sink);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let published = run_publisher(feed, Recording(seen.clone()), None).await;

        assert_eq!(published, 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].sequence, 7);
        assert_eq!(&seen[1].data[..], &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[tokio::test]
    async fn publisher_is_paced() {
        let (mut sink, feed) = channel(4);
        for i in 0..3 {
            sink.on_frame(rgb_frame(i), Instant::now()).unwrap();
        }
        drop(sink);

        let started = Instant::now();
        let governor = RateGovernor::new(Duration::from_millis(20));
        let published = run_publisher(feed, StatsTrack::new("test"), Some(governor)).await;
        assert_eq!(published, 3);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }
}
