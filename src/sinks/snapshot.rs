//! On-demand PNG snapshots of delivered frames

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, Sender};
use image::{ImageFormat, RgbImage};
use tracing::{error, info, warn};

use crate::capture::decoder;
use crate::capture::frame::{DecodedFrame, FrameLayout};
use crate::pipeline::FrameConsumer;

/// Requests a snapshot of the next delivered frame. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SnapshotTrigger {
    pending: Arc<AtomicUsize>,
}

impl SnapshotTrigger {
    pub fn request(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Requests not yet served
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Consumer that passes requested frames to a background writer thread
pub struct SnapshotSink {
    trigger: SnapshotTrigger,
    tx: Option<Sender<DecodedFrame>>,
    writer: Option<JoinHandle<()>>,
}

impl SnapshotSink {
    pub fn spawn(output_dir: impl Into<PathBuf>) -> Result<(Self, SnapshotTrigger)> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        let (tx, rx) = flume::unbounded();
        let writer = thread::Builder::new()
            .name("snapshot-writer".into())
            .spawn(move || write_loop(&output_dir, rx))?;

        let trigger = SnapshotTrigger::default();
        Ok((
            Self {
                trigger: trigger.clone(),
                tx: Some(tx),
                writer: Some(writer),
            },
            trigger,
        ))
    }
}

impl FrameConsumer for SnapshotSink {
    fn name(&self) -> &str {
        "snapshot"
    }

    fn on_frame(&mut self, frame: DecodedFrame, _timestamp: Instant) -> Result<()> {
        if !self.trigger.take() {
            return Ok(());
        }
        let tx = self.tx.as_ref().ok_or_else(|| eyre!("snapshot writer closed"))?;
        tx.send(frame).map_err(|_| eyre!("snapshot writer has exited"))
    }
}

impl Drop for SnapshotSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer finish what is queued
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("Snapshot writer panicked");
            }
        }
    }
}

fn write_loop(output_dir: &Path, rx: Receiver<DecodedFrame>) {
    for frame in rx.iter() {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = output_dir.join(format!("snapshot_{}_{}.png", frame.sequence, millis));

        match save_png(frame, &path) {
            Ok(()) => info!("Snapshot saved to {}", path.display()),
            Err(e) => error!("Failed to save snapshot {}: {:#}", path.display(), e),
        }
    }
}

/// Write a frame as an RGB PNG
pub fn save_png(frame: DecodedFrame, path: &Path) -> Result<()> {
    let frame = match frame.layout {
        FrameLayout::Rgb8 => frame,
        _ => decoder::normalize(frame),
    };
    let image = RgbImage::from_raw(frame.width, frame.height, frame.data.to_vec())
        .ok_or_else(|| eyre!("frame {} has a short buffer", frame.sequence))?;
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
