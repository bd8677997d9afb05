//! Lock-free SPSC ring buffer for handing frames to a slower reader

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::capture::frame::DecodedFrame;

#[derive(Debug, Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Writing half, lives on the acquisition loop
pub struct FrameWriter {
    ring: HeapProd<DecodedFrame>,
    stats: Arc<CachePadded<Stats>>,
}

/// Reading half, lives wherever frames are shown or stored
pub struct FrameReader {
    ring: HeapCons<DecodedFrame>,
    stats: Arc<CachePadded<Stats>>,
}

pub fn frame_ring(capacity: usize) -> (FrameWriter, FrameReader) {
    let (prod, cons) = HeapRb::<DecodedFrame>::new(capacity.max(1)).split();
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        FrameWriter {
            ring: prod,
            stats: stats.clone(),
        },
        FrameReader { ring: cons, stats },
    )
}

impl FrameWriter {
    /// Never blocks. A full ring drops the new frame and returns `false`.
    pub fn push(&mut self, frame: DecodedFrame) -> bool {
        if self.ring.try_push(frame).is_err() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl FrameReader {
    pub fn pop(&mut self) -> Option<DecodedFrame> {
        let frame = self.ring.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Drain the ring and keep only the newest frame
    pub fn latest(&mut self) -> Option<DecodedFrame> {
        let mut newest = None;
        while let Some(frame) = self.pop() {
            newest = Some(frame);
        }
        newest
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// (written, read, dropped)
    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.frames_written.load(Ordering::Relaxed),
            self.stats.frames_read.load(Ordering::Relaxed),
            self.stats.frames_dropped.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::FrameLayout;

    fn frame(sequence: u64) -> DecodedFrame {
        DecodedFrame {
            width: 1,
            height: 1,
            layout: FrameLayout::Rgb8,
            data: Bytes::from_static(&[0, 0, 0]),
            sequence,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn full_ring_drops_new_frames() {
        let (mut writer, mut reader) = frame_ring(2);
        assert!(writer.push(frame(0)));
        assert!(writer.push(frame(1)));
        assert!(!writer.push(frame(2)));

        assert_eq!(reader.len(), 2);
        assert_eq!(reader.pop().map(|f| f.sequence), Some(0));
        assert_eq!(reader.stats(), (2, 1, 1));
    }

    #[test]
    fn latest_skips_to_newest() {
        let (mut writer, mut reader) = frame_ring(4);
        for i in 0..3 {
            writer.push(frame(i));
        }
        assert_eq!(reader.latest().map(|f| f.sequence), Some(2));
        assert!(reader.is_empty());
    }
}
