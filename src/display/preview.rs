//! Preview consumer feeding the frame ring a viewer reads from

use std::time::Instant;

use color_eyre::Result;
use tracing::trace;

use crate::capture::frame::DecodedFrame;
use crate::pipeline::ringbuf::{frame_ring, FrameReader, FrameWriter};
use crate::pipeline::FrameConsumer;

pub struct PreviewSink {
    writer: FrameWriter,
}

impl PreviewSink {
    /// Sink plus the reader half for the viewer
    pub fn new(ring_size: usize) -> (Self, FrameReader) {
        let (writer, reader) = frame_ring(ring_size);
        (Self { writer }, reader)
    }
}

impl FrameConsumer for PreviewSink {
    fn name(&self) -> &str {
        "preview"
    }

    fn on_frame(&mut self, frame: DecodedFrame, _timestamp: Instant) -> Result<()> {
        let sequence = frame.sequence;
        if !self.writer.push(frame) {
            trace!("Preview ring full, skipped frame {}", sequence);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::capture::frame::FrameLayout;

    #[test]
    fn viewer_sees_the_newest_frame() {
        let (mut sink, mut reader) = PreviewSink::new(2);
        for sequence in 0..3 {
            let frame = DecodedFrame {
                width: 1,
                height: 1,
                layout: FrameLayout::Rgb8,
                data: Bytes::from_static(&[9, 9, 9]),
                sequence,
                timestamp: Instant::now(),
            };
            sink.on_frame(frame, Instant::now()).unwrap();
        }
        // Frame 2 found the ring full
        assert_eq!(reader.latest().map(|f| f.sequence), Some(1));
        assert_eq!(reader.stats().2, 1);
    }
}
