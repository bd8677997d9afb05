use crate::capture::frame::PixelFormat;

/// Completion status the transport attaches to a dequeued buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferStatus {
    Success,
    /// Frame incomplete, e.g. missing packets
    Timeout,
    Aborted,
}

/// Slot of a buffer in the pool that allocated it.
///
/// `generation` changes every time a pool is rebuilt, so buffers left over
/// from an earlier pool are recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub generation: u32,
    pub index: usize,
}

/// Image geometry reported by the transport for a filled buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

/// Memory the hardware writes one frame into.
///
/// Not `Clone`: a buffer lives in exactly one place, either queued on the
/// stream channel or held by the stream engine.
#[derive(Debug)]
pub struct HardwareBuffer {
    id: BufferId,
    data: Box<[u8]>,
    len: usize,
    status: BufferStatus,
    image: Option<ImageInfo>,
}

impl HardwareBuffer {
    pub fn new(id: BufferId, capacity: usize) -> Self {
        Self {
            id,
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
            status: BufferStatus::Success,
            image: None,
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn status(&self) -> BufferStatus {
        self.status
    }

    pub fn image_info(&self) -> Option<&ImageInfo> {
        self.image.as_ref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Writable payload region of `len` bytes, or `None` if it exceeds capacity
    pub fn payload_mut(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.data.len() {
            return None;
        }
        self.len = len;
        Some(&mut self.data[..len])
    }

    /// Copy a complete payload in. Oversized payloads mark the buffer aborted.
    pub fn write_payload(&mut self, bytes: &[u8]) -> bool {
        match self.payload_mut(bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                self.status = BufferStatus::Success;
                true
            }
            None => {
                self.len = 0;
                self.status = BufferStatus::Aborted;
                false
            }
        }
    }

    pub fn set_status(&mut self, status: BufferStatus) {
        self.status = status;
    }

    pub fn set_image_info(&mut self, info: ImageInfo) {
        self.image = Some(info);
    }

    /// Clear the previous frame before the buffer goes back to the hardware
    pub(crate) fn recycle(&mut self) {
        self.len = 0;
        self.status = BufferStatus::Success;
        self.image = None;
    }
}
