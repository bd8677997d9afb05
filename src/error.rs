//! Error types shared by the transport, capture and pipeline layers

use std::time::Duration;

use thiserror::Error;

use crate::capture::frame::PixelFormat;
use crate::transport::BufferStatus;

/// Every failure the acquisition core can report
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device unreachable or descriptor no longer valid
    #[error("connection error: {0}")]
    Connection(String),

    #[error("session is already connected to {0}")]
    AlreadyConnected(String),

    #[error("session is closed")]
    SessionClosed,

    #[error("session is not connected to a device")]
    NotConnected,

    #[error("feature `{0}` is not supported by the device")]
    FeatureUnsupported(String),

    #[error("feature `{0}` is read-only")]
    FeatureReadOnly(String),

    #[error("invalid value for feature `{name}`: {reason}")]
    InvalidFeatureValue { name: String, reason: String },

    /// Requested format is not in the device's advertised set
    #[error("pixel format {0} is not advertised by the device")]
    UnsupportedFormat(PixelFormat),

    /// Payload format the decoder cannot normalize
    #[error("cannot decode pixel format {0}")]
    UnsupportedPixelFormat(PixelFormat),

    #[error("payload of {actual} bytes is too short for the frame geometry ({expected} bytes)")]
    PayloadTooShort { expected: usize, actual: usize },

    #[error("acquisition error: {0}")]
    Acquisition(#[from] AcquisitionFault),

    /// No frame arrived within the bound. Expected, not fatal.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Detail carried by [`CameraError::Acquisition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquisitionFault {
    #[error("acquisition is not running")]
    NotStreaming,
    #[error("acquisition is already running")]
    AlreadyStreaming,
    #[error("hardware reported buffer status {0:?}")]
    Buffer(BufferStatus),
    #[error("stream channel closed")]
    StreamClosed,
}

impl CameraError {
    /// Per-frame failures that the acquisition loop absorbs as dropped frames.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CameraError::Timeout(_)
                | CameraError::Acquisition(AcquisitionFault::Buffer(_))
                | CameraError::UnsupportedPixelFormat(_)
                | CameraError::PayloadTooShort { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_frame_errors_are_transient() {
        assert!(CameraError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(CameraError::from(AcquisitionFault::Buffer(BufferStatus::Aborted)).is_transient());
        assert!(CameraError::UnsupportedPixelFormat(PixelFormat::Mono16).is_transient());
    }

    #[test]
    fn control_errors_are_fatal() {
        assert!(!CameraError::SessionClosed.is_transient());
        assert!(!CameraError::from(AcquisitionFault::NotStreaming).is_transient());
        assert!(!CameraError::Connection("unreachable".into()).is_transient());
    }
}
