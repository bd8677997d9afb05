use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// GenICam pixel format names as advertised by the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PixelFormat {
    Mono8,
    Mono16,
    BayerRG8,
    BayerGR8,
    BayerGB8,
    BayerBG8,
    Rgb8,
    Bgr8,
    Yuv422Packed,
    /// Anything the device advertises that we have no name for
    Other(String),
}

impl PixelFormat {
    pub fn name(&self) -> &str {
        match self {
            PixelFormat::Mono8 => "Mono8",
            PixelFormat::Mono16 => "Mono16",
            PixelFormat::BayerRG8 => "BayerRG8",
            PixelFormat::BayerGR8 => "BayerGR8",
            PixelFormat::BayerGB8 => "BayerGB8",
            PixelFormat::BayerBG8 => "BayerBG8",
            PixelFormat::Rgb8 => "RGB8",
            PixelFormat::Bgr8 => "BGR8",
            PixelFormat::Yuv422Packed => "YUV422_8",
            PixelFormat::Other(name) => name,
        }
    }

    /// Bytes per pixel in the raw payload, if known
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerRG8
            | PixelFormat::BayerGR8
            | PixelFormat::BayerGB8
            | PixelFormat::BayerBG8 => Some(1),
            PixelFormat::Mono16 | PixelFormat::Yuv422Packed => Some(2),
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => Some(3),
            PixelFormat::Other(_) => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Mono8" => PixelFormat::Mono8,
            "Mono16" => PixelFormat::Mono16,
            "BayerRG8" => PixelFormat::BayerRG8,
            "BayerGR8" => PixelFormat::BayerGR8,
            "BayerGB8" => PixelFormat::BayerGB8,
            "BayerBG8" => PixelFormat::BayerBG8,
            "RGB8" | "RGB8Packed" => PixelFormat::Rgb8,
            "BGR8" | "BGR8Packed" => PixelFormat::Bgr8,
            "YUV422_8" | "YUV422Packed" => PixelFormat::Yuv422Packed,
            other => PixelFormat::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PixelFormat> for String {
    fn from(format: PixelFormat) -> Self {
        format.name().to_string()
    }
}

/// Interleaved channel order of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameLayout {
    Rgb8,
    Bgr8,
    Gray8,
}

impl FrameLayout {
    pub fn channels(self) -> usize {
        match self {
            FrameLayout::Rgb8 | FrameLayout::Bgr8 => 3,
            FrameLayout::Gray8 => 1,
        }
    }
}

/// A frame copied out of a hardware buffer.
///
/// Owns its pixels; the buffer it came from may already be back in the
/// hardware queue. Cloning shares the pixel storage.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub layout: FrameLayout,
    pub data: Bytes,

    /// Monotonic per-stream counter
    pub sequence: u64,

    /// Host time the payload was decoded
    pub timestamp: Instant,
}

impl DecodedFrame {
    pub fn stride(&self) -> usize {
        self.width as usize * self.layout.channels()
    }

    pub fn expected_len(&self) -> usize {
        self.stride() * self.height as usize
    }
}
