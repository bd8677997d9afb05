pub mod decoder;
pub mod engine;
pub mod frame;
pub mod pool;
pub mod session;

pub use engine::{FrameGeometry, StreamEngine};
pub use frame::{DecodedFrame, FrameLayout, PixelFormat};
pub use pool::BufferPool;
pub use session::{AcquisitionSettings, AcquisitionState, DeviceSession, SessionOptions, SessionState};
