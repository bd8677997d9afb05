pub mod preview;

#[cfg(feature = "viewer")]
pub mod sdl;

pub use preview::PreviewSink;

#[cfg(feature = "viewer")]
pub use sdl::Sdl2Display;
