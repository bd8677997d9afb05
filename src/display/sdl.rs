//! SDL2 live viewer.
//! Shows the newest frame from the preview ring with the frame rate and
//! resolution in the title bar. Keys: `s` saves a snapshot, `f` toggles
//! fullscreen, Escape or closing the window stops the acquisition loop.

use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use sdl2::event::Event;
use sdl2::keyboard::Keycode;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{FullscreenType, Window, WindowContext};
use tracing::{debug, info};

use crate::capture::frame::{DecodedFrame, FrameLayout};
use crate::pipeline::ringbuf::FrameReader;
use crate::pipeline::stats::FpsWindow;
use crate::pipeline::StopHandle;
use crate::sinks::snapshot::SnapshotTrigger;

const IDLE_WAIT: Duration = Duration::from_millis(5);
const TITLE_REFRESH: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ViewerAction {
    Quit,
    Snapshot,
    ToggleFullscreen,
}

fn key_action(key: Keycode) -> Option<ViewerAction> {
    match key {
        Keycode::Escape => Some(ViewerAction::Quit),
        Keycode::S => Some(ViewerAction::Snapshot),
        Keycode::F => Some(ViewerAction::ToggleFullscreen),
        _ => None,
    }
}

fn overlay_title(width: u32, height: u32, fps: f64) -> String {
    format!("gigecast | {}x{} | {:.1} FPS", width, height, fps)
}

pub struct Sdl2Display {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    fps: FpsWindow,
    last_title: Option<Instant>,
}

impl Sdl2Display {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("gigecast", width, height)
            .position_centered()
            .resizable()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            fps: FpsWindow::default(),
            last_title: None,
        })
    }

    /// Frames are scaled to the window
    pub fn render_frame(&mut self, frame: &DecodedFrame) -> Result<()> {
        if frame.layout != FrameLayout::Rgb8 {
            return Err(eyre!("viewer expects RGB frames, got {:?}", frame.layout));
        }

        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::RGB24, frame.width, frame.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.data, frame.stride())
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        self.update_title(frame)
    }

    fn update_title(&mut self, frame: &DecodedFrame) -> Result<()> {
        let now = Instant::now();
        let fps = self.fps.tick(now);
        if self
            .last_title
            .is_some_and(|last| now.duration_since(last) < TITLE_REFRESH)
        {
            return Ok(());
        }
        self.last_title = Some(now);
        self.canvas
            .window_mut()
            .set_title(&overlay_title(frame.width, frame.height, fps))
            .map_err(|e| eyre!(e))
    }

    fn toggle_fullscreen(&mut self) -> Result<()> {
        let window = self.canvas.window_mut();
        let next = match window.fullscreen_state() {
            FullscreenType::Off => FullscreenType::Desktop,
            _ => FullscreenType::Off,
        };
        window.set_fullscreen(next).map_err(|e| eyre!(e))?;
        debug!(?next, "Viewer fullscreen changed");
        Ok(())
    }

    /// Runs on the main thread until the window closes or `stop` is raised
    pub fn run(
        &mut self,
        sdl_context: &sdl2::Sdl,
        mut frames: FrameReader,
        stop: StopHandle,
        snapshots: SnapshotTrigger,
    ) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: while !stop.is_stopped() {
            for event in event_pump.poll_iter() {
                let action = match event {
                    Event::Quit { .. } => Some(ViewerAction::Quit),
                    Event::KeyDown {
                        keycode: Some(key),
                        repeat: false,
                        ..
                    } => key_action(key),
                    _ => None,
                };
                match action {
                    Some(ViewerAction::Quit) => {
                        info!("Viewer closed");
                        break 'running;
                    }
                    Some(ViewerAction::Snapshot) => {
                        info!("Snapshot requested from viewer");
                        snapshots.request();
                    }
                    Some(ViewerAction::ToggleFullscreen) => self.toggle_fullscreen()?,
                    None => {}
                }
            }

            match frames.latest() {
                Some(frame) => self.render_frame(&frame)?,
                None => std::thread::sleep(IDLE_WAIT),
            }
        }

        let (written, read, dropped) = frames.stats();
        debug!(written, read, dropped, "Viewer ring stats");
        stop.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_keys_map_to_actions() {
        assert_eq!(key_action(Keycode::Escape), Some(ViewerAction::Quit));
        assert_eq!(key_action(Keycode::S), Some(ViewerAction::Snapshot));
        assert_eq!(key_action(Keycode::F), Some(ViewerAction::ToggleFullscreen));
        assert_eq!(key_action(Keycode::Q), None);
    }

    #[test]
    fn title_shows_resolution_and_rate() {
        assert_eq!(
            overlay_title(1280, 720, 29.97),
            "gigecast | 1280x720 | 30.0 FPS"
        );
    }

    #[test]
    fn snapshot_key_raises_the_trigger() {
        let trigger = SnapshotTrigger::default();
        let viewer_side = trigger.clone();
        if key_action(Keycode::S) == Some(ViewerAction::Snapshot) {
            viewer_side.request();
        }
        assert_eq!(trigger.pending(), 1);
    }
}
