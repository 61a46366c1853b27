//! Borderless fullscreen window on an X11 or Wayland session.
//!
//! The event loop is pumped from the playback thread instead of owning it, so the
//! loop keeps its own cadence. winit allows one event loop per process; a second
//! attempt after a failure reports the error instead of retrying.

use std::num::NonZeroU32;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use softbuffer::{Context, Surface};
use tracing::{info, warn};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Fullscreen, Window, WindowAttributes, WindowId};

use super::probe::ProbeRequest;
use super::{BackendKind, DisplayBackend};
use crate::events::InputEvent;
use crate::render::pixels::PixelBuffer;

type WindowSurface = Surface<Rc<Window>, Rc<Window>>;

struct WindowState {
    attributes: Option<WindowAttributes>,
    hide_cursor: bool,
    window: Option<Rc<Window>>,
    surface: Option<WindowSurface>,
    init_error: Option<String>,
    size: PhysicalSize<u32>,
    input: Vec<InputEvent>,
    close_requested: bool,
}

impl WindowState {
    fn create(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let Some(attributes) = self.attributes.take() else {
            return Ok(());
        };
        let window = Rc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );
        window.set_fullscreen(Some(Fullscreen::Borderless(None)));
        window.set_cursor_visible(!self.hide_cursor);
        let context = Context::new(Rc::clone(&window))
            .map_err(|err| anyhow!("failed to create softbuffer context: {err}"))?;
        let surface = Surface::new(&context, Rc::clone(&window))
            .map_err(|err| anyhow!("failed to create softbuffer surface: {err}"))?;
        // Borderless fullscreen covers the monitor; the inner size may lag behind it.
        self.size = window
            .current_monitor()
            .map(|monitor| monitor.size())
            .filter(|size| size.width > 0 && size.height > 0)
            .unwrap_or_else(|| window.inner_size());
        self.window = Some(window);
        self.surface = Some(surface);
        Ok(())
    }
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(err) = self.create(event_loop) {
            self.init_error = Some(format!("{err:#}"));
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.close_requested = true;
                self.input.push(InputEvent::Quit);
            }
            WindowEvent::Resized(size) => self.size = size,
            WindowEvent::KeyboardInput { event, .. } if event.state == ElementState::Pressed => {
                if event.repeat {
                    return;
                }
                if let Some(intent) = map_logical_key(&event.logical_key) {
                    self.input.push(intent);
                }
            }
            _ => {}
        }
    }
}

pub fn map_logical_key(key: &Key) -> Option<InputEvent> {
    match key {
        Key::Named(NamedKey::Escape) => Some(InputEvent::Quit),
        Key::Named(NamedKey::Space) => Some(InputEvent::Skip),
        Key::Named(NamedKey::Enter) => Some(InputEvent::Retry),
        Key::Character(c) if c.eq_ignore_ascii_case("q") => Some(InputEvent::Quit),
        Key::Character(c) if c.eq_ignore_ascii_case("r") => Some(InputEvent::Retry),
        Key::Character(c) if c.as_str() == " " => Some(InputEvent::Skip),
        _ => None,
    }
}

/// The compositor renders at the window's real size; the request only seeds it.
fn window_size(requested: (u32, u32), actual: PhysicalSize<u32>) -> (u32, u32) {
    if actual.width == 0 || actual.height == 0 {
        return requested;
    }
    (actual.width, actual.height)
}

pub struct WindowedBackend {
    event_loop: EventLoop<()>,
    state: WindowState,
    size: (u32, u32),
}

impl std::fmt::Debug for WindowedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedBackend")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl WindowedBackend {
    pub fn open(request: &ProbeRequest) -> Result<Self> {
        let mut event_loop = EventLoop::new().context("failed to create windowing event loop")?;
        let attributes = Window::default_attributes()
            .with_title("Signage Display")
            .with_decorations(false)
            .with_resizable(false)
            .with_inner_size(PhysicalSize::new(request.size.0, request.size.1))
            .with_fullscreen(Some(Fullscreen::Borderless(None)))
            .with_active(true);
        let mut state = WindowState {
            attributes: Some(attributes),
            hide_cursor: request.hide_cursor,
            window: None,
            surface: None,
            init_error: None,
            size: PhysicalSize::new(request.size.0, request.size.1),
            input: Vec::new(),
            close_requested: false,
        };
        // Window creation happens in `resumed`; pump until it ran or failed.
        for _ in 0..50 {
            if let PumpStatus::Exit(code) =
                event_loop.pump_app_events(Some(Duration::from_millis(20)), &mut state)
            {
                bail!("event loop exited during startup (code {code})");
            }
            if let Some(err) = state.init_error.take() {
                bail!(err);
            }
            if state.surface.is_some() {
                break;
            }
        }
        if state.surface.is_none() {
            bail!("window was not created within one second");
        }
        let size = window_size(request.size, state.size);
        if size != request.size {
            warn!(
                requested = ?request.size,
                actual = ?size,
                "fullscreen window differs from the detected resolution"
            );
        }
        info!(
            width = size.0,
            height = size.1,
            cursor_hidden = request.hide_cursor,
            "windowed output ready"
        );
        Ok(Self {
            event_loop,
            state,
            size,
        })
    }

    fn pump(&mut self) {
        if let PumpStatus::Exit(code) =
            self.event_loop.pump_app_events(Some(Duration::ZERO), &mut self.state)
        {
            warn!(code, "window event loop exited");
            self.state.close_requested = true;
        }
    }
}

impl DisplayBackend for WindowedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Windowed
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&mut self, frame: &PixelBuffer) -> Result<()> {
        self.pump();
        if self.state.close_requested {
            bail!("window was closed");
        }
        let size = self.state.size;
        let Some(surface) = self.state.surface.as_mut() else {
            bail!("window surface is gone");
        };
        let (Some(width), Some(height)) = (
            NonZeroU32::new(size.width.max(1)),
            NonZeroU32::new(size.height.max(1)),
        ) else {
            return Ok(());
        };
        surface
            .resize(width, height)
            .map_err(|err| anyhow!("failed to resize surface: {err}"))?;
        let mut buffer = surface
            .buffer_mut()
            .map_err(|err| anyhow!("failed to map surface buffer: {err}"))?;
        buffer.fill(0);
        // The compositor renders at the probed size; clip or pad to the live window.
        let cols = frame.width().min(size.width) as usize;
        let rows = frame.height().min(size.height);
        for y in 0..rows {
            let src = (y * frame.width()) as usize;
            let dst = (y * size.width) as usize;
            buffer[dst..dst + cols].copy_from_slice(&frame.pixels()[src..src + cols]);
        }
        buffer
            .present()
            .map_err(|err| anyhow!("failed to present surface: {err}"))
    }

    fn poll_input(&mut self) -> Vec<InputEvent> {
        self.pump();
        std::mem::take(&mut self.state.input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_keys_map_to_intents() {
        assert_eq!(
            map_logical_key(&Key::Named(NamedKey::Escape)),
            Some(InputEvent::Quit)
        );
        assert_eq!(
            map_logical_key(&Key::Named(NamedKey::Space)),
            Some(InputEvent::Skip)
        );
        assert_eq!(
            map_logical_key(&Key::Character("Q".into())),
            Some(InputEvent::Quit)
        );
        assert_eq!(
            map_logical_key(&Key::Character("r".into())),
            Some(InputEvent::Retry)
        );
        assert_eq!(map_logical_key(&Key::Character("x".into())), None);
    }

    #[test]
    fn reports_the_real_window_size() {
        assert_eq!(
            window_size((3840, 2160), PhysicalSize::new(1920, 1080)),
            (1920, 1080)
        );
        assert_eq!(window_size((1280, 720), PhysicalSize::new(0, 0)), (1280, 720));
    }
}
