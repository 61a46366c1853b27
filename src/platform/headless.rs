use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use super::{BackendKind, DisplayBackend};
use crate::events::InputEvent;
use crate::render::pixels::PixelBuffer;

#[derive(Debug, Default)]
struct HeadlessState {
    pending_input: VecDeque<InputEvent>,
    presented: u64,
    last_frame: Option<PixelBuffer>,
}

/// Output that keeps the last presented frame in memory.
#[derive(Debug)]
pub struct HeadlessBackend {
    size: (u32, u32),
    state: Arc<Mutex<HeadlessState>>,
}

/// Observer and input injector for a [`HeadlessBackend`] owned elsewhere.
#[derive(Debug, Clone)]
pub struct HeadlessHandle {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> (Self, HeadlessHandle) {
        let state = Arc::new(Mutex::new(HeadlessState::default()));
        let backend = Self {
            size: (width, height),
            state: Arc::clone(&state),
        };
        (backend, HeadlessHandle { state })
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DisplayBackend for HeadlessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Headless
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn present(&mut self, frame: &PixelBuffer) -> Result<()> {
        anyhow::ensure!(
            frame.size() == self.size,
            "frame {:?} does not match output {:?}",
            frame.size(),
            self.size
        );
        let mut state = self.lock();
        state.presented += 1;
        if let Some(last) = state.last_frame.as_mut() {
            last.pixels_mut().copy_from_slice(frame.pixels());
        } else {
            state.last_frame = Some(frame.clone());
        }
        Ok(())
    }

    fn poll_input(&mut self) -> Vec<InputEvent> {
        self.lock().pending_input.drain(..).collect()
    }
}

impl HeadlessHandle {
    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_input(&self, event: InputEvent) {
        self.lock().pending_input.push_back(event);
    }

    pub fn presented(&self) -> u64 {
        self.lock().presented
    }

    pub fn last_frame(&self) -> Option<PixelBuffer> {
        self.lock().last_frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::pixels::Color;

    #[test]
    fn records_frames_and_replays_input() {
        let (mut backend, handle) = HeadlessBackend::new(4, 2);
        handle.push_input(InputEvent::Skip);
        handle.push_input(InputEvent::Quit);
        assert_eq!(backend.poll_input(), vec![InputEvent::Skip, InputEvent::Quit]);
        assert!(backend.poll_input().is_empty());

        backend.present(&PixelBuffer::new(4, 2, Color::WHITE)).unwrap();
        assert_eq!(handle.presented(), 1);
        assert_eq!(handle.last_frame().unwrap().get(3, 1), Some(Color::WHITE.pack()));
        assert!(backend.present(&PixelBuffer::new(2, 2, Color::WHITE)).is_err());
    }
}
