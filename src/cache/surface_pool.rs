use std::sync::{Mutex, MutexGuard};

/// Reusable RGB24 frame buffers for the video path, matched by exact size.
#[derive(Debug)]
pub struct SurfacePool {
    free: Mutex<Vec<FrameBuffer>>,
    capacity: usize,
}

/// One decoded video frame, tightly packed RGB24.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameBuffer {
    pub const BYTES_PER_PIXEL: usize = 3;

    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; Self::frame_len(width, height)],
        }
    }

    pub fn frame_len(width: u32, height: u32) -> usize {
        (width as usize) * (height as usize) * Self::BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl SurfacePool {
    pub const DEFAULT_CAPACITY: usize = 3;

    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FrameBuffer>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A pooled buffer of exactly `width × height`, if one is free.
    pub fn acquire(&self, width: u32, height: u32) -> Option<FrameBuffer> {
        let mut free = self.lock();
        let idx = free
            .iter()
            .position(|buf| buf.width == width && buf.height == height)?;
        Some(free.swap_remove(idx))
    }

    /// A pooled buffer when available, otherwise a fresh allocation.
    pub fn acquire_or_alloc(&self, width: u32, height: u32) -> FrameBuffer {
        self.acquire(width, height)
            .unwrap_or_else(|| FrameBuffer::new(width, height))
    }

    /// Returns `buffer` to the pool; it is dropped when the pool is full.
    pub fn release(&self, buffer: FrameBuffer) -> bool {
        let mut free = self.lock();
        if free.len() >= self.capacity {
            return false;
        }
        free.push(buffer);
        true
    }

    /// Drops pooled buffers whose size no longer matches the output.
    pub fn retain_size(&self, width: u32, height: u32) {
        self.lock()
            .retain(|buf| buf.width == width && buf.height == height);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pooled_bytes(&self) -> usize {
        self.lock().iter().map(FrameBuffer::byte_len).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SurfacePool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_matches_exact_size() {
        let pool = SurfacePool::new(3);
        assert!(pool.acquire(4, 4).is_none());
        pool.release(FrameBuffer::new(4, 4));
        assert!(pool.acquire(4, 5).is_none());
        let buf = pool.acquire(4, 4).unwrap();
        assert_eq!(buf.byte_len(), 48);
        assert!(pool.is_empty());
    }

    #[test]
    fn release_beyond_capacity_drops() {
        let pool = SurfacePool::new(3);
        for _ in 0..3 {
            assert!(pool.release(FrameBuffer::new(2, 2)));
        }
        assert!(!pool.release(FrameBuffer::new(2, 2)));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn retain_size_prunes_stale_buffers() {
        let pool = SurfacePool::new(3);
        pool.release(FrameBuffer::new(2, 2));
        pool.release(FrameBuffer::new(8, 8));
        pool.retain_size(8, 8);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.pooled_bytes(), 8 * 8 * 3);
    }
}
