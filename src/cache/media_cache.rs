//! Pre-scaled still images keyed by file, target size and scale mode.
//!
//! Bounded by entry count and by bytes. Eviction is least-recently-used by *access*:
//! a `get` hit moves the entry to the front, so items that keep coming around in the
//! slideshow survive while one-off items age out.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tracing::{debug, warn};

use crate::config::ScaleMode;
use crate::render::pixels::PixelBuffer;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub mode: ScaleMode,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, width: u32, height: u32, mode: ScaleMode) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            mode,
        }
    }
}

struct CacheEntry {
    buffer: Arc<PixelBuffer>,
    size_bytes: usize,
}

impl CacheEntry {
    fn new(buffer: Arc<PixelBuffer>) -> Self {
        let size_bytes =
            (buffer.width() as usize) * (buffer.height() as usize) * buffer.bytes_per_pixel();
        Self { buffer, size_bytes }
    }
}

struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    current_bytes: usize,
    stats: CacheStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct MediaCache {
    inner: Mutex<Inner>,
    max_entries: usize,
    max_bytes: usize,
}

impl std::fmt::Debug for MediaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCache")
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .field("stats", &self.stats())
            .finish()
    }
}

impl MediaCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                // Bounds are enforced by `put`, not by the LRU's own capacity.
                entries: LruCache::unbounded(),
                current_bytes: 0,
                stats: CacheStats::default(),
            }),
            max_entries: max_entries.max(1),
            max_bytes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        mode: ScaleMode,
    ) -> Option<Arc<PixelBuffer>> {
        let key = CacheKey::new(path, width, height, mode);
        let mut inner = self.lock();
        let hit = inner.entries.get(&key).map(|entry| Arc::clone(&entry.buffer));
        match hit {
            Some(buffer) => {
                inner.stats.hits += 1;
                Some(buffer)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts `buffer`, first evicting least-recently-used entries until both bounds hold.
    ///
    /// Returns `false` when the buffer alone exceeds the byte bound; such buffers are
    /// never cached.
    pub fn put(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        mode: ScaleMode,
        buffer: Arc<PixelBuffer>,
    ) -> bool {
        let key = CacheKey::new(path, width, height, mode);
        let entry = CacheEntry::new(buffer);
        let mut inner = self.lock();

        if let Some(previous) = inner.entries.pop(&key) {
            inner.current_bytes -= previous.size_bytes;
        }
        if entry.size_bytes > self.max_bytes {
            warn!(
                path = %path.display(),
                size_bytes = entry.size_bytes,
                max_bytes = self.max_bytes,
                "buffer larger than the cache byte bound; not cached"
            );
            return false;
        }

        while inner.entries.len() + 1 > self.max_entries
            || inner.current_bytes + entry.size_bytes > self.max_bytes
        {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.current_bytes -= evicted.size_bytes;
            inner.stats.evictions += 1;
            debug!(path = %evicted_key.path.display(), "evicted cached frame");
        }

        inner.current_bytes += entry.size_bytes;
        inner.entries.put(key, entry);
        true
    }

    /// Drops every entry, e.g. after a scale-affecting settings change.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.current_bytes = 0;
    }

    /// Drops entries whose source file is no longer part of the playback list.
    pub fn retain_paths(&self, keep: impl Fn(&Path) -> bool) -> usize {
        let mut inner = self.lock();
        let stale: Vec<CacheKey> = inner
            .entries
            .iter()
            .filter(|(key, _)| !keep(&key.path))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(entry) = inner.entries.pop(key) {
                inner.current_bytes -= entry.size_bytes;
            }
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_bytes(&self) -> usize {
        self.lock().current_bytes
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.current_bytes,
            ..inner.stats
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}
