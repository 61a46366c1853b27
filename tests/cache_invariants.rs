use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use signage_display::cache::media_cache::MediaCache;
use signage_display::cache::surface_pool::{FrameBuffer, SurfacePool};
use signage_display::config::ScaleMode;
use signage_display::render::pixels::{Color, PixelBuffer};

/// 4 bytes per pixel, so a `w × h` buffer costs `w * h * 4` bytes.
fn buffer(w: u32, h: u32) -> Arc<PixelBuffer> {
    Arc::new(PixelBuffer::new(w, h, Color::BLACK))
}

fn path(idx: usize) -> PathBuf {
    PathBuf::from(format!("/media/{idx:03}.jpg"))
}

#[test]
fn bounds_hold_after_every_put() {
    let cache = MediaCache::new(4, 10 * 10 * 4 * 3);
    let sizes = [(10, 10), (5, 5), (10, 10), (2, 8), (10, 10), (9, 9), (1, 1), (10, 10)];
    for (idx, (w, h)) in sizes.into_iter().cycle().take(40).enumerate() {
        cache.put(&path(idx), 64, 48, ScaleMode::Fit, buffer(w, h));
        let stats = cache.stats();
        assert!(stats.entries <= 4, "entries {} after put {idx}", stats.entries);
        assert!(stats.bytes <= 1200, "bytes {} after put {idx}", stats.bytes);
        assert_eq!(stats.bytes, cache.current_bytes());
    }
}

#[test]
fn evicts_in_strict_lru_order() {
    let cache = MediaCache::new(3, usize::MAX);
    for idx in 0..3 {
        cache.put(&path(idx), 64, 48, ScaleMode::Fit, buffer(2, 2));
    }
    // Touch 0 so 1 becomes the least recently used.
    assert!(cache.get(&path(0), 64, 48, ScaleMode::Fit).is_some());
    cache.put(&path(3), 64, 48, ScaleMode::Fit, buffer(2, 2));

    assert!(cache.get(&path(1), 64, 48, ScaleMode::Fit).is_none());
    for idx in [0, 2, 3] {
        assert!(cache.get(&path(idx), 64, 48, ScaleMode::Fit).is_some(), "lost {idx}");
    }
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn key_includes_target_size_and_mode() {
    let cache = MediaCache::new(8, usize::MAX);
    let p = Path::new("/media/a.jpg");
    cache.put(p, 64, 48, ScaleMode::Fit, buffer(64, 48));
    assert!(cache.get(p, 64, 48, ScaleMode::Fit).is_some());
    assert!(cache.get(p, 48, 64, ScaleMode::Fit).is_none());
    assert!(cache.get(p, 64, 48, ScaleMode::Fill).is_none());
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 2));
}

#[test]
fn oversized_buffers_are_not_cached() {
    let cache = MediaCache::new(8, 100);
    assert!(!cache.put(Path::new("/media/big.jpg"), 64, 48, ScaleMode::Fit, buffer(10, 10)));
    assert!(cache.is_empty());
    assert_eq!(cache.current_bytes(), 0);
}

#[test]
fn retain_paths_drops_deleted_files() {
    let cache = MediaCache::new(8, usize::MAX);
    for idx in 0..4 {
        cache.put(&path(idx), 64, 48, ScaleMode::Fit, buffer(1, 1));
    }
    let keep = [path(1), path(3)];
    let dropped = cache.retain_paths(|p| keep.iter().any(|k| k == p));
    assert_eq!(dropped, 2);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.current_bytes(), 2 * 4);
}

#[test]
fn concurrent_puts_respect_bounds() {
    let cache = Arc::new(MediaCache::new(5, 5 * 16 * 16 * 4));
    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for idx in 0..50 {
                    cache.put(&path(worker * 100 + idx), 64, 48, ScaleMode::Fit, buffer(16, 16));
                    let _ = cache.get(&path(worker * 100 + idx / 2), 64, 48, ScaleMode::Fit);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(cache.len() <= 5);
    assert!(cache.current_bytes() <= 5 * 16 * 16 * 4);
}

#[test]
fn pool_reuses_matching_sizes_only() {
    let pool = SurfacePool::new(2);
    let frame = pool.acquire_or_alloc(4, 2);
    assert_eq!(frame.byte_len(), FrameBuffer::frame_len(4, 2));
    assert!(pool.release(frame));
    assert!(pool.acquire(2, 4).is_none());
    let reused = pool.acquire(4, 2).expect("pooled frame");
    assert!(pool.is_empty());

    assert!(pool.release(reused));
    assert!(pool.release(FrameBuffer::new(4, 2)));
    assert!(!pool.release(FrameBuffer::new(4, 2)), "pool is at capacity");
    assert_eq!(pool.len(), 2);
    assert_eq!(pool.pooled_bytes(), 2 * 4 * 2 * 3);

    pool.retain_size(8, 8);
    assert!(pool.is_empty());
}
