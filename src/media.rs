//! The playback list: scanning the media directory and per-item metadata.

use std::collections::BinaryHeap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, ensure};
use chrono::{DateTime, Local};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::Configuration;
use crate::processing::loader::image_dimensions;
use crate::video::probe::probe_video;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

/// Length and modification time of a file at scan time.
///
/// Two scans that see the same stamp for a path are treated as the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStamp {
    pub len: u64,
    pub modified: Option<SystemTime>,
}

impl FileStamp {
    /// `None` when the file cannot be stat'ed.
    pub fn read(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// One playable file as seen by one scan. Metadata is derived on first use and memoised.
#[derive(Debug)]
pub struct MediaItem {
    path: PathBuf,
    kind: MediaKind,
    stamp: Option<FileStamp>,
    info: OnceLock<MediaInfo>,
}

impl MediaItem {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stamp = FileStamp::read(&path);
        Self::with_stamp(path, stamp)
    }

    pub fn with_stamp(path: impl Into<PathBuf>, stamp: Option<FileStamp>) -> Self {
        let path = path.into();
        let kind = if Configuration::is_video_path(&path) {
            MediaKind::Video
        } else {
            MediaKind::Image
        };
        Self {
            path,
            kind,
            stamp,
            info: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stamp(&self) -> Option<FileStamp> {
        self.stamp
    }

    /// Same path and a known, unchanged stamp.
    pub fn is_same_content(&self, other: &MediaItem) -> bool {
        self.path == other.path && self.stamp.is_some() && self.stamp == other.stamp
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    /// File metadata; videos are probed with `probe_timeout` the first time.
    pub fn info(&self, probe_timeout: Duration) -> &MediaInfo {
        self.info
            .get_or_init(|| MediaInfo::gather(&self.path, self.kind, probe_timeout))
    }
}

/// Display metadata for the overlay. Fields that could not be read stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub name: String,
    /// Upper-cased extension including the dot, e.g. `.JPG`.
    pub format: String,
    pub size_bytes: Option<u64>,
    pub modified: Option<DateTime<Local>>,
    pub dimensions: Option<(u32, u32)>,
    pub duration: Option<Duration>,
    pub fps: Option<f64>,
}

impl MediaInfo {
    fn gather(path: &Path, kind: MediaKind, probe_timeout: Duration) -> Self {
        let mut info = Self {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            format: path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy().to_uppercase()))
                .unwrap_or_default(),
            ..Self::default()
        };
        match std::fs::metadata(path) {
            Ok(meta) => {
                info.size_bytes = Some(meta.len());
                info.modified = meta.modified().ok().map(DateTime::<Local>::from);
            }
            Err(err) => debug!(path = %path.display(), error = %err, "metadata unavailable"),
        }
        match kind {
            MediaKind::Image => info.dimensions = image_dimensions(path),
            MediaKind::Video => match probe_video(path, probe_timeout) {
                Ok(probe) => {
                    info.dimensions = Some((probe.width, probe.height));
                    info.duration = probe.duration;
                    info.fps = probe.fps;
                }
                Err(err) => debug!(path = %path.display(), error = %err, "video probe failed"),
            },
        }
        info
    }

    pub fn size_text(&self) -> String {
        self.size_bytes.map(format_size).unwrap_or_default()
    }

    pub fn modified_text(&self) -> String {
        self.modified
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    }

    pub fn dimensions_text(&self) -> String {
        self.dimensions
            .map(|(w, h)| format!("{w}x{h}"))
            .unwrap_or_default()
    }

    /// Left-hand overlay entries for a still image.
    pub fn image_summary(&self) -> Vec<String> {
        vec![
            format!("Name: {}", self.name),
            format!("Date: {}", self.modified_text()),
            format!("Size: {}", self.size_text()),
            format!("Format: {}", self.format),
            format!("Dim: {}", self.dimensions_text()),
        ]
    }

    /// Left-hand overlay entries while a video plays.
    pub fn video_summary(&self) -> Vec<String> {
        vec![format!("VIDEO: {}", self.name), self.dimensions_text()]
    }
}

/// `N B`, `N.N KB` or `N.N MB`.
pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    if bytes < KIB {
        format!("{bytes} B")
    } else if bytes < KIB * KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{:.1} MB", bytes as f64 / (KIB * KIB) as f64)
    }
}

/// `m:ss`, minutes unbounded.
pub fn format_clock(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Lists the direct children of `dir` with a supported extension, sorted by path.
///
/// At most `max_entries` matching files are kept: the first ones in path order.
pub fn scan_media_dir(
    dir: &Path,
    extensions: &[String],
    max_entries: usize,
) -> Result<Vec<MediaItem>> {
    ensure!(
        dir.is_dir(),
        "media directory {} does not exist or is not a directory",
        dir.display()
    );
    // Max-heap of the smallest paths seen so far, bounded at `max_entries`.
    let mut paths: BinaryHeap<PathBuf> = BinaryHeap::with_capacity(max_entries.min(1024) + 1);
    let mut truncated = false;
    let walker = WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || is_hidden(entry.path()) {
            continue;
        }
        if !is_supported(entry.path(), extensions) {
            continue;
        }
        paths.push(entry.into_path());
        if paths.len() > max_entries {
            paths.pop();
            truncated = true;
        }
    }
    if truncated {
        warn!(
            dir = %dir.display(),
            max_entries,
            "media directory scan truncated at the configured cap"
        );
    }
    let paths = paths.into_sorted_vec();
    debug!(dir = %dir.display(), count = paths.len(), "media scan complete");
    Ok(paths.into_iter().map(MediaItem::new).collect())
}

/// Scans the configured media directory.
pub fn scan_configured(config: &Configuration) -> Result<Vec<MediaItem>> {
    scan_media_dir(
        &config.media_dir,
        &config.supported_extensions,
        config.max_media_entries,
    )
    .with_context(|| format!("failed to scan {}", config.media_dir.display()))
}

pub fn is_supported(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 104_858), "5.1 MB");
    }

    #[test]
    fn clock_pads_seconds() {
        assert_eq!(format_clock(Duration::from_secs(0)), "0:00");
        assert_eq!(format_clock(Duration::from_secs(65)), "1:05");
        assert_eq!(format_clock(Duration::from_secs(3725)), "62:05");
    }

    #[test]
    fn kind_follows_extension() {
        assert_eq!(MediaItem::new("/m/a.MOV").kind(), MediaKind::Video);
        assert_eq!(MediaItem::new("/m/a.jpeg").kind(), MediaKind::Image);
    }

    #[test]
    fn info_reports_missing_file_fields_as_blank() {
        let item = MediaItem::new("/definitely/not/here.jpg");
        let info = item.info(Duration::from_secs(1));
        assert_eq!(info.name, "here.jpg");
        assert_eq!(info.format, ".JPG");
        assert_eq!(info.size_text(), "");
        assert_eq!(info.image_summary()[4], "Dim: ");
    }
}
