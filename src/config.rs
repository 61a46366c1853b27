use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;
use serde::de::{self, Deserializer};

pub use config_model::{ScheduleError, ScheduleWindow, TimeOfDay, WeekdaySet};

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "mp4", "avi", "mov", "mkv", "webm", "flv", "wmv",
    "m4v",
];

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm", "flv", "wmv", "m4v"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Flat directory holding the playback media (the sync target).
    pub media_dir: PathBuf,
    /// Upper bound on directory entries considered per scan.
    pub max_media_entries: usize,
    /// Extensions (without dot, any case) that make up the playlist.
    pub supported_extensions: Vec<String>,
    pub display: DisplaySettings,
    pub slideshow: SlideshowSettings,
    /// Optional weekly active window; the display never sleeps without one.
    pub schedule: Option<ScheduleWindow>,
    pub sync: SyncSettings,
    pub audio: AudioSettings,
    pub cache: CacheSettings,
    pub system: SystemSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("./photos"),
            max_media_entries: 10_000,
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            display: DisplaySettings::default(),
            slideshow: SlideshowSettings::default(),
            schedule: None,
            sync: SyncSettings::default(),
            audio: AudioSettings::default(),
            cache: CacheSettings::default(),
            system: SystemSettings::default(),
        }
    }
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(mut self) -> Result<Self> {
        ensure!(
            !self.media_dir.as_os_str().is_empty(),
            "media-dir must not be empty"
        );
        // Cache keys and rescans compare absolute paths.
        self.media_dir = std::fs::canonicalize(&self.media_dir)
            .or_else(|_| std::path::absolute(&self.media_dir))
            .with_context(|| format!("cannot resolve media-dir {}", self.media_dir.display()))?;
        ensure!(
            self.max_media_entries > 0,
            "max-media-entries must be greater than zero"
        );
        self.supported_extensions = self
            .supported_extensions
            .iter()
            .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        ensure!(
            !self.supported_extensions.is_empty(),
            "supported-extensions must list at least one extension"
        );
        self.display
            .validate()
            .context("invalid display configuration")?;
        self.slideshow
            .validate()
            .context("invalid slideshow configuration")?;
        if let Some(schedule) = self.schedule.as_ref()
            && schedule.enabled
        {
            schedule
                .validate()
                .context("invalid schedule configuration")?;
        }
        self.sync.validate().context("invalid sync configuration")?;
        self.audio.validate().context("invalid audio configuration")?;
        self.cache.validate().context("invalid cache configuration")?;
        self.system
            .validate()
            .context("invalid system configuration")?;
        Ok(self)
    }

    pub fn rotation(&self) -> RotationConfig {
        RotationConfig {
            degrees: self.display.rotation,
            mode: self.display.rotation_mode,
        }
    }

    /// The schedule window if one is configured and enabled.
    pub fn active_schedule(&self) -> Option<&ScheduleWindow> {
        self.schedule.as_ref().filter(|window| window.enabled)
    }

    /// Settings whose change invalidates every pre-scaled cache entry.
    pub fn scaling_signature(&self) -> (ScaleMode, [u8; 3], Option<[u32; 2]>) {
        (
            self.slideshow.scale_mode,
            self.display.background_color,
            self.display.resolution,
        )
    }

    pub fn is_video_path(path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| {
                let ext = ext.to_ascii_lowercase();
                VIDEO_EXTENSIONS.iter().any(|v| *v == ext)
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct DisplaySettings {
    pub background_color: [u8; 3],
    pub hide_cursor: bool,
    pub show_status_bar: bool,
    pub rotation: Rotation,
    pub rotation_mode: RotationMode,
    pub backend: BackendPreference,
    /// Overrides the platform-reported resolution.
    pub resolution: Option<[u32; 2]>,
    pub status_bar: StatusBarSettings,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            background_color: [0, 0, 0],
            hide_cursor: true,
            show_status_bar: true,
            rotation: Rotation::Deg0,
            rotation_mode: RotationMode::Software,
            backend: BackendPreference::Auto,
            resolution: None,
            status_bar: StatusBarSettings::default(),
        }
    }
}

impl DisplaySettings {
    fn validate(&self) -> Result<()> {
        if let Some([w, h]) = self.resolution {
            ensure!(
                w > 0 && h > 0,
                "display.resolution must have positive width and height"
            );
        }
        self.status_bar.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct StatusBarSettings {
    /// Background opacity of the bar (0 = invisible, 1 = opaque).
    pub opacity: f32,
    pub height: u32,
    pub font_size: f32,
    pub landscape: EdgeLayout,
    pub portrait: EdgeLayout,
}

impl Default for StatusBarSettings {
    fn default() -> Self {
        Self {
            opacity: 0.75,
            height: 30,
            font_size: 14.0,
            landscape: EdgeLayout::landscape_default(),
            portrait: EdgeLayout::portrait_default(),
        }
    }
}

impl StatusBarSettings {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.opacity.is_finite() && (0.0..=1.0).contains(&self.opacity),
            "display.status-bar.opacity must be within [0, 1]"
        );
        ensure!(
            self.height >= 8,
            "display.status-bar.height must be at least 8 pixels"
        );
        ensure!(
            self.font_size.is_finite() && self.font_size >= 6.0,
            "display.status-bar.font-size must be at least 6"
        );
        Ok(())
    }
}

/// Which screen edge hosts each overlay block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EdgeLayout {
    pub file_info: Edge,
    pub system_info: Edge,
    pub progress: Edge,
}

impl EdgeLayout {
    pub const fn landscape_default() -> Self {
        Self {
            file_info: Edge::Bottom,
            system_info: Edge::Bottom,
            progress: Edge::Bottom,
        }
    }

    pub const fn portrait_default() -> Self {
        Self {
            file_info: Edge::Top,
            system_info: Edge::Bottom,
            progress: Edge::Bottom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Top,
    Bottom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleMode {
    /// Letterbox inside the screen, preserving aspect ratio.
    #[default]
    Fit,
    /// Crop the source to the screen aspect ratio, then scale.
    Fill,
    /// Scale to the screen ignoring aspect ratio.
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn from_degrees(degrees: u16) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn is_portrait(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

impl<'de> Deserialize<'de> for Rotation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let degrees = u16::deserialize(deserializer)?;
        Self::from_degrees(degrees).ok_or_else(|| {
            de::Error::custom(format!(
                "rotation must be one of 0, 90, 180, 270 (got {degrees})"
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationMode {
    /// The output is already oriented by the platform; draw straight to it.
    Hardware,
    /// Draw into a virtual buffer and rotate on present.
    #[default]
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationConfig {
    pub degrees: Rotation,
    pub mode: RotationMode,
}

impl RotationConfig {
    /// Rotation the compositor must perform in software.
    pub fn software_rotation(&self) -> Rotation {
        match self.mode {
            RotationMode::Hardware => Rotation::Deg0,
            RotationMode::Software => self.degrees,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendPreference {
    #[default]
    Auto,
    Kms,
    Fbdev,
    Windowed,
    Headless,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SlideshowSettings {
    pub interval_seconds: u32,
    pub scale_mode: ScaleMode,
}

impl Default for SlideshowSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 10,
            scale_mode: ScaleMode::Fit,
        }
    }
}

impl SlideshowSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_seconds))
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=3600).contains(&self.interval_seconds),
            "slideshow.interval-seconds must be between 1 and 3600"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Sync collaborator command line; sync is disabled when absent.
    pub command: Option<Vec<String>>,
    pub check_interval_minutes: u32,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub sync_on_start: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            command: None,
            check_interval_minutes: 5,
            timeout: Duration::from_secs(600),
            sync_on_start: true,
        }
    }
}

impl SyncSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.check_interval_minutes) * 60)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            (1..=60).contains(&self.check_interval_minutes),
            "sync.check-interval-minutes must be between 1 and 60"
        );
        ensure!(
            self.timeout >= Duration::from_secs(1),
            "sync.timeout must be at least one second"
        );
        if let Some(command) = &self.command {
            ensure!(
                command.first().is_some_and(|program| !program.trim().is_empty()),
                "sync.command must name a program"
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioDevice {
    #[default]
    Hdmi,
    Local,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct AudioSettings {
    pub enabled: bool,
    pub device: AudioDevice,
    pub volume: u8,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            device: AudioDevice::Hdmi,
            volume: 80,
        }
    }
}

impl AudioSettings {
    fn validate(&self) -> Result<()> {
        ensure!(self.volume <= 100, "audio.volume must be between 0 and 100");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub max_bytes: usize,
    pub pool_capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_bytes: 100 * 1024 * 1024,
            pool_capacity: 3,
        }
    }
}

impl CacheSettings {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.max_entries > 0,
            "cache.max-entries must be greater than zero"
        );
        ensure!(
            self.max_bytes > 0,
            "cache.max-bytes must be greater than zero"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SystemSettings {
    pub paths: SystemPaths,
    pub timeouts: SystemTimeouts,
}

impl SystemSettings {
    fn validate(&self) -> Result<()> {
        for (label, path) in [
            ("framebuffer-device", &self.paths.framebuffer_device),
            ("x11-socket-dir", &self.paths.x11_socket_dir),
            ("sysfs-graphics", &self.paths.sysfs_graphics),
            ("sysfs-drm", &self.paths.sysfs_drm),
            ("proc-net-wireless", &self.paths.proc_net_wireless),
            ("input-dir", &self.paths.input_dir),
        ] {
            ensure!(
                !path.as_os_str().is_empty(),
                "system.paths.{} must not be empty",
                label
            );
        }
        for (label, timeout) in [
            ("quick", self.timeouts.quick),
            ("normal", self.timeouts.normal),
            ("long", self.timeouts.long),
        ] {
            ensure!(
                timeout >= Duration::from_secs(1) && timeout <= Duration::from_secs(600),
                "system.timeouts.{} must be between 1s and 600s",
                label
            );
        }
        Ok(())
    }
}

/// Platform locations probed at runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SystemPaths {
    pub framebuffer_device: PathBuf,
    pub x11_socket_dir: PathBuf,
    pub sysfs_graphics: PathBuf,
    pub sysfs_drm: PathBuf,
    pub proc_net_wireless: PathBuf,
    pub input_dir: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            framebuffer_device: PathBuf::from("/dev/fb0"),
            x11_socket_dir: PathBuf::from("/tmp/.X11-unix"),
            sysfs_graphics: PathBuf::from("/sys/class/graphics"),
            sysfs_drm: PathBuf::from("/sys/class/drm"),
            proc_net_wireless: PathBuf::from("/proc/net/wireless"),
            input_dir: PathBuf::from("/dev/input"),
        }
    }
}

/// Bounds for external-process interactions.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SystemTimeouts {
    /// Short probes such as the WiFi signal query.
    #[serde(with = "humantime_serde")]
    pub quick: Duration,
    /// Grace period before a child process is killed.
    #[serde(with = "humantime_serde")]
    pub normal: Duration,
    /// Slow startups (ffprobe, audio player).
    #[serde(with = "humantime_serde")]
    pub long: Duration,
}

impl Default for SystemTimeouts {
    fn default() -> Self {
        Self {
            quick: Duration::from_secs(1),
            normal: Duration::from_secs(2),
            long: Duration::from_secs(10),
        }
    }
}

/// Supplies the resolved, validated configuration to the display engine.
pub trait ConfigProvider: Send + Sync {
    fn current(&self) -> Arc<Configuration>;

    /// Re-reads the backing source. Sources without one return the current value.
    fn reload(&self) -> Result<Arc<Configuration>> {
        Ok(self.current())
    }
}

/// A configuration fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticConfig {
    inner: Arc<Configuration>,
}

impl StaticConfig {
    pub fn new(config: Configuration) -> Self {
        Self {
            inner: Arc::new(config),
        }
    }
}

impl ConfigProvider for StaticConfig {
    fn current(&self) -> Arc<Configuration> {
        Arc::clone(&self.inner)
    }
}

/// A configuration backed by a YAML file that can be re-read on request.
#[derive(Debug)]
pub struct FileConfig {
    path: PathBuf,
    media_dir_override: Option<PathBuf>,
    current: Mutex<Arc<Configuration>>,
}

impl FileConfig {
    pub fn load(path: impl Into<PathBuf>, media_dir_override: Option<PathBuf>) -> Result<Self> {
        let path = path.into();
        let config = Self::read(&path, media_dir_override.as_deref())?;
        Ok(Self {
            path,
            media_dir_override,
            current: Mutex::new(Arc::new(config)),
        })
    }

    fn read(path: &Path, media_dir_override: Option<&Path>) -> Result<Configuration> {
        let mut config = Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        if let Some(dir) = media_dir_override {
            config.media_dir = dir.to_path_buf();
        }
        config.validated().context("invalid configuration values")
    }
}

impl ConfigProvider for FileConfig {
    fn current(&self) -> Arc<Configuration> {
        match self.current.lock() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn reload(&self) -> Result<Arc<Configuration>> {
        let fresh = Arc::new(Self::read(&self.path, self.media_dir_override.as_deref())?);
        let mut guard = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::clone(&fresh);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_normalised() {
        let cfg = Configuration {
            supported_extensions: vec![".JPG".into(), " png ".into(), "".into()],
            ..Configuration::default()
        }
        .validated()
        .unwrap();
        assert_eq!(cfg.supported_extensions, vec!["jpg", "png"]);
    }

    #[test]
    fn media_dir_is_made_absolute() {
        let cfg = Configuration::default().validated().unwrap();
        assert!(cfg.media_dir.is_absolute());
        assert!(cfg.media_dir.ends_with("photos"));

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        let cfg = Configuration {
            media_dir: dir.path().join("real").join("..").join("real"),
            ..Configuration::default()
        }
        .validated()
        .unwrap();
        assert_eq!(cfg.media_dir, dir.path().join("real").canonicalize().unwrap());
    }

    #[test]
    fn hardware_mode_never_rotates_in_software() {
        let rotation = RotationConfig {
            degrees: Rotation::Deg90,
            mode: RotationMode::Hardware,
        };
        assert_eq!(rotation.software_rotation(), Rotation::Deg0);
        let rotation = RotationConfig {
            degrees: Rotation::Deg270,
            mode: RotationMode::Software,
        };
        assert_eq!(rotation.software_rotation(), Rotation::Deg270);
    }

    #[test]
    fn video_extension_detection_ignores_case() {
        assert!(Configuration::is_video_path(Path::new("/m/clip.MP4")));
        assert!(!Configuration::is_video_path(Path::new("/m/photo.jpg")));
        assert!(!Configuration::is_video_path(Path::new("/m/noext")));
    }

    #[test]
    fn file_config_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "slideshow:\n  interval-seconds: 5\n").unwrap();
        let provider = FileConfig::load(&path, Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(provider.current().slideshow.interval_seconds, 5);
        assert_eq!(provider.current().media_dir, dir.path().canonicalize().unwrap());

        std::fs::write(&path, "slideshow:\n  interval-seconds: 7\n  scale-mode: fill\n").unwrap();
        let fresh = provider.reload().unwrap();
        assert_eq!(fresh.slideshow.interval_seconds, 7);
        assert_eq!(fresh.slideshow.scale_mode, ScaleMode::Fill);
        assert_eq!(provider.current().slideshow.interval_seconds, 7);

        std::fs::write(&path, "slideshow:\n  interval-seconds: 0\n").unwrap();
        assert!(provider.reload().is_err());
        assert_eq!(provider.current().slideshow.interval_seconds, 7);
    }
}
