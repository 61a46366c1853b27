//! Status bars with file, system and progress information.
//!
//! Each edge (top or bottom) hosts up to three blocks: file info on the left, system info
//! on the right and playback progress in the centre. Blocks are measured before drawing
//! and dropped by a fixed priority when they would collide: left always stays, then
//! right, then centre.

use std::time::Duration;

use chrono::{DateTime, Local};

use crate::config::{Edge, EdgeLayout, Rotation, StatusBarSettings};
use crate::media::format_clock;
use crate::render::pixels::{Color, PixelBuffer};
use crate::render::text::TextRenderer;

/// Distance between a block and the screen's side.
pub const EDGE_INSET: f32 = 10.0;
/// Gap between items of one block.
pub const ITEM_SPACING: f32 = 15.0;
/// Minimum clearance between blocks on one bar.
pub const COLLISION_MARGIN: f32 = 20.0;

const BAR_COLOR: Color = Color::from_rgb8([30, 30, 30]);
const TEXT_COLOR: Color = Color::from_rgb8([200, 200, 200]);
const BANNER_COLOR: Color = Color::from_rgb8([200, 30, 30]);

/// Width of rendered text; the real font in production, a fixed advance in tests.
pub trait TextMetrics {
    fn text_width(&self, text: &str, size: f32) -> f32;
}

impl TextMetrics for TextRenderer {
    fn text_width(&self, text: &str, size: f32) -> f32 {
        self.measure(text, size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
}

impl Orientation {
    pub fn from_rotation(rotation: Rotation) -> Self {
        if rotation.is_portrait() {
            Self::Portrait
        } else {
            Self::Landscape
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Left,
    Center,
    Right,
}

/// Texts to show this frame. Empty blocks are not drawn.
#[derive(Debug, Clone, Default)]
pub struct OverlayContent {
    pub file_info: Vec<String>,
    pub system_info: Vec<String>,
    pub progress: Option<String>,
}

/// A measured block at its final horizontal position.
#[derive(Debug, Clone)]
pub struct PlacedBlock {
    pub slot: Slot,
    pub left: f32,
    pub width: f32,
    /// Each item with its own left coordinate.
    pub items: Vec<(String, f32)>,
}

impl PlacedBlock {
    fn right(&self) -> f32 {
        self.left + self.width
    }

    fn collides_with(&self, other: &PlacedBlock) -> bool {
        self.left < other.right() + COLLISION_MARGIN && other.left < self.right() + COLLISION_MARGIN
    }
}

/// One bar and the blocks that survived collision checks.
#[derive(Debug, Clone)]
pub struct EdgeBar {
    pub edge: Edge,
    pub top: i32,
    pub height: u32,
    pub blocks: Vec<PlacedBlock>,
}

impl EdgeBar {
    pub fn block(&self, slot: Slot) -> Option<&PlacedBlock> {
        self.blocks.iter().find(|block| block.slot == slot)
    }
}

#[derive(Debug, Clone)]
pub struct StatusOverlay {
    settings: StatusBarSettings,
}

impl StatusOverlay {
    pub fn new(settings: StatusBarSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &StatusBarSettings {
        &self.settings
    }

    pub fn layout_for(&self, orientation: Orientation) -> EdgeLayout {
        match orientation {
            Orientation::Landscape => self.settings.landscape,
            Orientation::Portrait => self.settings.portrait,
        }
    }

    /// Measures and places every block on a `width`×`height` canvas.
    pub fn plan(
        &self,
        metrics: &dyn TextMetrics,
        content: &OverlayContent,
        orientation: Orientation,
        (width, height): (u32, u32),
    ) -> Vec<EdgeBar> {
        let layout = self.layout_for(orientation);
        let size = self.settings.font_size;
        let progress: Vec<String> = content.progress.iter().cloned().collect();
        let mut bars = Vec::new();
        for edge in [Edge::Top, Edge::Bottom] {
            let mut left = None;
            let mut center = None;
            let mut right = None;
            if layout.file_info == edge && !content.file_info.is_empty() {
                left = Some(measure_block(metrics, Slot::Left, &content.file_info, size, width));
            }
            if layout.system_info == edge && !content.system_info.is_empty() {
                right = Some(measure_block(
                    metrics,
                    Slot::Right,
                    &content.system_info,
                    size,
                    width,
                ));
            }
            if layout.progress == edge && !progress.is_empty() {
                center = Some(measure_block(metrics, Slot::Center, &progress, size, width));
            }
            if left.is_none() && center.is_none() && right.is_none() {
                continue;
            }
            resolve_collisions(&left, &mut center, &mut right);
            let bar_height = self.settings.height.min(height);
            let top = match edge {
                Edge::Top => 0,
                Edge::Bottom => height.saturating_sub(bar_height) as i32,
            };
            bars.push(EdgeBar {
                edge,
                top,
                height: bar_height,
                blocks: [left, center, right].into_iter().flatten().collect(),
            });
        }
        bars
    }

    /// Draws the bars onto `target`.
    pub fn render(
        &self,
        target: &mut PixelBuffer,
        text: &TextRenderer,
        content: &OverlayContent,
        orientation: Orientation,
    ) -> Vec<EdgeBar> {
        let bars = self.plan(text, content, orientation, target.size());
        let size = self.settings.font_size;
        let baseline_offset = (self.settings.height as f32 - text.line_height(size)) / 2.0
            + text.ascent(size);
        for bar in &bars {
            target.fill_rect(
                0,
                bar.top,
                target.width(),
                bar.height,
                BAR_COLOR.with_alpha(self.settings.opacity),
            );
            let baseline = bar.top as f32 + baseline_offset;
            for block in &bar.blocks {
                for (item, left) in &block.items {
                    text.draw(target, item, *left, baseline, size, TEXT_COLOR);
                }
            }
        }
        bars
    }

    /// Red banner for a failed sync, just inside any top bar.
    pub fn render_error_banner(
        &self,
        target: &mut PixelBuffer,
        text: &TextRenderer,
        message: &str,
        orientation: Orientation,
    ) {
        let top = if self.layout_for(orientation).file_info == Edge::Top {
            self.settings.height as i32
        } else {
            0
        };
        let size = self.settings.font_size;
        let height = self.settings.height;
        target.fill_rect(0, top, target.width(), height, BANNER_COLOR.with_alpha(0.9));
        let baseline =
            top as f32 + (height as f32 - text.line_height(size)) / 2.0 + text.ascent(size);
        text.draw_centered(target, message, baseline, size, Color::WHITE);
    }
}

fn measure_block(
    metrics: &dyn TextMetrics,
    slot: Slot,
    items: &[String],
    size: f32,
    canvas_width: u32,
) -> PlacedBlock {
    let widths: Vec<f32> = items.iter().map(|item| metrics.text_width(item, size)).collect();
    let width = widths.iter().sum::<f32>() + ITEM_SPACING * items.len().saturating_sub(1) as f32;
    let canvas_width = canvas_width as f32;
    let left = match slot {
        Slot::Left => EDGE_INSET,
        Slot::Center => (canvas_width - width) / 2.0,
        Slot::Right => canvas_width - EDGE_INSET - width,
    };
    let mut cursor = left;
    let placed = items
        .iter()
        .zip(widths)
        .map(|(item, w)| {
            let at = cursor;
            cursor += w + ITEM_SPACING;
            (item.clone(), at)
        })
        .collect();
    PlacedBlock {
        slot,
        left,
        width,
        items: placed,
    }
}

/// Left is never dropped. Centre goes if it touches either side; right goes only once
/// the centre is out of the way and right still touches left.
fn resolve_collisions(
    left: &Option<PlacedBlock>,
    center: &mut Option<PlacedBlock>,
    right: &mut Option<PlacedBlock>,
) {
    if let Some(c) = center.as_ref() {
        let hits_left = left.as_ref().is_some_and(|l| c.collides_with(l));
        let hits_right = right.as_ref().is_some_and(|r| c.collides_with(r));
        if hits_left || hits_right {
            *center = None;
        }
    }
    if center.is_none()
        && let (Some(l), Some(r)) = (left.as_ref(), right.as_ref())
        && r.collides_with(l)
    {
        *right = None;
    }
}

/// Inputs for the right-hand system block.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub resolution: (u32, u32),
    pub now: DateTime<Local>,
    pub wifi: String,
    /// Zero-based position in the playlist.
    pub index: usize,
    pub total: usize,
    pub showing_video: bool,
    pub next_in: Option<Duration>,
    pub last_sync: Option<DateTime<Local>>,
}

impl SystemStatus {
    pub fn texts(&self) -> Vec<String> {
        let label = if self.showing_video { "Media" } else { "Img" };
        let mut texts = vec![
            format!("Res: {}x{}", self.resolution.0, self.resolution.1),
            format!("Time: {}", self.now.format("%H:%M:%S")),
            format!("WiFi: {}", self.wifi),
            format!("{label}: {}/{}", self.index + 1, self.total),
        ];
        if let Some(next) = self.next_in {
            texts.push(format!("Next: {}s", next.as_secs_f32().round() as u64));
        }
        if let Some(sync) = self.last_sync {
            texts.push(format!("Sync: {}", sync.format("%H:%M")));
        }
        texts
    }
}

/// `m:ss / m:ss (p%)`, or just the elapsed clock when the length is unknown.
pub fn progress_text(elapsed: Duration, total: Option<Duration>) -> String {
    match total.filter(|t| !t.is_zero()) {
        Some(total) => {
            let elapsed = elapsed.min(total);
            let percent = (elapsed.as_secs_f64() / total.as_secs_f64() * 100.0).round() as u32;
            format!(
                "{} / {} ({percent}%)",
                format_clock(elapsed),
                format_clock(total)
            )
        }
        None => format_clock(elapsed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character is 10 px wide.
    struct FixedAdvance;

    impl TextMetrics for FixedAdvance {
        fn text_width(&self, text: &str, _size: f32) -> f32 {
            text.chars().count() as f32 * 10.0
        }
    }

    fn overlay() -> StatusOverlay {
        let mut settings = StatusBarSettings::default();
        settings.landscape = EdgeLayout {
            file_info: Edge::Bottom,
            system_info: Edge::Bottom,
            progress: Edge::Bottom,
        };
        StatusOverlay::new(settings)
    }

    fn content(left: &str, right: &str, center: Option<&str>) -> OverlayContent {
        OverlayContent {
            file_info: vec![left.to_string()],
            system_info: vec![right.to_string()],
            progress: center.map(str::to_string),
        }
    }

    #[test]
    fn blocks_are_inset_and_spaced() {
        let content = OverlayContent {
            file_info: vec!["ab".into(), "cde".into()],
            system_info: vec!["xy".into()],
            progress: None,
        };
        let bars = overlay().plan(&FixedAdvance, &content, Orientation::Landscape, (400, 300));
        assert_eq!(bars.len(), 1);
        let bar = &bars[0];
        assert_eq!((bar.edge, bar.top, bar.height), (Edge::Bottom, 270, 30));
        let left = bar.block(Slot::Left).unwrap();
        let positions: Vec<(&str, f32)> = left
            .items
            .iter()
            .map(|(item, at)| (item.as_str(), *at))
            .collect();
        assert_eq!(positions, [("ab", 10.0), ("cde", 45.0)]);
        assert_eq!(left.width, 65.0);
        let right = bar.block(Slot::Right).unwrap();
        assert_eq!(right.left, 370.0);
    }

    #[test]
    fn wide_left_content_drops_the_centre_only() {
        // Left spans 10..210, centre would sit at 180..220 on a 400 px bar.
        let content = content(&"L".repeat(20), "RR", Some("CCCC"));
        let bars = overlay().plan(&FixedAdvance, &content, Orientation::Landscape, (400, 300));
        let bar = &bars[0];
        assert!(bar.block(Slot::Left).is_some());
        assert!(bar.block(Slot::Center).is_none());
        assert!(bar.block(Slot::Right).is_some());
    }

    #[test]
    fn right_is_dropped_once_it_reaches_left() {
        let content = content(&"L".repeat(20), &"R".repeat(18), Some("C"));
        let bars = overlay().plan(&FixedAdvance, &content, Orientation::Landscape, (400, 300));
        let bar = &bars[0];
        assert!(bar.block(Slot::Left).is_some());
        assert!(bar.block(Slot::Center).is_none());
        assert!(bar.block(Slot::Right).is_none());
    }

    #[test]
    fn centre_survives_when_there_is_room() {
        let content = content("LL", "RR", Some("CC"));
        let bars = overlay().plan(&FixedAdvance, &content, Orientation::Landscape, (400, 300));
        let center = bars[0].block(Slot::Center).unwrap();
        assert_eq!(center.left, 190.0);
        assert_eq!(bars[0].blocks.len(), 3);
    }

    #[test]
    fn portrait_defaults_split_edges() {
        let overlay = StatusOverlay::new(StatusBarSettings::default());
        let content = content("file", "sys", Some("0:01"));
        let bars = overlay.plan(&FixedAdvance, &content, Orientation::Portrait, (300, 500));
        let edges: Vec<_> = bars.iter().map(|bar| bar.edge).collect();
        assert_eq!(edges, vec![Edge::Top, Edge::Bottom]);
        assert!(bars[0].block(Slot::Left).is_some());
        assert_eq!(bars[1].blocks.len(), 2);
        assert_eq!(bars[1].top, 470);
    }

    #[test]
    fn empty_content_draws_no_bar() {
        let bars = overlay().plan(
            &FixedAdvance,
            &OverlayContent::default(),
            Orientation::Landscape,
            (400, 300),
        );
        assert!(bars.is_empty());
    }

    #[test]
    fn progress_and_system_texts() {
        assert_eq!(
            progress_text(Duration::from_secs(30), Some(Duration::from_secs(120))),
            "0:30 / 2:00 (25%)"
        );
        assert_eq!(progress_text(Duration::from_secs(75), None), "1:15");

        let status = SystemStatus {
            resolution: (1920, 1080),
            now: Local::now(),
            wifi: "N/A".into(),
            index: 0,
            total: 3,
            showing_video: true,
            next_in: Some(Duration::from_millis(4_400)),
            last_sync: None,
        };
        let texts = status.texts();
        assert_eq!(texts[0], "Res: 1920x1080");
        assert_eq!(texts[2], "WiFi: N/A");
        assert_eq!(texts[3], "Media: 1/3");
        assert_eq!(texts[4], "Next: 4s");
        assert_eq!(texts.len(), 5);
    }
}
