//! Content-to-screen scaling geometry shared by the still-image and video paths.

use crate::config::ScaleMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// How a `src_w × src_h` source lands on a `dst_w × dst_h` canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePlan {
    /// Scale the whole source to `placement`'s size and draw it there over the background.
    Fit { placement: Rect },
    /// Cut `crop` out of the source and scale it to the full canvas.
    Fill { crop: Rect },
    /// Scale the whole source to the full canvas.
    Stretch,
}

impl ScalePlan {
    pub fn compute(mode: ScaleMode, src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Self {
        match mode {
            ScaleMode::Fit => Self::Fit {
                placement: fit_placement(src_w, src_h, dst_w, dst_h),
            },
            ScaleMode::Fill => Self::Fill {
                crop: fill_crop(src_w, src_h, dst_w, dst_h),
            },
            ScaleMode::Stretch => Self::Stretch,
        }
    }

    /// Size the scaled content has before it is placed on the canvas.
    pub fn scaled_size(&self, dst_w: u32, dst_h: u32) -> (u32, u32) {
        match self {
            Self::Fit { placement } => (placement.width, placement.height),
            Self::Fill { .. } | Self::Stretch => (dst_w, dst_h),
        }
    }

    /// Top-left corner of the scaled content on the canvas.
    pub fn offset(&self) -> (u32, u32) {
        match self {
            Self::Fit { placement } => (placement.x, placement.y),
            Self::Fill { .. } | Self::Stretch => (0, 0),
        }
    }

    /// Whether uncovered canvas regions show the background color.
    pub fn letterboxed(&self, dst_w: u32, dst_h: u32) -> bool {
        self.scaled_size(dst_w, dst_h) != (dst_w, dst_h)
    }
}

/// Letterbox placement preserving aspect ratio, centred on the canvas.
pub fn fit_placement(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Rect {
    let (src_w, src_h) = (src_w.max(1), src_h.max(1));
    let (dst_w, dst_h) = (dst_w.max(1), dst_h.max(1));
    let img_ratio = f64::from(src_w) / f64::from(src_h);
    let screen_ratio = f64::from(dst_w) / f64::from(dst_h);
    let (w, h) = if img_ratio > screen_ratio {
        (dst_w, (f64::from(dst_w) / img_ratio) as u32)
    } else {
        ((f64::from(dst_h) * img_ratio) as u32, dst_h)
    };
    let (w, h) = (w.clamp(1, dst_w), h.clamp(1, dst_h));
    let (x, y) = center_offset(w, h, dst_w, dst_h);
    Rect::new(x, y, w, h)
}

/// Centred source rectangle whose aspect ratio matches the canvas.
pub fn fill_crop(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> Rect {
    let (src_w, src_h) = (src_w.max(1), src_h.max(1));
    let img_ratio = f64::from(src_w) / f64::from(src_h);
    let screen_ratio = f64::from(dst_w.max(1)) / f64::from(dst_h.max(1));
    if img_ratio > screen_ratio {
        let crop_w = ((f64::from(src_h) * screen_ratio) as u32).clamp(1, src_w);
        Rect::new((src_w - crop_w) / 2, 0, crop_w, src_h)
    } else {
        let crop_h = ((f64::from(src_w) / screen_ratio) as u32).clamp(1, src_h);
        Rect::new(0, (src_h - crop_h) / 2, src_w, crop_h)
    }
}

pub fn center_offset(inner_w: u32, inner_h: u32, outer_w: u32, outer_h: u32) -> (u32, u32) {
    let ox = outer_w.saturating_sub(inner_w) / 2;
    let oy = outer_h.saturating_sub(inner_h) / 2;
    (ox, oy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_exact_aspect_fills_canvas() {
        assert_eq!(fit_placement(400, 200, 800, 400), Rect::new(0, 0, 800, 400));
    }

    #[test]
    fn fit_square_on_wide_is_pillarboxed() {
        assert_eq!(fit_placement(400, 400, 800, 400), Rect::new(200, 0, 400, 400));
    }

    #[test]
    fn fit_wide_on_16x9_is_letterboxed() {
        // 2:1 source on 1920x1080: fit to width, 960 tall, 60px bars.
        assert_eq!(
            fit_placement(4000, 2000, 1920, 1080),
            Rect::new(0, 60, 1920, 960)
        );
    }

    #[test]
    fn fill_crops_sides_of_wider_source() {
        // 2:1 source onto 1:1 canvas keeps the middle square.
        assert_eq!(fill_crop(400, 200, 500, 500), Rect::new(100, 0, 200, 200));
    }

    #[test]
    fn fill_crops_top_and_bottom_of_taller_source() {
        assert_eq!(fill_crop(300, 900, 800, 400), Rect::new(0, 375, 300, 150));
    }

    #[test]
    fn plan_reports_scaled_size_and_offset() {
        let plan = ScalePlan::compute(ScaleMode::Fit, 400, 400, 800, 400);
        assert_eq!(plan.scaled_size(800, 400), (400, 400));
        assert_eq!(plan.offset(), (200, 0));
        assert!(plan.letterboxed(800, 400));

        let plan = ScalePlan::compute(ScaleMode::Stretch, 10, 999, 800, 400);
        assert_eq!(plan.scaled_size(800, 400), (800, 400));
        assert_eq!(plan.offset(), (0, 0));
        assert!(!plan.letterboxed(800, 400));
    }

    #[test]
    fn degenerate_sizes_do_not_panic() {
        assert_eq!(fit_placement(0, 0, 800, 400).height, 400);
        let crop = fill_crop(1, 5000, 1920, 1080);
        assert!(crop.width >= 1 && crop.height >= 1);
    }
}
