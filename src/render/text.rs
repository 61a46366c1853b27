use std::fs;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont, point};
use anyhow::{Context, Result, anyhow};
use fontdb::{Database, Family, Query, Source};

use super::pixels::{Color, PixelBuffer};

/// Glyph rasteriser over a single system font.
#[derive(Clone)]
pub struct TextRenderer {
    font: FontArc,
}

impl std::fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextRenderer").finish_non_exhaustive()
    }
}

impl TextRenderer {
    pub fn new(font: FontArc) -> Self {
        Self { font }
    }

    pub fn from_system() -> Result<Self> {
        load_font().map(Self::new)
    }

    pub fn measure(&self, text: &str, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        let mut width = 0.0f32;
        let mut previous = None;
        for ch in text.chars() {
            if ch.is_control() {
                continue;
            }
            let glyph_id = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                width += scaled.kern(prev, glyph_id);
            }
            width += scaled.h_advance(glyph_id);
            previous = Some(glyph_id);
        }
        width.max(0.0)
    }

    /// Height from ascent to descent at `size`.
    pub fn line_height(&self, size: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(size));
        scaled.ascent() + scaled.descent().abs()
    }

    pub fn ascent(&self, size: f32) -> f32 {
        self.font.as_scaled(PxScale::from(size)).ascent()
    }

    /// Draws `text` with its baseline at `baseline`, starting at `left`.
    pub fn draw(
        &self,
        target: &mut PixelBuffer,
        text: &str,
        left: f32,
        baseline: f32,
        size: f32,
        color: Color,
    ) {
        let scaled = self.font.as_scaled(PxScale::from(size));
        let mut cursor_x = left;
        let mut previous = None;
        for ch in text.chars() {
            if ch.is_control() {
                continue;
            }
            let glyph = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                cursor_x += scaled.kern(prev, glyph);
            }
            let advance = scaled.h_advance(glyph);
            let mut positioned = scaled.scaled_glyph(ch);
            positioned.position = point(cursor_x, baseline);
            if let Some(outline) = self.font.outline_glyph(positioned) {
                let bounds = outline.px_bounds();
                outline.draw(|x, y, coverage| {
                    target.blend_pixel(
                        (bounds.min.x + x as f32).floor() as i32,
                        (bounds.min.y + y as f32).floor() as i32,
                        color,
                        coverage * color.a,
                    );
                });
            }
            cursor_x += advance;
            previous = Some(glyph);
        }
    }

    /// Draws `text` horizontally centred on the buffer.
    pub fn draw_centered(
        &self,
        target: &mut PixelBuffer,
        text: &str,
        baseline: f32,
        size: f32,
        color: Color,
    ) {
        let width = self.measure(text, size);
        let left = ((target.width() as f32 - width) / 2.0).max(0.0);
        self.draw(target, text, left, baseline, size, color);
    }
}

fn load_font() -> Result<FontArc> {
    let mut db = Database::new();
    db.load_system_fonts();

    let preferred_families = [
        Family::Name("DejaVu Sans"),
        Family::Name("Noto Sans"),
        Family::Name("Liberation Sans"),
        Family::SansSerif,
    ];

    for family in preferred_families {
        if let Some(id) = db.query(&Query {
            families: &[family],
            weight: fontdb::Weight::BOLD,
            ..Default::default()
        }) && let Some(font) = load_face(&db, id)?
        {
            return Ok(font);
        }
    }

    for face in db.faces() {
        if let Some(font) = load_face(&db, face.id)? {
            return Ok(font);
        }
    }

    Err(anyhow!("failed to load a system font for the status overlay"))
}

fn load_face(db: &Database, id: fontdb::ID) -> Result<Option<FontArc>> {
    let face = db.face(id).context("missing font face in database")?;
    let data = match &face.source {
        Source::Binary(data) => data.as_ref().as_ref().to_vec(),
        Source::File(path) => fs::read(path)
            .with_context(|| format!("failed to read font at {}", path.display()))?,
        Source::SharedFile(_, data) => data.as_ref().as_ref().to_vec(),
    };
    Ok(Some(
        FontArc::try_from_vec(data).context("failed to decode font face")?,
    ))
}
