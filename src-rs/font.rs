//! Font resolution and glyph rasterization.
//!
//! A [`FontLibrary`] maps family names to faces. The built-in face is the
//! 8x8 `font8x8` bitmap set scaled to the requested pixel size; any number
//! of TrueType/OpenType faces can be registered next to it. A resolved
//! [`Font`] only answers metric queries and rasterizes a single line into a
//! coverage mask, everything else (stroke, color, placement) is the
//! compositor's business.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use ab_glyph::{Font as _, FontArc, GlyphId, PxScale, ScaleFont};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{GrayImage, Luma};
use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::settings::BUILTIN_FONT_FAMILY;

#[derive(Clone)]
enum FontFace {
    Bitmap,
    Outline(FontArc),
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bitmap => f.write_str("Bitmap"),
            Self::Outline(_) => f.write_str("Outline"),
        }
    }
}

/// Immutable family → face table shared by every render.
#[derive(Debug, Clone)]
pub struct FontLibrary {
    faces: BTreeMap<String, FontFace>,
}

impl Default for FontLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FontLibrary {
    /// Library holding only the built-in bitmap family.
    pub fn builtin() -> Self {
        let mut faces = BTreeMap::new();
        faces.insert(BUILTIN_FONT_FAMILY.to_string(), FontFace::Bitmap);
        Self { faces }
    }

    pub fn register_bytes(&mut self, family: &str, data: Vec<u8>) -> RenderResult<()> {
        let face = FontArc::try_from_vec(data)
            .map_err(|err| RenderError::font_load(family, err))?;
        self.faces
            .insert(family.to_string(), FontFace::Outline(face));
        Ok(())
    }

    /// Registers the font file at `path`; load errors name the file.
    pub fn register_file(&mut self, family: &str, path: &Path) -> RenderResult<()> {
        let data = fs::read(path).map_err(|err| RenderError::font_load(path, err))?;
        self.register_bytes(family, data).map_err(|err| match err {
            RenderError::FontLoad { reason, .. } => RenderError::font_load(path, reason),
            other => other,
        })?;
        debug!(family, path = %path.display(), "registered font");
        Ok(())
    }

    /// Registers every `.ttf`/`.otf` file in `dir` under its file stem,
    /// e.g. `Lato-Regular.ttf` becomes family `Lato-Regular`.
    pub fn load_dir(&mut self, dir: &Path) -> RenderResult<usize> {
        let entries = fs::read_dir(dir).map_err(|err| RenderError::font_load(dir, err))?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "ttf" | "otf"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut count = 0;
        for path in paths {
            let Some(family) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let family = family.to_string();
            self.register_file(&family, &path)?;
            count += 1;
        }
        Ok(count)
    }

    pub fn families(&self) -> Vec<&str> {
        self.faces.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, family: &str) -> bool {
        self.faces.contains_key(family)
    }

    /// Resolves `family` at `size` pixels. Unknown families and a zero size
    /// are configuration errors; there is no fallback face.
    pub fn resolve(&self, family: &str, size: u32) -> RenderResult<Font> {
        if size == 0 {
            return Err(RenderError::InvalidFontSize);
        }
        let face = self
            .faces
            .get(family)
            .cloned()
            .ok_or_else(|| RenderError::UnknownFont(family.to_string()))?;
        Ok(Font { face, size })
    }
}

/// A face bound to a pixel size.
#[derive(Debug, Clone)]
pub struct Font {
    face: FontFace,
    size: u32,
}

impl Font {
    pub fn ascent(&self) -> u32 {
        match &self.face {
            FontFace::Bitmap => self.size - self.size / 8,
            FontFace::Outline(face) => face.as_scaled(self.scale()).ascent().ceil().max(0.0) as u32,
        }
    }

    pub fn descent(&self) -> u32 {
        match &self.face {
            FontFace::Bitmap => self.size / 8,
            FontFace::Outline(face) => {
                (-face.as_scaled(self.scale()).descent()).ceil().max(0.0) as u32
            }
        }
    }

    /// Natural line height, ascent plus descent.
    pub fn line_height(&self) -> u32 {
        self.ascent() + self.descent()
    }

    /// Horizontal advance of a single character.
    pub fn char_width(&self, ch: char) -> f32 {
        match &self.face {
            FontFace::Bitmap => self.size as f32,
            FontFace::Outline(face) => {
                let scaled = face.as_scaled(self.scale());
                scaled.h_advance(scaled.glyph_id(ch))
            }
        }
    }

    /// Pixel width of `text` laid out on one line, kerning included.
    pub fn text_width(&self, text: &str) -> u32 {
        match &self.face {
            FontFace::Bitmap => text.chars().count() as u32 * self.size,
            FontFace::Outline(face) => {
                let scaled = face.as_scaled(self.scale());
                let mut width = 0.0f32;
                let mut prev: Option<GlyphId> = None;
                for ch in text.chars() {
                    let id = scaled.glyph_id(ch);
                    if let Some(prev) = prev {
                        width += scaled.kern(prev, id);
                    }
                    width += scaled.h_advance(id);
                    prev = Some(id);
                }
                width.ceil().max(0.0) as u32
            }
        }
    }

    /// Rasterizes one line into a coverage mask of `text_width` by
    /// `line_height` pixels, with the baseline at `ascent`.
    pub fn rasterize(&self, text: &str) -> GrayImage {
        let mut mask = GrayImage::new(self.text_width(text), self.line_height());
        match &self.face {
            FontFace::Bitmap => self.rasterize_bitmap(&mut mask, text),
            FontFace::Outline(face) => self.rasterize_outline(face, &mut mask, text),
        }
        mask
    }

    fn scale(&self) -> PxScale {
        PxScale::from(self.size as f32)
    }

    fn rasterize_bitmap(&self, mask: &mut GrayImage, text: &str) {
        let cell = self.size;
        let mut cursor_x = 0u32;
        for ch in text.chars() {
            let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
            let Some(glyph) = glyph else {
                cursor_x += cell;
                continue;
            };
            for py in 0..cell.min(mask.height()) {
                let row_bits = glyph[(py * 8 / cell) as usize];
                for px in 0..cell {
                    let col = px * 8 / cell;
                    if (row_bits >> col) & 1 == 0 {
                        continue;
                    }
                    let tx = cursor_x + px;
                    if tx < mask.width() {
                        mask.put_pixel(tx, py, Luma([255]));
                    }
                }
            }
            cursor_x += cell;
        }
    }

    fn rasterize_outline(&self, face: &FontArc, mask: &mut GrayImage, text: &str) {
        let scale = self.scale();
        let scaled = face.as_scaled(scale);
        let baseline_y = self.ascent() as f32;
        let (width, height) = (mask.width() as i32, mask.height() as i32);

        let mut cursor_x = 0.0f32;
        let mut prev: Option<GlyphId> = None;
        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = prev {
                cursor_x += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, ab_glyph::point(cursor_x, baseline_y));
            if let Some(outlined) = face.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    let x = bounds.min.x as i32 + gx as i32;
                    let y = bounds.min.y as i32 + gy as i32;
                    if x < 0 || y < 0 || x >= width || y >= height {
                        return;
                    }
                    let value = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
                    let existing = mask.get_pixel(x as u32, y as u32)[0];
                    mask.put_pixel(x as u32, y as u32, Luma([existing.max(value)]));
                });
            }
            cursor_x += scaled.h_advance(id);
            prev = Some(id);
        }
    }
}
