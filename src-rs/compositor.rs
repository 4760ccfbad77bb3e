//! Caption placard and corner watermark compositing.
//!
//! A render is a pure function of the request: the source image is copied
//! into an RGBA canvas, the panel region is cropped, blurred, darkened or
//! brightened, tinted and pasted back through a rounded-rectangle mask, the
//! wrapped caption is drawn on top (outline pass first, then fill), and the
//! watermark outline is stamped into a corner. Every fallible step (font
//! lookup, size and wrap validation) runs before the canvas is touched.

use image::{imageops, DynamicImage, RgbaImage};
use serde::Serialize;
use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::font::{Font, FontLibrary};
use crate::layout::{self, WrappedTextBlock};
use crate::raster::{self, Rect};
use crate::settings::{OverlayPosition, OverlaySettings};

/// Outline width of the watermark text, on each side of the glyphs.
pub const WATERMARK_STROKE_WIDTH: u32 = 3;
/// Gap between the watermark box and the image edges.
pub const WATERMARK_MARGIN: i64 = 10;

const WRAP_WIDTH_INFLATION: f64 = 1.2;
const WRAP_WIDTH_CAP: f64 = 1.6;

/// One render job. Owns its settings so the caller can keep editing its own
/// copy while the render runs.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub image: &'a DynamicImage,
    pub text: &'a str,
    pub settings: OverlaySettings,
    pub watermark: Option<&'a str>,
}

impl<'a> RenderRequest<'a> {
    pub fn new(image: &'a DynamicImage, text: &'a str, settings: &OverlaySettings) -> Self {
        Self {
            image,
            text,
            settings: settings.clone(),
            watermark: None,
        }
    }

    pub fn with_watermark(mut self, watermark: Option<&'a str>) -> Self {
        self.watermark = watermark.filter(|text| !text.is_empty());
        self
    }
}

/// Pixel placement of the caption panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PanelGeometry {
    /// Full panel rectangle; may extend past the image.
    pub rect: Rect,
    pub padding_x: u32,
    pub padding_y: u32,
    pub corner_radius: u32,
    pub blur_radius: u32,
}

impl PanelGeometry {
    /// The on-image part of the panel.
    pub fn visible(&self, image_width: u32, image_height: u32) -> Option<Rect> {
        self.rect.clamp_to(image_width, image_height)
    }
}

/// Everything a caller may want to report about a finished render.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub image: RgbaImage,
    pub lines: Vec<String>,
    pub panel: Option<PanelGeometry>,
    pub watermark: Option<Rect>,
}

/// Wrap budget in pixels: `wrap%` inflated by 20 %, capped at 160 % of the
/// image width, never below one pixel.
pub fn wrap_width_px(image_width: u32, wrap_width_percentage: f64) -> u32 {
    let fraction = (wrap_width_percentage * WRAP_WIDTH_INFLATION / 100.0).min(WRAP_WIDTH_CAP);
    (f64::from(image_width) * fraction).floor().max(1.0) as u32
}

fn percent_of(length: u32, percentage: f64) -> u32 {
    (f64::from(length) * percentage / 100.0).floor().max(0.0) as u32
}

/// Sizes and anchors the panel around a wrapped block.
pub fn resolve_panel(
    image_width: u32,
    image_height: u32,
    block: &WrappedTextBlock,
    settings: &OverlaySettings,
) -> PanelGeometry {
    let padding_y = percent_of(image_height, settings.vertical_padding_percentage);
    let padding_x = percent_of(image_width, settings.horizontal_padding_percentage);
    let panel_width = block.width + 2 * padding_x;
    let panel_height = block.height + 2 * padding_y;

    let slack = (i64::from(image_height) - i64::from(panel_height)).max(0) as f64 / 2.0;
    let margin = (slack * settings.overlay_margin_percentage.max(0.0) / 100.0).floor() as i64;
    let y = match settings.position {
        OverlayPosition::Top => margin,
        OverlayPosition::Bottom => i64::from(image_height) - i64::from(panel_height) - margin,
    };
    let x = (i64::from(image_width) - i64::from(panel_width)).div_euclid(2);

    PanelGeometry {
        rect: Rect::new(x, y, panel_width, panel_height),
        padding_x,
        padding_y,
        corner_radius: padding_y.max(padding_x) / 2,
        blur_radius: padding_x.min(padding_y) / 2,
    }
}

/// Box taken by the watermark outline, anchored right and to the same
/// vertical edge as the panel.
pub fn watermark_bounds(
    image_width: u32,
    image_height: u32,
    font: &Font,
    text: &str,
    position: OverlayPosition,
) -> Rect {
    let box_width = font.text_width(text) + 2 * WATERMARK_STROKE_WIDTH;
    let box_height = font.line_height() + 2 * WATERMARK_STROKE_WIDTH;
    let x = (i64::from(image_width) - i64::from(box_width) - WATERMARK_MARGIN).max(0);
    let y = match position {
        OverlayPosition::Top => WATERMARK_MARGIN,
        OverlayPosition::Bottom => {
            (i64::from(image_height) - i64::from(box_height) - WATERMARK_MARGIN).max(0)
        }
    };
    Rect::new(x, y, box_width, box_height)
}

struct CaptionPlan {
    font: Font,
    block: WrappedTextBlock,
    panel: PanelGeometry,
}

struct WatermarkPlan<'a> {
    font: Font,
    text: &'a str,
    bounds: Rect,
}

/// Renders caption overlays with a fixed font table.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    fonts: FontLibrary,
}

impl Compositor {
    pub fn new(fonts: FontLibrary) -> Self {
        Self { fonts }
    }

    pub fn render(&self, request: &RenderRequest<'_>) -> RenderResult<RenderOutput> {
        let settings = &request.settings;
        let (width, height) = (request.image.width(), request.image.height());

        let caption = if settings.include_overlay {
            Some(self.plan_caption(width, height, request.text, settings)?)
        } else {
            None
        };
        let watermark = match request.watermark.filter(|text| !text.is_empty()) {
            Some(text) => {
                let font = self
                    .fonts
                    .resolve(&settings.font_family, settings.watermark_font_size)?;
                let bounds = watermark_bounds(width, height, &font, text, settings.position);
                Some(WatermarkPlan { font, text, bounds })
            }
            None => None,
        };

        let mut canvas = request.image.to_rgba8();
        if let Some(plan) = &caption {
            draw_panel(&mut canvas, &plan.panel, settings);
            draw_caption(&mut canvas, plan, settings);
        }
        if let Some(plan) = &watermark {
            draw_watermark(&mut canvas, plan, settings);
        }

        Ok(RenderOutput {
            image: canvas,
            lines: caption
                .as_ref()
                .map(|plan| plan.block.lines.clone())
                .unwrap_or_default(),
            panel: caption.map(|plan| plan.panel),
            watermark: watermark.map(|plan| plan.bounds),
        })
    }

    fn plan_caption(
        &self,
        width: u32,
        height: u32,
        text: &str,
        settings: &OverlaySettings,
    ) -> RenderResult<CaptionPlan> {
        let font = self
            .fonts
            .resolve(&settings.font_family, settings.font_size)?;
        let wrap = settings.wrap_width_percentage;
        if wrap.is_nan() || wrap <= 0.0 {
            return Err(RenderError::InvalidWrapWidth(settings.wrap_width_percentage));
        }
        let wrap_px = wrap_width_px(width, settings.wrap_width_percentage);
        let block = layout::wrap(text, &font, wrap_px, settings.line_spacing_percentage)?;
        let panel = resolve_panel(width, height, &block, settings);
        debug!(?panel, lines = block.lines.len(), "planned caption panel");
        Ok(CaptionPlan { font, block, panel })
    }
}

fn draw_panel(canvas: &mut RgbaImage, panel: &PanelGeometry, settings: &OverlaySettings) {
    let Some(visible) = panel.visible(canvas.width(), canvas.height()) else {
        debug!("panel lies outside the image; skipping background");
        return;
    };

    let cropped = imageops::crop_imm(
        &*canvas,
        visible.x as u32,
        visible.y as u32,
        visible.width,
        visible.height,
    )
    .to_image();
    let mut background = raster::gaussian_blur(&cropped, panel.blur_radius);
    if settings.brightness != 0 {
        raster::adjust_brightness(&mut background, settings.brightness_factor());
    }
    if settings.tint_enabled {
        raster::apply_tint(&mut background, settings.tint_color.rgba(), settings.tint_alpha());
    }

    let radius = f64::from(panel.corner_radius);
    for (sx, sy, px) in background.enumerate_pixels() {
        let gx = visible.x + i64::from(sx);
        let gy = visible.y + i64::from(sy);
        if raster::point_in_rounded_rect(gx, gy, panel.rect, radius) {
            canvas.put_pixel(gx as u32, gy as u32, *px);
        }
    }
}

fn draw_caption(canvas: &mut RgbaImage, plan: &CaptionPlan, settings: &OverlaySettings) {
    let image_width = i64::from(canvas.width());
    let stroke = settings.stroke_width;
    let mut y = plan.panel.rect.y + i64::from(plan.panel.padding_y);

    for line in &plan.block.lines {
        let mask = plan.font.rasterize(line);
        let x = (image_width - i64::from(mask.width())).div_euclid(2);
        if stroke > 0 {
            let outline = raster::dilate(&mask, stroke);
            raster::composite_mask(
                canvas,
                &outline,
                x - i64::from(stroke),
                y - i64::from(stroke),
                settings.stroke_color.rgba(),
            );
        }
        raster::composite_mask(canvas, &mask, x, y, settings.text_color.rgba());
        y += i64::from(plan.block.line_advance);
    }
}

fn draw_watermark(canvas: &mut RgbaImage, plan: &WatermarkPlan<'_>, settings: &OverlaySettings) {
    let glyphs = plan.font.rasterize(plan.text);
    let mut ring = raster::dilate(&glyphs, WATERMARK_STROKE_WIDTH);
    raster::subtract_mask(&mut ring, &glyphs, WATERMARK_STROKE_WIDTH);
    raster::composite_mask(
        canvas,
        &ring,
        plan.bounds.x,
        plan.bounds.y,
        settings.text_color.rgba(),
    );
    debug!(bounds = ?plan.bounds, "stamped watermark");
}
