//! Pixel-level primitives used by the compositor.

use image::{GrayImage, Luma, Rgba, RgbaImage};

/// Integer rectangle whose origin may lie outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.x + i64::from(self.width)
    }

    pub fn bottom(&self) -> i64 {
        self.y + i64::from(self.height)
    }

    /// The part of `self` inside a `width` x `height` image, or `None` when
    /// nothing overlaps.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        let x0 = self.x.clamp(0, i64::from(width));
        let y0 = self.y.clamp(0, i64::from(height));
        let x1 = self.right().clamp(0, i64::from(width));
        let y1 = self.bottom().clamp(0, i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    pub fn contains(&self, px: i64, py: i64) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }
}

/// Source-over blend of `src` onto `dst`.
pub fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| -> u8 {
        (f64::from(d) * inv + f64::from(s) * a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    let out_a = (f64::from(src[3]) + f64::from(dst[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

/// Hit test against `rect` with corners rounded by `radius` (capped at half
/// the shorter side).
pub fn point_in_rounded_rect(px: i64, py: i64, rect: Rect, radius: f64) -> bool {
    if !rect.contains(px, py) {
        return false;
    }
    if radius <= 0.1 {
        return true;
    }
    let r = radius
        .min(f64::from(rect.width) / 2.0)
        .min(f64::from(rect.height) / 2.0);
    let fx = px as f64 + 0.5;
    let fy = py as f64 + 0.5;
    let left = rect.x as f64;
    let right = rect.right() as f64;
    let top = rect.y as f64;
    let bottom = rect.bottom() as f64;

    if (fx >= left + r && fx <= right - r) || (fy >= top + r && fy <= bottom - r) {
        return true;
    }

    let corners = [
        (left + r, top + r),
        (right - r, top + r),
        (left + r, bottom - r),
        (right - r, bottom - r),
    ];
    corners.iter().any(|(cx, cy)| {
        let dx = fx - cx;
        let dy = fy - cy;
        dx * dx + dy * dy <= r * r
    })
}

/// Separable Gaussian blur with standard deviation `radius`, edge pixels
/// clamped. Channels are premultiplied by alpha for the passes so fully
/// transparent pixels carry no color into their neighbours. A zero radius
/// returns the input unchanged.
pub fn gaussian_blur(src: &RgbaImage, radius: u32) -> RgbaImage {
    if radius == 0 || src.width() == 0 || src.height() == 0 {
        return src.clone();
    }
    let kernel = gaussian_kernel_q16(radius);
    let (width, height) = src.dimensions();
    let premultiplied = premultiply(src.as_raw());
    let mut tmp = vec![0u8; premultiplied.len()];
    let mut out = vec![0u8; premultiplied.len()];
    blur_pass(&premultiplied, &mut tmp, width, height, &kernel, Axis::Horizontal);
    blur_pass(&tmp, &mut out, width, height, &kernel, Axis::Vertical);
    unpremultiply(&mut out);
    RgbaImage::from_raw(width, height, out).unwrap_or_else(|| src.clone())
}

#[derive(Clone, Copy)]
enum Axis {
    Horizontal,
    Vertical,
}

/// Normalized weights in Q16 over `-ceil(3σ)..=ceil(3σ)`; they sum to
/// exactly 65536.
fn gaussian_kernel_q16(sigma: u32) -> Vec<u32> {
    let sigma = f64::from(sigma);
    let half = (sigma * 3.0).ceil() as i32;
    let raw: Vec<f64> = (-half..=half)
        .map(|i| (-f64::from(i * i) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f64 = raw.iter().sum();

    let mut weights: Vec<u32> = raw
        .iter()
        .map(|w| (w / total * 65536.0).round() as u32)
        .collect();
    let drift = 65536 - weights.iter().map(|&w| i64::from(w)).sum::<i64>();
    let centre = weights.len() / 2;
    weights[centre] = (i64::from(weights[centre]) + drift).clamp(0, 65536) as u32;
    weights
}

fn blur_pass(src: &[u8], dst: &mut [u8], width: u32, height: u32, kernel: &[u32], axis: Axis) {
    let half = (kernel.len() / 2) as i64;
    let (w, h) = (i64::from(width), i64::from(height));
    for y in 0..h {
        for x in 0..w {
            let mut acc = [0u64; 4];
            for (i, &weight) in kernel.iter().enumerate() {
                let offset = i as i64 - half;
                let (sx, sy) = match axis {
                    Axis::Horizontal => ((x + offset).clamp(0, w - 1), y),
                    Axis::Vertical => (x, (y + offset).clamp(0, h - 1)),
                };
                let idx = ((sy * w + sx) as usize) * 4;
                for (sum, &value) in acc.iter_mut().zip(&src[idx..idx + 4]) {
                    *sum += u64::from(weight) * u64::from(value);
                }
            }
            let out = ((y * w + x) as usize) * 4;
            for (slot, sum) in dst[out..out + 4].iter_mut().zip(acc) {
                *slot = ((sum + 32768) >> 16).min(255) as u8;
            }
        }
    }
}

fn premultiply(raw: &[u8]) -> Vec<u8> {
    let mut out = raw.to_vec();
    for px in out.chunks_exact_mut(4) {
        let a = u32::from(px[3]);
        for c in &mut px[..3] {
            *c = ((u32::from(*c) * a + 127) / 255) as u8;
        }
    }
    out
}

fn unpremultiply(raw: &mut [u8]) {
    for px in raw.chunks_exact_mut(4) {
        let a = u32::from(px[3]);
        if a == 0 {
            px[..3].fill(0);
            continue;
        }
        for c in &mut px[..3] {
            *c = ((u32::from(*c) * 255 + a / 2) / a).min(255) as u8;
        }
    }
}

/// Scales the color channels by `factor`; alpha is left alone.
pub fn adjust_brightness(img: &mut RgbaImage, factor: f64) {
    let factor = factor.max(0.0);
    for px in img.pixels_mut() {
        for c in 0..3 {
            px[c] = (f64::from(px[c]) * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Blends `tint` source-over at `opacity` times its own alpha, so an
/// opaque tint at opacity 1 replaces the pixel including its alpha.
pub fn apply_tint(img: &mut RgbaImage, tint: Rgba<u8>, opacity: f64) {
    let o = opacity.clamp(0.0, 1.0);
    let alpha = (o * f64::from(tint[3])).round() as u8;
    if alpha == 0 {
        return;
    }
    let src = Rgba([tint[0], tint[1], tint[2], alpha]);
    for px in img.pixels_mut() {
        *px = blend_pixel(*px, src);
    }
}

/// Grows a coverage mask by a disc of `radius` pixels. The result is
/// `radius` pixels larger on every side.
pub fn dilate(mask: &GrayImage, radius: u32) -> GrayImage {
    let r = radius as i64;
    let (w, h) = mask.dimensions();
    let mut out = GrayImage::new(w + 2 * radius, h + 2 * radius);
    let offsets: Vec<(i64, i64)> = (-r..=r)
        .flat_map(|dy| (-r..=r).map(move |dx| (dx, dy)))
        .filter(|(dx, dy)| dx * dx + dy * dy <= r * r)
        .collect();

    for (x, y, value) in mask.enumerate_pixels() {
        let v = value[0];
        if v == 0 {
            continue;
        }
        for (dx, dy) in &offsets {
            let tx = (i64::from(x) + r + dx) as u32;
            let ty = (i64::from(y) + r + dy) as u32;
            let slot = out.get_pixel_mut(tx, ty);
            if slot[0] < v {
                *slot = Luma([v]);
            }
        }
    }
    out
}

/// `outer - inner`, with `inner` placed `offset` pixels into `outer`.
pub fn subtract_mask(outer: &mut GrayImage, inner: &GrayImage, offset: u32) {
    for (x, y, value) in inner.enumerate_pixels() {
        let (tx, ty) = (x + offset, y + offset);
        if tx < outer.width() && ty < outer.height() {
            let slot = outer.get_pixel_mut(tx, ty);
            *slot = Luma([slot[0].saturating_sub(value[0])]);
        }
    }
}

/// Blends `color` through `mask` onto `img` with the mask's top-left at
/// (`x`, `y`). Parts outside the image are dropped.
pub fn composite_mask(img: &mut RgbaImage, mask: &GrayImage, x: i64, y: i64, color: Rgba<u8>) {
    let (img_w, img_h) = (i64::from(img.width()), i64::from(img.height()));
    for (mx, my, coverage) in mask.enumerate_pixels() {
        let cov = coverage[0];
        if cov == 0 {
            continue;
        }
        let tx = x + i64::from(mx);
        let ty = y + i64::from(my);
        if tx < 0 || ty < 0 || tx >= img_w || ty >= img_h {
            continue;
        }
        let alpha = (u32::from(color[3]) * u32::from(cov) + 127) / 255;
        let src = Rgba([color[0], color[1], color[2], alpha as u8]);
        let dst = *img.get_pixel(tx as u32, ty as u32);
        img.put_pixel(tx as u32, ty as u32, blend_pixel(dst, src));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_to_trims_negative_origins() {
        let r = Rect::new(-10, -5, 30, 20);
        assert_eq!(r.clamp_to(100, 100), Some(Rect::new(0, 0, 20, 15)));
        assert_eq!(Rect::new(90, 90, 50, 50).clamp_to(100, 100), Some(Rect::new(90, 90, 10, 10)));
        assert_eq!(Rect::new(-50, 0, 40, 10).clamp_to(100, 100), None);
        assert_eq!(Rect::new(0, 0, 0, 10).clamp_to(100, 100), None);
    }

    #[test]
    fn blend_respects_alpha_extremes() {
        let dst = Rgba([10, 20, 30, 255]);
        assert_eq!(blend_pixel(dst, Rgba([200, 200, 200, 0])), dst);
        assert_eq!(blend_pixel(dst, Rgba([200, 100, 50, 255])), Rgba([200, 100, 50, 255]));
    }

    #[test]
    fn rounded_rect_excludes_corners() {
        let rect = Rect::new(0, 0, 40, 20);
        assert!(point_in_rounded_rect(20, 10, rect, 8.0));
        assert!(!point_in_rounded_rect(0, 0, rect, 8.0));
        assert!(!point_in_rounded_rect(39, 19, rect, 8.0));
        assert!(point_in_rounded_rect(0, 0, rect, 0.0));
        assert!(!point_in_rounded_rect(40, 10, rect, 0.0));
    }

    #[test]
    fn blur_radius_zero_is_identity() {
        let img = RgbaImage::from_fn(4, 3, |x, y| Rgba([x as u8 * 40, y as u8 * 60, 7, 255]));
        assert_eq!(gaussian_blur(&img, 0), img);
    }

    #[test]
    fn blur_keeps_flat_color() {
        let img = RgbaImage::from_pixel(9, 6, Rgba([10, 20, 30, 255]));
        assert_eq!(gaussian_blur(&img, 3), img);
    }

    #[test]
    fn blur_spreads_a_single_pixel() {
        let mut img = RgbaImage::from_pixel(7, 7, Rgba([0, 0, 0, 255]));
        img.put_pixel(3, 3, Rgba([255, 255, 255, 255]));
        let out = gaussian_blur(&img, 1);
        assert!(out.get_pixel(3, 3)[0] < 255);
        assert!(out.get_pixel(2, 3)[0] > 0);
        assert!(out.get_pixel(3, 4)[0] > 0);
    }

    #[test]
    fn blur_ignores_color_of_transparent_pixels() {
        let mut img = RgbaImage::from_pixel(9, 1, Rgba([255, 0, 0, 0]));
        for x in 0..4 {
            img.put_pixel(x, 0, Rgba([0, 0, 255, 255]));
        }
        let out = gaussian_blur(&img, 2);
        let edge = out.get_pixel(4, 0);
        assert!(edge[3] > 0 && edge[3] < 255);
        assert_eq!(edge[0], 0);
        assert_eq!(edge[2], 255);
    }

    #[test]
    fn brightness_factor_zero_blackens_and_two_doubles() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([100, 50, 200, 255]));
        adjust_brightness(&mut img, 2.0);
        assert_eq!(*img.get_pixel(0, 0), Rgba([200, 100, 255, 255]));
        adjust_brightness(&mut img, 0.0);
        assert_eq!(*img.get_pixel(1, 1), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn tint_opacity_bounds() {
        let base = RgbaImage::from_pixel(2, 2, Rgba([100, 50, 200, 255]));
        let mut img = base.clone();
        apply_tint(&mut img, Rgba([255, 0, 0, 255]), 0.0);
        assert_eq!(img, base);
        apply_tint(&mut img, Rgba([255, 0, 0, 255]), 1.0);
        assert!(img.pixels().all(|p| *p == Rgba([255, 0, 0, 255])));
    }

    #[test]
    fn tint_covers_transparent_pixels() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([180, 120, 60, 0]));
        apply_tint(&mut img, Rgba([10, 200, 30, 255]), 1.0);
        assert!(img.pixels().all(|p| *p == Rgba([10, 200, 30, 255])));

        let mut img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 0]));
        apply_tint(&mut img, Rgba([10, 200, 30, 128]), 0.5);
        assert_eq!(img.get_pixel(0, 0)[3], 64);
    }

    #[test]
    fn dilate_grows_by_radius() {
        let mut mask = GrayImage::new(1, 1);
        mask.put_pixel(0, 0, Luma([255]));
        let grown = dilate(&mask, 2);
        assert_eq!(grown.dimensions(), (5, 5));
        assert_eq!(grown.get_pixel(2, 0)[0], 255);
        assert_eq!(grown.get_pixel(0, 2)[0], 255);
        assert_eq!(grown.get_pixel(0, 0)[0], 0);

        let mut ring = grown.clone();
        subtract_mask(&mut ring, &mask, 2);
        assert_eq!(ring.get_pixel(2, 2)[0], 0);
        assert_eq!(ring.get_pixel(2, 1)[0], 255);
    }

    #[test]
    fn composite_mask_clips_to_image() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let mask = GrayImage::from_pixel(3, 3, Luma([255]));
        composite_mask(&mut img, &mask, -1, 2, Rgba([255, 255, 255, 255]));
        assert_eq!(*img.get_pixel(0, 2), Rgba([255, 255, 255, 255]));
        assert_eq!(*img.get_pixel(1, 3), Rgba([255, 255, 255, 255]));
        assert_eq!(*img.get_pixel(2, 2), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(0, 1), Rgba([0, 0, 0, 255]));
    }
}
