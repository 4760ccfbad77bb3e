use std::fmt;
use std::str::FromStr;

use image::Rgba;
use serde::{Deserialize, Serialize};

/// Family name of the font that is always available.
pub const BUILTIN_FONT_FAMILY: &str = "builtin-mono";

/// RGBA color, serialized as `#RRGGBB` (opaque) or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(pub [u8; 4]);

impl Color {
    pub const BLACK: Color = Color([0, 0, 0, 255]);
    pub const WHITE: Color = Color([255, 255, 255, 255]);

    pub fn rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02X}{g:02X}{b:02X}")
        } else {
            write!(f, "#{r:02X}{g:02X}{b:02X}{a:02X}")
        }
    }
}

impl FromStr for Color {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        parse_color(raw).ok_or_else(|| format!("invalid color: {raw}"))
    }
}

impl TryFrom<String> for Color {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.to_string()
    }
}

fn hex_pair(hex: &str, at: usize) -> Option<u8> {
    u8::from_str_radix(hex.get(at..at + 2)?, 16).ok()
}

/// Accepts `#RGB`, `#RRGGBB`, `#RRGGBBAA` and `rgba(r, g, b, a)` where
/// `a` is either a 0..=1 fraction or a 0..=255 byte.
pub fn parse_color(raw: &str) -> Option<Color> {
    let s = raw.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return match hex.len() {
            3 => {
                let mut out = [0u8, 0, 0, 255];
                for (slot, ch) in out.iter_mut().zip(hex.chars()) {
                    *slot = ch.to_digit(16)? as u8 * 17;
                }
                Some(Color(out))
            }
            6 => Some(Color([
                hex_pair(hex, 0)?,
                hex_pair(hex, 2)?,
                hex_pair(hex, 4)?,
                255,
            ])),
            8 => Some(Color([
                hex_pair(hex, 0)?,
                hex_pair(hex, 2)?,
                hex_pair(hex, 4)?,
                hex_pair(hex, 6)?,
            ])),
            _ => None,
        };
    }

    let lower = s.to_ascii_lowercase();
    if lower.starts_with("rgba(") && lower.ends_with(')') {
        let body = &lower[5..lower.len() - 1];
        let parts: Vec<&str> = body.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return None;
        }
        let channel = |v: &str| -> Option<u8> {
            Some(v.parse::<f64>().ok()?.round().clamp(0.0, 255.0) as u8)
        };
        let alpha_value = parts[3].parse::<f64>().ok()?;
        let a = if alpha_value <= 1.0 {
            (alpha_value * 255.0).round().clamp(0.0, 255.0) as u8
        } else {
            alpha_value.round().clamp(0.0, 255.0) as u8
        };
        return Some(Color([
            channel(parts[0])?,
            channel(parts[1])?,
            channel(parts[2])?,
            a,
        ]));
    }

    None
}

/// Edge the panel (and the watermark) is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverlayPosition {
    Top,
    Bottom,
}

/// Typography, layout and color parameters for one render.
///
/// Percentages are resolution independent: they are turned into pixels
/// against the dimensions of whichever image is being rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    pub font_family: String,
    pub font_size: u32,
    pub text_color: Color,
    pub stroke_color: Color,
    pub stroke_width: u32,
    pub wrap_width_percentage: f64,
    pub line_spacing_percentage: f64,
    pub vertical_padding_percentage: f64,
    pub horizontal_padding_percentage: f64,
    pub overlay_margin_percentage: f64,
    pub position: OverlayPosition,
    pub brightness: i32,
    pub tint_enabled: bool,
    pub tint_color: Color,
    pub tint_opacity: f64,
    pub include_overlay: bool,
    pub watermark_font_size: u32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            font_family: BUILTIN_FONT_FAMILY.to_string(),
            font_size: 24,
            text_color: Color::BLACK,
            stroke_color: Color::WHITE,
            stroke_width: 0,
            wrap_width_percentage: 80.0,
            line_spacing_percentage: 100.0,
            vertical_padding_percentage: 3.0,
            horizontal_padding_percentage: 3.0,
            overlay_margin_percentage: 10.0,
            position: OverlayPosition::Bottom,
            brightness: 0,
            tint_enabled: false,
            tint_color: Color::BLACK,
            tint_opacity: 0.5,
            include_overlay: true,
            watermark_font_size: 24,
        }
    }
}

impl OverlaySettings {
    /// Multiplicative brightness factor, `1 + delta / 255`.
    pub fn brightness_factor(&self) -> f64 {
        1.0 + f64::from(self.brightness.clamp(-255, 255)) / 255.0
    }

    pub fn tint_alpha(&self) -> f64 {
        self.tint_opacity.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_rgba_forms() {
        assert_eq!(parse_color("#fff"), Some(Color([255, 255, 255, 255])));
        assert_eq!(parse_color("#FF3B30"), Some(Color([255, 59, 48, 255])));
        assert_eq!(parse_color("#00000080"), Some(Color([0, 0, 0, 128])));
        assert_eq!(
            parse_color("rgba(10, 20, 30, 0.5)"),
            Some(Color([10, 20, 30, 128]))
        );
        assert_eq!(parse_color("rgba(10,20,30,200)"), Some(Color([10, 20, 30, 200])));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("#GG0000"), None);
    }

    #[test]
    fn color_display_round_trips() {
        for raw in ["#000000", "#FFFFFF", "#0A84FF", "#11223344"] {
            let color: Color = raw.parse().unwrap();
            assert_eq!(color.to_string(), raw);
        }
    }

    #[test]
    fn brightness_factor_spans_black_to_double() {
        let mut settings = OverlaySettings::default();
        settings.brightness = -255;
        assert_eq!(settings.brightness_factor(), 0.0);
        settings.brightness = 0;
        assert_eq!(settings.brightness_factor(), 1.0);
        settings.brightness = 255;
        assert_eq!(settings.brightness_factor(), 2.0);
        settings.brightness = 900;
        assert_eq!(settings.brightness_factor(), 2.0);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings: OverlaySettings = serde_json::from_str(
            r##"{"font_size": 40, "position": "top", "tint_color": "#336699"}"##,
        )
        .unwrap();
        assert_eq!(settings.font_size, 40);
        assert_eq!(settings.position, OverlayPosition::Top);
        assert_eq!(settings.tint_color, Color([0x33, 0x66, 0x99, 255]));
        assert_eq!(settings.font_family, BUILTIN_FONT_FAMILY);
        assert_eq!(settings.wrap_width_percentage, 80.0);
    }

    #[test]
    fn invalid_color_in_json_is_rejected() {
        let parsed = serde_json::from_str::<OverlaySettings>(r#"{"text_color": "blue"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn defaults_survive_json() {
        let defaults = OverlaySettings::default();
        let raw = serde_json::to_string(&defaults).unwrap();
        let back: OverlaySettings = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, defaults);
    }
}
