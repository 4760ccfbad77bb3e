//! Greedy caption wrapping.
//!
//! Lines are broken on a character budget derived from the average advance
//! of the Latin alphabet rather than on exact pixel widths. Wide glyphs can
//! therefore push a line slightly past the pixel target; rendered output
//! depends on this, so keep it approximate.

use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::font::Font;

const SAMPLE_GLYPHS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedTextBlock {
    pub lines: Vec<String>,
    /// Width of the widest line.
    pub width: u32,
    /// `line_height + (lines - 1) * line_advance`.
    pub height: u32,
    pub line_height: u32,
    /// Distance between consecutive line tops.
    pub line_advance: u32,
}

/// Mean advance of `a-z` and `A-Z`.
pub fn average_glyph_width(font: &Font) -> f32 {
    let total: f32 = SAMPLE_GLYPHS.chars().map(|ch| font.char_width(ch)).sum();
    total / SAMPLE_GLYPHS.len() as f32
}

/// Characters per line for a pixel budget, never below one.
pub fn chars_per_line(font: &Font, wrap_width_px: u32) -> usize {
    let average = average_glyph_width(font);
    if average <= 0.0 {
        return 1;
    }
    ((wrap_width_px as f32 / average).floor() as usize).max(1)
}

/// Greedy fill: words are appended while the line stays within `budget`
/// characters; a word longer than the budget gets a line of its own.
pub fn wrap_words(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if current_len == 0 {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= budget {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Advance between line tops for a spacing percentage (100 = natural).
pub fn line_advance(line_height: u32, line_spacing_percentage: f64) -> u32 {
    (f64::from(line_height) * line_spacing_percentage / 100.0)
        .round()
        .max(0.0) as u32
}

/// Wraps `text` for a `wrap_width_px` budget and measures the block.
///
/// The same `line_advance` is used here for sizing and later for drawing,
/// so the panel always fits the lines it holds.
pub fn wrap(
    text: &str,
    font: &Font,
    wrap_width_px: u32,
    line_spacing_percentage: f64,
) -> RenderResult<WrappedTextBlock> {
    if wrap_width_px == 0 {
        return Err(RenderError::InvalidWrapWidth(0.0));
    }

    let budget = chars_per_line(font, wrap_width_px);
    let lines = wrap_words(text, budget);
    let width = lines
        .iter()
        .map(|line| font.text_width(line))
        .max()
        .unwrap_or(0);
    let line_height = font.line_height();
    let advance = line_advance(line_height, line_spacing_percentage);
    let height = line_height + advance * (lines.len().saturating_sub(1)) as u32;

    debug!(
        wrap_width_px,
        budget,
        lines = lines.len(),
        width,
        height,
        "wrapped caption"
    );

    Ok(WrappedTextBlock {
        lines,
        width,
        height,
        line_height,
        line_advance: advance,
    })
}
