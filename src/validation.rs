//! Converted-frame validation for test pattern verification.
//!
//! These checks run on RGB24 images as produced by the conversion step, so a
//! passing check covers both capture and conversion.

use crate::traits::{CameraError, Result, Size};

/// RGB of the eight 100% bars, left to right: white, yellow, cyan, green,
/// magenta, red, blue, black.
const SMPTE_COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 235, 235),
    (235, 235, 11),
    (12, 236, 237),
    (13, 237, 13),
    (237, 13, 237),
    (238, 14, 13),
    (15, 15, 239),
    (16, 16, 16),
];

/// Per-channel slack for YUV rounding.
const COLOR_TOLERANCE: u8 = 15;

/// Smallest left-to-right luma rise accepted as a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// RGB values of pixel (`x`, `y`) in a packed RGB24 image.
#[must_use]
pub fn pixel_at(rgb: &[u8], size: Size, x: u32, y: u32) -> Option<(u8, u8, u8)> {
    if x >= size.width || y >= size.height {
        return None;
    }
    let offset = (y as usize * size.width as usize + x as usize) * 3;
    match rgb.get(offset..offset + 3)? {
        &[r, g, b] => Some((r, g, b)),
        _ => None,
    }
}

fn sample(rgb: &[u8], size: Size, x: u32, y: u32) -> Result<(u8, u8, u8)> {
    pixel_at(rgb, size, x, y)
        .ok_or_else(|| CameraError::StreamError(format!("pixel ({x}, {y}) is outside the image")))
}

/// Check the middle row against the eight color bars, one sample per bar.
pub fn validate_color_bars(rgb: &[u8], size: Size) -> Result<()> {
    let bar_width = size.width / 8;
    let row = size.height / 2;

    for (bar, expected) in (0u32..).zip(SMPTE_COLOR_BARS) {
        let x = bar * bar_width + bar_width / 2;
        let actual = sample(rgb, size, x, row)?;
        if !colors_match(actual, expected) {
            return Err(CameraError::StreamError(format!(
                "bar {bar} at ({x}, {row}) is RGB{actual:?}, expected RGB{expected:?}"
            )));
        }
    }
    Ok(())
}

/// Check that luma along the middle row never falls and rises enough overall.
pub fn validate_gradient(rgb: &[u8], size: Size) -> Result<()> {
    let row = size.height / 2;
    let mut range: Option<(f32, f32)> = None;

    for x in (0..size.width).step_by(10) {
        let value = luma(sample(rgb, size, x, row)?);
        range = match range {
            // One step of rounding slack
            Some((_, last)) if value < last - 1.0 => {
                return Err(CameraError::StreamError(format!(
                    "luma falls from {last} to {value} at x={x}"
                )));
            }
            Some((first, _)) => Some((first, value)),
            None => Some((value, value)),
        };
    }

    match range {
        Some((first, last)) if last - first < MIN_GRADIENT_RISE => {
            Err(CameraError::StreamError(format!(
                "luma only rises by {} across the row",
                last - first
            )))
        }
        _ => Ok(()),
    }
}

/// Rec. 601 luma.
fn luma((r, g, b): (u8, u8, u8)) -> f32 {
    0.114f32.mul_add(f32::from(b), 0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)))
}

fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8)) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;
    [(ar, er), (ag, eg), (ab, eb)]
        .into_iter()
        .all(|(a, e)| a.abs_diff(e) <= COLOR_TOLERANCE)
}
