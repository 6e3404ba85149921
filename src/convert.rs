//! Software raw to RGB24 conversion.
//!
//! Baseline converter used by drivers that have no vendor conversion routine.
//! Supported inputs are `YUYV`, `RGB3`, `GREY` and 8-bit Bayer (`RGGB`, `BA81`).
//! Named illuminant matrices are vendor-calibrated data and are applied as
//! identity; only [`CorrectionMatrix::Custom`] changes colors.

use crate::traits::{
    CameraError, ConversionParams, CorrectionMatrix, DemosaicMethod, FourCC, ImageFormat, Result,
    Roi,
};

/// Per-channel gains produced by a white-balance pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelGains {
    /// Red gain.
    pub red: f32,
    /// Green gain.
    pub green: f32,
    /// Blue gain.
    pub blue: f32,
}

impl Default for ChannelGains {
    fn default() -> Self {
        Self {
            red: 1.0,
            green: 1.0,
            blue: 1.0,
        }
    }
}

/// Convert one raw frame to packed RGB24.
///
/// `dest` must be exactly `format.rgb24_size()` bytes and `raw` must hold at
/// least one full frame of `format.pixel_format`. Raw rows start every
/// `format.stride` bytes.
///
/// # Errors
///
/// Returns `UnsupportedFormat` for pixel formats the converter does not know,
/// `Conversion` when the stride cannot hold a row and `BufferSize` when either
/// buffer is too small.
pub fn convert_to_rgb24(
    raw: &[u8],
    format: &ImageFormat,
    params: &ConversionParams,
    dest: &mut [u8],
) -> Result<()> {
    let bpp = format
        .pixel_format
        .bytes_per_pixel()
        .ok_or(CameraError::UnsupportedFormat(format.pixel_format))?;

    let row_bytes = format.width as usize * bpp as usize;
    let stride = format.stride as usize;
    if stride < row_bytes {
        return Err(CameraError::Conversion(format!(
            "stride of {stride} bytes is shorter than a {row_bytes} byte row"
        )));
    }
    // The last row may stop right after its pixels
    let expected_raw = match format.height as usize {
        0 => 0,
        height => stride * (height - 1) + row_bytes,
    };
    if raw.len() < expected_raw {
        return Err(CameraError::BufferSize {
            expected: expected_raw,
            actual: raw.len(),
        });
    }
    if dest.len() != format.rgb24_size() {
        return Err(CameraError::BufferSize {
            expected: format.rgb24_size(),
            actual: dest.len(),
        });
    }
    if format.pixel_count() == 0 {
        return Ok(());
    }

    let row_len = format.width as usize * 3;
    match format.pixel_format {
        FourCC::YUYV => decode_rows(raw, stride, dest, row_len, decode_yuyv),
        FourCC::RGB3 => decode_rows(raw, stride, dest, row_len, |row, out| {
            if let Some(pixels) = row.get(..out.len()) {
                out.copy_from_slice(pixels);
            }
        }),
        FourCC::GREY => decode_rows(raw, stride, dest, row_len, decode_grey),
        FourCC::RGGB => demosaic(raw, format, BayerPattern::Rggb, params.demosaic_method, dest),
        FourCC::BA81 => demosaic(raw, format, BayerPattern::Bggr, params.demosaic_method, dest),
        other => return Err(CameraError::UnsupportedFormat(other)),
    }

    if let Some(color) = ColorStage::new(params) {
        for pixel in dest.chunks_exact_mut(3) {
            color.apply(pixel);
        }
    }

    if params.flip_x || params.flip_y {
        flip(dest, format.width as usize, format.height as usize, params.flip_x, params.flip_y);
    }

    Ok(())
}

/// Gains that bring the red and blue channel means of `roi` to the green mean.
///
/// `rgb` is a packed RGB24 image `width` pixels wide. The region is clipped to
/// the image; channels with a zero mean keep a gain of 1.
#[must_use]
pub fn white_balance_gains(rgb: &[u8], width: u32, roi: Roi) -> ChannelGains {
    let width = width as usize;
    if width == 0 {
        return ChannelGains::default();
    }
    let height = rgb.len() / (width * 3);

    let x_start = (roi.x as usize).min(width);
    let x_end = (roi.x as usize + roi.width as usize).min(width);
    let y_start = (roi.y as usize).min(height);
    let y_end = (roi.y as usize + roi.height as usize).min(height);

    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for row in rgb.chunks_exact(width * 3).take(y_end).skip(y_start) {
        for pixel in row.chunks_exact(3).take(x_end).skip(x_start) {
            for (sum, value) in sums.iter_mut().zip(pixel) {
                *sum += u64::from(*value);
            }
            count += 1;
        }
    }

    if count == 0 {
        return ChannelGains::default();
    }

    #[allow(clippy::cast_precision_loss)]
    let [r, g, b] = sums.map(|sum| sum as f32 / count as f32);
    let gain = |mean: f32| if mean > 0.0 { g / mean } else { 1.0 };

    ChannelGains {
        red: gain(r),
        green: 1.0,
        blue: gain(b),
    }
}

/// Convert YUV values to RGB.
///
/// Uses the ITU-R BT.601 conversion formula.
#[must_use]
#[allow(clippy::many_single_char_names)]
pub fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

fn clamp_u8(val: f32) -> u8 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        val.clamp(0.0, 255.0) as u8
    }
}

fn decode_rows<F>(raw: &[u8], stride: usize, dest: &mut [u8], row_len: usize, decode: F)
where
    F: Fn(&[u8], &mut [u8]),
{
    for (row, out) in raw.chunks(stride).zip(dest.chunks_exact_mut(row_len)) {
        decode(row, out);
    }
}

fn decode_yuyv(raw: &[u8], dest: &mut [u8]) {
    // [Y0 U Y1 V] covers two pixels
    for (src, out) in raw.chunks_exact(4).zip(dest.chunks_mut(6)) {
        let &[y0, u, y1, v] = src else { continue };
        let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
        let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
        for (slot, value) in out.iter_mut().zip([r0, g0, b0, r1, g1, b1]) {
            *slot = value;
        }
    }
}

fn decode_grey(raw: &[u8], dest: &mut [u8]) {
    for (value, out) in raw.iter().zip(dest.chunks_exact_mut(3)) {
        out.fill(*value);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BayerPattern {
    Rggb,
    Bggr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    const fn offset(self) -> usize {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }
}

impl BayerPattern {
    const fn channel_at(self, x: usize, y: usize) -> Channel {
        match (x % 2, y % 2, self) {
            (0, 0, Self::Rggb) | (1, 1, Self::Bggr) => Channel::Red,
            (1, 1, Self::Rggb) | (0, 0, Self::Bggr) => Channel::Blue,
            _ => Channel::Green,
        }
    }
}

struct Mosaic<'a> {
    raw: &'a [u8],
    stride: usize,
    width: usize,
    height: usize,
    pattern: BayerPattern,
}

impl Mosaic<'_> {
    fn sample(&self, x: usize, y: usize) -> u32 {
        self.raw
            .get(y * self.stride + x)
            .copied()
            .map_or(0, u32::from)
    }

    /// Nearest neighbour: every pixel of a 2x2 cell shares the cell's colors.
    fn nearest(&self, x: usize, y: usize) -> [u8; 3] {
        let x0 = x & !1;
        let y0 = y & !1;
        let mut sums = [0u32; 3];
        let mut counts = [0u32; 3];
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let sx = (x0 + dx).min(self.width - 1);
            let sy = (y0 + dy).min(self.height - 1);
            let channel = self.pattern.channel_at(sx, sy).offset();
            if let (Some(sum), Some(count)) = (sums.get_mut(channel), counts.get_mut(channel)) {
                *sum += self.sample(sx, sy);
                *count += 1;
            }
        }
        average(sums, counts)
    }

    /// Bilinear: missing channels are averaged from same-colored neighbours.
    fn bilinear(&self, x: usize, y: usize) -> [u8; 3] {
        let own = self.pattern.channel_at(x, y).offset();
        let mut sums = [0u32; 3];
        let mut counts = [0u32; 3];
        for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                let channel = self.pattern.channel_at(nx, ny).offset();
                let is_self = nx == x && ny == y;
                if channel == own && !is_self {
                    continue;
                }
                if let (Some(sum), Some(count)) = (sums.get_mut(channel), counts.get_mut(channel)) {
                    *sum += self.sample(nx, ny);
                    *count += 1;
                }
            }
        }
        average(sums, counts)
    }
}

fn average(sums: [u32; 3], counts: [u32; 3]) -> [u8; 3] {
    let mut out = [0u8; 3];
    for ((slot, sum), count) in out.iter_mut().zip(sums).zip(counts) {
        if count > 0 {
            #[allow(clippy::cast_possible_truncation)]
            {
                *slot = (sum / count).min(255) as u8;
            }
        }
    }
    out
}

fn demosaic(
    raw: &[u8],
    format: &ImageFormat,
    pattern: BayerPattern,
    method: DemosaicMethod,
    dest: &mut [u8],
) {
    let width = format.width as usize;
    let height = format.height as usize;
    if width == 0 || height == 0 {
        return;
    }
    let mosaic = Mosaic {
        raw,
        stride: format.stride as usize,
        width,
        height,
        pattern,
    };

    for (index, out) in dest.chunks_exact_mut(3).enumerate() {
        let x = index % width;
        let y = index / width;
        let rgb = match method {
            DemosaicMethod::Simple | DemosaicMethod::Fast => mosaic.nearest(x, y),
            DemosaicMethod::HighQuality => mosaic.bilinear(x, y),
        };
        out.copy_from_slice(&rgb);
    }
}

/// Per-pixel color adjustments; `None` when every adjustment is identity.
struct ColorStage {
    gains: [f32; 3],
    matrix: Option<[f32; 9]>,
    hue_sat: Option<(f32, f32, f32)>,
}

impl ColorStage {
    fn new(params: &ConversionParams) -> Option<Self> {
        let gains = if params.use_color_gains_over_wb {
            [
                params.digital_gain_red,
                params.digital_gain_green,
                params.digital_gain_blue,
            ]
        } else {
            [1.0; 3]
        };
        let matrix = match params.correction_matrix {
            CorrectionMatrix::Custom(matrix) => Some(matrix),
            CorrectionMatrix::None
            | CorrectionMatrix::Fluorescent
            | CorrectionMatrix::Daylight
            | CorrectionMatrix::Incandescent => None,
        };
        #[allow(clippy::float_cmp)]
        let hue_sat = (params.hue != 0.0 || params.saturation != 1.0).then(|| {
            let (sin, cos) = params.hue.to_radians().sin_cos();
            (sin, cos, params.saturation)
        });

        #[allow(clippy::float_cmp)]
        let unity_gains = gains.iter().all(|gain| *gain == 1.0);
        if unity_gains && matrix.is_none() && hue_sat.is_none() {
            return None;
        }
        Some(Self {
            gains,
            matrix,
            hue_sat,
        })
    }

    #[allow(clippy::many_single_char_names)]
    fn apply(&self, pixel: &mut [u8]) {
        let &mut [r, g, b] = pixel else { return };
        let [gr, gg, gb] = self.gains;
        let mut r = f32::from(r) * gr;
        let mut g = f32::from(g) * gg;
        let mut b = f32::from(b) * gb;

        if let Some(m) = self.matrix {
            let [m0, m1, m2, m3, m4, m5, m6, m7, m8] = m;
            let (r0, g0, b0) = (r, g, b);
            r = m2.mul_add(b0, m0.mul_add(r0, m1 * g0));
            g = m5.mul_add(b0, m3.mul_add(r0, m4 * g0));
            b = m8.mul_add(b0, m6.mul_add(r0, m7 * g0));
        }

        if let Some((sin, cos, saturation)) = self.hue_sat {
            let y = 0.114f32.mul_add(b, 0.299f32.mul_add(r, 0.587 * g));
            let cb = b - y;
            let cr = r - y;
            let cb_rot = cb.mul_add(cos, -(cr * sin)) * saturation;
            let cr_rot = cb.mul_add(sin, cr * cos) * saturation;
            r = y + cr_rot;
            b = y + cb_rot;
            g = 0.114f32.mul_add(-b, 0.299f32.mul_add(-r, y)) / 0.587;
        }

        for (slot, value) in pixel.iter_mut().zip([r, g, b]) {
            *slot = clamp_u8(value);
        }
    }
}

fn flip(dest: &mut [u8], width: usize, height: usize, flip_x: bool, flip_y: bool) {
    let row_len = width * 3;
    if flip_x {
        for row in dest.chunks_exact_mut(row_len) {
            let pixels = row.len() / 3;
            for left in 0..pixels / 2 {
                let right = pixels - 1 - left;
                for channel in 0..3 {
                    row.swap(left * 3 + channel, right * 3 + channel);
                }
            }
        }
    }
    if flip_y && height > 1 {
        let (mut top, mut bottom) = (0, height - 1);
        while top < bottom {
            let (upper, lower) = dest.split_at_mut(bottom * row_len);
            if let (Some(a), Some(b)) = (
                upper.get_mut(top * row_len..(top + 1) * row_len),
                lower.get_mut(..row_len),
            ) {
                a.swap_with_slice(b);
            }
            top += 1;
            bottom -= 1;
        }
    }
}
