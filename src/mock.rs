//! Mock driver implementation for testing without hardware.
//!
//! Clones of a [`MockDriver`] share state, so a test can hand one clone to a
//! [`Camera`](crate::camera::Camera) and inspect the recorded calls through
//! another.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::convert::{self, ChannelGains};
use crate::traits::{
    CameraDriver, CameraError, CameraSession, ConversionParams, FourCC, ImageFormat, Property,
    PropertyFlags, Result, Roi, StreamControl,
};

/// Driver call recorded by the mock, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// `open(index)`.
    Open(u32),
    /// `set_property(property, value, flags)`.
    SetProperty(Property, f32, PropertyFlags),
    /// `property(property)`.
    GetProperty(Property),
    /// `stream_control(control)`.
    StreamControl(StreamControl),
    /// `image_format()`.
    ImageFormat,
    /// `one_shot_auto_white_balance(roi)`.
    OneShotAutoWhiteBalance(Roi),
    /// `digital_white_balance(roi)`.
    DigitalWhiteBalance(Roi),
    /// `take_video(..)`.
    TakeVideo,
    /// `convert_frame_to_rgb24(..)`.
    Convert,
    /// `close()`.
    Close,
}

/// Operation class that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Opening the device.
    Open,
    /// Writing properties.
    SetProperty,
    /// Reading properties.
    GetProperty,
    /// Starting or stopping the stream.
    StreamControl,
    /// Querying the image format.
    ImageFormat,
    /// Either white-balance pass.
    WhiteBalance,
    /// Pulling a frame.
    TakeVideo,
    /// Converting a frame.
    Convert,
    /// Closing the session.
    Close,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

#[derive(Debug)]
struct MockState {
    format: ImageFormat,
    pattern: TestPattern,
    calls: Vec<MockCall>,
    failing: HashSet<MockOp>,
    properties: HashMap<Property, (f32, PropertyFlags)>,
    fixed_gains: Option<ChannelGains>,
    streaming: bool,
    frames_taken: u32,
}

impl MockState {
    fn record(&mut self, call: MockCall, op: MockOp) -> Result<()> {
        self.calls.push(call);
        if self.failing.contains(&op) {
            return Err(injected(op));
        }
        Ok(())
    }
}

fn injected(op: MockOp) -> CameraError {
    CameraError::StreamError(format!("injected failure: {op:?}"))
}

/// Mock driver for testing without hardware.
#[derive(Debug, Clone)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a mock with a 640x480 YUYV color-bar camera.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                format: ImageFormat::new(640, 480, FourCC::YUYV),
                pattern: TestPattern::ColorBars,
                calls: Vec::new(),
                failing: HashSet::new(),
                properties: HashMap::new(),
                fixed_gains: None,
                streaming: false,
                frames_taken: 0,
            })),
        }
    }

    /// Set the raw format reported by the device.
    #[must_use]
    pub fn with_format(self, format: ImageFormat) -> Self {
        self.state.lock().format = format;
        self
    }

    /// Set the pattern of generated frames.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.state.lock().pattern = pattern;
        self
    }

    /// Make digital white balance store these gains instead of measuring them.
    #[must_use]
    pub fn with_digital_gains(self, red: f32, green: f32, blue: f32) -> Self {
        self.state.lock().fixed_gains = Some(ChannelGains { red, green, blue });
        self
    }

    /// Make every call of `op` fail.
    #[must_use]
    pub fn failing(self, op: MockOp) -> Self {
        self.set_failing(op, true);
        self
    }

    /// Turn failure injection for `op` on or off.
    pub fn set_failing(&self, op: MockOp, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(op);
        } else {
            state.failing.remove(&op);
        }
    }

    /// Calls recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Whether the device is currently streaming.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Number of frames pulled so far.
    #[must_use]
    pub fn frames_taken(&self) -> u32 {
        self.state.lock().frames_taken
    }
}

impl CameraDriver for MockDriver {
    type Session = MockSession;

    fn open(&mut self, index: u32) -> Result<Self::Session> {
        self.state.lock().record(MockCall::Open(index), MockOp::Open)?;
        if index == 0 {
            return Err(CameraError::DeviceNotFound(index));
        }
        Ok(MockSession {
            state: Arc::clone(&self.state),
        })
    }
}

/// Session handed out by [`MockDriver`].
#[derive(Debug)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl CameraSession for MockSession {
    fn set_property(
        &mut self,
        property: Property,
        value: f32,
        flags: PropertyFlags,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.record(
            MockCall::SetProperty(property, value, flags),
            MockOp::SetProperty,
        )?;
        state.properties.insert(property, (value, flags));
        Ok(())
    }

    fn property(&mut self, property: Property) -> Result<(f32, PropertyFlags)> {
        let mut state = self.state.lock();
        state.record(MockCall::GetProperty(property), MockOp::GetProperty)?;
        let default = match property {
            Property::DigitalGainRed | Property::DigitalGainGreen | Property::DigitalGainBlue => 1.0,
            Property::Gain | Property::Exposure | Property::AutoExposureTarget => 0.0,
        };
        Ok(state
            .properties
            .get(&property)
            .copied()
            .unwrap_or((default, PropertyFlags::NONE)))
    }

    fn stream_control(&mut self, control: StreamControl) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::StreamControl(control), MockOp::StreamControl)?;
        state.streaming = control == StreamControl::Start;
        Ok(())
    }

    fn image_format(&mut self) -> Result<ImageFormat> {
        let mut state = self.state.lock();
        state.record(MockCall::ImageFormat, MockOp::ImageFormat)?;
        Ok(state.format)
    }

    fn one_shot_auto_white_balance(&mut self, roi: Roi) -> Result<()> {
        self.state
            .lock()
            .record(MockCall::OneShotAutoWhiteBalance(roi), MockOp::WhiteBalance)
    }

    fn digital_white_balance(&mut self, roi: Roi) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::DigitalWhiteBalance(roi), MockOp::WhiteBalance)?;

        let gains = match state.fixed_gains {
            Some(gains) => gains,
            None => {
                let format = state.format;
                let raw = generate_test_frame(&format, state.pattern);
                let mut rgb = vec![0u8; format.rgb24_size()];
                convert::convert_to_rgb24(&raw, &format, &ConversionParams::default(), &mut rgb)?;
                convert::white_balance_gains(&rgb, format.width, roi)
            }
        };

        for (property, gain) in [
            (Property::DigitalGainRed, gains.red),
            (Property::DigitalGainGreen, gains.green),
            (Property::DigitalGainBlue, gains.blue),
        ] {
            state.properties.insert(property, (gain, PropertyFlags::NONE));
        }
        Ok(())
    }

    fn take_video(&mut self, dest: &mut [u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.record(MockCall::TakeVideo, MockOp::TakeVideo)?;

        let frame = generate_test_frame(&state.format, state.pattern);
        if dest.len() != frame.len() {
            return Err(CameraError::BufferSize {
                expected: frame.len(),
                actual: dest.len(),
            });
        }
        dest.copy_from_slice(&frame);
        state.frames_taken += 1;
        Ok(())
    }

    fn convert_frame_to_rgb24(
        &mut self,
        dest: &mut [u8],
        raw: &[u8],
        format: &ImageFormat,
        params: &ConversionParams,
    ) -> Result<()> {
        self.state.lock().record(MockCall::Convert, MockOp::Convert)?;
        convert::convert_to_rgb24(raw, format, params, dest)
    }

    fn close(self) -> Result<()> {
        self.state.lock().record(MockCall::Close, MockOp::Close)
    }
}

/// Generate one raw frame of `format` showing `pattern`.
///
/// Patterns are drawn in YUYV; other pixel formats are derived from it. Rows
/// are padded with zeros up to `format.stride`.
#[must_use]
pub fn generate_test_frame(format: &ImageFormat, pattern: TestPattern) -> Vec<u8> {
    let packed = packed_test_frame(format, pattern);
    let row_bytes = ImageFormat::new(format.width, 1, format.pixel_format).image_size as usize;
    let stride = format.stride as usize;
    if stride <= row_bytes || row_bytes == 0 {
        return packed;
    }

    let mut frame = vec![0u8; format.image_size as usize];
    for (src, dest) in packed.chunks(row_bytes).zip(frame.chunks_mut(stride)) {
        if let Some(pixels) = dest.get_mut(..src.len()) {
            pixels.copy_from_slice(src);
        }
    }
    frame
}

fn packed_test_frame(format: &ImageFormat, pattern: TestPattern) -> Vec<u8> {
    let packed_format = ImageFormat::new(format.width, format.height, format.pixel_format);
    let yuyv_format = ImageFormat::new(format.width, format.height, FourCC::YUYV);
    let mut yuyv = vec![0u8; yuyv_format.image_size as usize];

    match pattern {
        TestPattern::ColorBars => {
            generate_color_bars(&mut yuyv, format.width, format.height);
        }
        TestPattern::Gradient => {
            generate_gradient(&mut yuyv, format.width, format.height);
        }
        TestPattern::Solid(y, u, v) => {
            generate_solid(&mut yuyv, y, u, v);
        }
    }

    match format.pixel_format {
        FourCC::YUYV => yuyv,
        FourCC::GREY => yuyv.iter().step_by(2).copied().collect(),
        other => {
            let mut rgb = vec![0u8; yuyv_format.rgb24_size()];
            if convert::convert_to_rgb24(&yuyv, &yuyv_format, &ConversionParams::default(), &mut rgb)
                .is_err()
            {
                return vec![0u8; packed_format.image_size as usize];
            }
            match other {
                FourCC::RGGB => mosaic(&rgb, format.width, [0, 1, 1, 2]),
                FourCC::BA81 => mosaic(&rgb, format.width, [2, 1, 1, 0]),
                _ => {
                    let mut frame = rgb;
                    frame.resize(packed_format.image_size as usize, 0);
                    frame
                }
            }
        }
    }
}

/// Sample one channel per pixel; `cell` lists the channel of each 2x2 position.
fn mosaic(rgb: &[u8], width: u32, cell: [usize; 4]) -> Vec<u8> {
    let width = width as usize;
    rgb.chunks_exact(3)
        .enumerate()
        .map(|(index, pixel)| {
            let x = index % width.max(1);
            let y = index / width.max(1);
            let channel = cell.get((y % 2) * 2 + x % 2).copied().unwrap_or(1);
            pixel.get(channel).copied().unwrap_or(0)
        })
        .collect()
}

/// Generate YUYV color bars pattern.
fn generate_color_bars(data: &mut [u8], width: u32, height: u32) {
    // White, Yellow, Cyan, Green, Magenta, Red, Blue, Black
    let bars: [(u8, u8, u8); 8] = [
        (235, 128, 128),
        (210, 16, 146),
        (170, 166, 16),
        (145, 54, 34),
        (106, 202, 222),
        (81, 90, 240),
        (41, 240, 110),
        (16, 128, 128),
    ];

    let bar_width = (width / 8).max(1);

    for y in 0..height {
        for x in (0..width).step_by(2) {
            let bar_idx = (x / bar_width).min(7) as usize;
            let Some(&(y_val, u_val, v_val)) = bars.get(bar_idx) else {
                continue;
            };
            let offset = ((y * width + x) * 2) as usize;
            if let Some(px) = data.get_mut(offset..offset + 4) {
                px.copy_from_slice(&[y_val, u_val, y_val, v_val]);
            }
        }
    }
}

/// Generate YUYV horizontal gradient pattern.
fn generate_gradient(data: &mut [u8], width: u32, height: u32) {
    for y in 0..height {
        for x in (0..width).step_by(2) {
            #[allow(clippy::cast_possible_truncation)]
            let y_val = ((x * 255) / width) as u8;
            let offset = ((y * width + x) * 2) as usize;
            if let Some(px) = data.get_mut(offset..offset + 4) {
                px.copy_from_slice(&[y_val, 128, y_val, 128]);
            }
        }
    }
}

/// Generate solid color YUYV frame.
fn generate_solid(data: &mut [u8], y: u8, u: u8, v: u8) {
    for px in data.chunks_exact_mut(4) {
        px.copy_from_slice(&[y, u, y, v]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_open_records_call() {
        let mut driver = MockDriver::new();
        let session = driver.open(1).expect("open should succeed");
        session.close().expect("close should succeed");
        assert_eq!(driver.calls(), vec![MockCall::Open(1), MockCall::Close]);
    }

    #[test]
    fn test_mock_rejects_index_zero() {
        let mut driver = MockDriver::new();
        assert!(matches!(driver.open(0), Err(CameraError::DeviceNotFound(0))));
    }

    #[test]
    fn test_mock_failure_injection() {
        let mut driver = MockDriver::new().failing(MockOp::TakeVideo);
        let mut session = driver.open(1).expect("open should succeed");
        let mut frame = vec![0u8; 640 * 480 * 2];
        assert!(session.take_video(&mut frame).is_err());

        driver.set_failing(MockOp::TakeVideo, false);
        session.take_video(&mut frame).expect("take_video should succeed");
        assert_eq!(driver.frames_taken(), 1);
    }

    #[test]
    fn test_mock_stream_state() {
        let mut driver = MockDriver::new();
        let mut session = driver.open(1).expect("open should succeed");
        session.stream_control(StreamControl::Start).expect("start");
        assert!(driver.is_streaming());
        session.stream_control(StreamControl::Stop).expect("stop");
        assert!(!driver.is_streaming());
    }

    #[test]
    fn test_mock_measured_white_balance_on_tinted_frame() {
        // Solid YUV with strong blue chroma
        let mut driver = MockDriver::new()
            .with_format(ImageFormat::new(16, 16, FourCC::YUYV))
            .with_pattern(TestPattern::Solid(128, 160, 128));
        let mut session = driver.open(1).expect("open should succeed");
        session
            .digital_white_balance(Roi { x: 0, y: 0, width: 16, height: 16 })
            .expect("white balance should succeed");

        let (blue, _) = session.property(Property::DigitalGainBlue).expect("blue gain");
        let (red, _) = session.property(Property::DigitalGainRed).expect("red gain");
        assert!(blue < 1.0, "blue gain {blue}");
        assert!(blue < red, "blue gain {blue}, red gain {red}");
    }

    #[test]
    fn test_color_bars_pattern() {
        let format = ImageFormat::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::ColorBars);

        assert_eq!(data.len(), (640 * 480 * 2) as usize);
        // First bar should be white (Y=235)
        assert_eq!(data[0], 235);
    }

    #[test]
    fn test_gradient_pattern() {
        let format = ImageFormat::new(640, 480, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Gradient);

        // Left edge should be dark
        assert!(data[0] < 10);

        // Right edge should be bright (check last row, last pixel)
        let last_row_start = (479 * 640 * 2) as usize;
        let last_pixel_y = data[last_row_start + 638 * 2];
        assert!(last_pixel_y > 200);
    }

    #[test]
    fn test_solid_pattern() {
        let format = ImageFormat::new(64, 64, FourCC::YUYV);
        let data = generate_test_frame(&format, TestPattern::Solid(128, 64, 192));

        assert_eq!(data[0], 128);
        assert_eq!(data[2], 128);
        assert_eq!(data[1], 64);
        assert_eq!(data[3], 192);
    }

    #[test]
    fn test_derived_formats_have_image_size() {
        for fourcc in [FourCC::GREY, FourCC::RGB3, FourCC::RGGB, FourCC::BA81] {
            let format = ImageFormat::new(32, 8, fourcc);
            let data = generate_test_frame(&format, TestPattern::ColorBars);
            assert_eq!(data.len(), format.image_size as usize, "{fourcc:?}");
        }
    }

    #[test]
    fn test_padded_frame_matches_packed_pixels() {
        let packed = ImageFormat::new(8, 4, FourCC::YUYV);
        let padded = packed.with_stride(24);
        let data = generate_test_frame(&padded, TestPattern::ColorBars);
        assert_eq!(data.len(), 24 * 4);
        assert!(data[16..24].iter().all(|value| *value == 0), "padding is zeroed");

        let mut from_packed = vec![0u8; packed.rgb24_size()];
        let mut from_padded = vec![0u8; padded.rgb24_size()];
        let params = ConversionParams::default();
        let raw = generate_test_frame(&packed, TestPattern::ColorBars);
        convert::convert_to_rgb24(&raw, &packed, &params, &mut from_packed).expect("packed");
        convert::convert_to_rgb24(&data, &padded, &params, &mut from_padded).expect("padded");
        assert_eq!(from_packed, from_padded);
    }

    #[test]
    fn test_measured_white_balance_ignores_row_padding() {
        let format = ImageFormat::new(16, 16, FourCC::YUYV).with_stride(48);
        let mut driver = MockDriver::new()
            .with_format(format)
            .with_pattern(TestPattern::Gradient);
        let mut session = driver.open(1).expect("open should succeed");
        session
            .digital_white_balance(format.full_frame())
            .expect("white balance should succeed");

        let (red, _) = session.property(Property::DigitalGainRed).expect("red gain");
        let (blue, _) = session.property(Property::DigitalGainBlue).expect("blue gain");
        assert!((red - 1.0).abs() < 0.01, "red gain {red}");
        assert!((blue - 1.0).abs() < 0.01, "blue gain {blue}");
    }
}
