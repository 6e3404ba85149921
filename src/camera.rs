//! Camera wrapper: initialization sequencing, streaming toggles and frame hand-off.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::handoff::{FrameSlot, Handoff};
use crate::traits::{
    CameraDriver, CameraError, CameraSession, ConversionParams, CorrectionMatrix, DemosaicMethod,
    ImageFormat, Property, PropertyFlags, Result, Size, StreamControl,
};

const INITIAL_GAIN: f32 = 2.0;
const TARGET_INTENSITY: u32 = 90;
const INITIAL_EXPOSURE_MS: f32 = 5.0;
const DISPLAY_WIDTH: u32 = 640;

/// One camera device driven through a [`CameraDriver`].
///
/// Converted frames go through a single [`FrameSlot`]: the consumer reads them
/// with [`Camera::image`] and hands them back with [`Camera::release_image`].
pub struct Camera<D: CameraDriver> {
    driver: D,
    session: Option<D::Session>,
    index: Option<u32>,
    target_intensity: u32,
    streaming: bool,
    image_format: Option<ImageFormat>,
    conversion_params: ConversionParams,
    display_size: Size,
    raw_image: Vec<u8>,
    rgb_image: FrameSlot,
    unprocessed_window_name: Option<String>,
    processed_window_name: Option<String>,
}

impl<D: CameraDriver> Camera<D> {
    /// Unopened camera over `driver`.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            session: None,
            index: None,
            target_intensity: 0,
            streaming: false,
            image_format: None,
            conversion_params: ConversionParams::default(),
            display_size: Size::default(),
            raw_image: Vec::new(),
            rgb_image: FrameSlot::new(),
            unprocessed_window_name: None,
            processed_window_name: None,
        }
    }

    /// Open device `index` and configure it for capture.
    ///
    /// If the device cannot be opened the camera stays unopened and nothing
    /// else happens; check [`Camera::is_open`]. Later configuration failures
    /// are logged and do not stop the sequence. `processing` names the
    /// processed window; pass `""` for none. A camera that was already open is
    /// shut down first.
    pub fn init(&mut self, index: u32, processing: &str) {
        if self.session.is_some() {
            self.shutdown();
        }

        let mut session = match self.driver.open(index) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(index, error = %err, "failed to open camera");
                return;
            }
        };
        self.index = Some(index);
        tracing::info!(index, "camera opened");

        logged(
            "set gain",
            session.set_property(Property::Gain, INITIAL_GAIN, PropertyFlags::NONE),
        );
        self.target_intensity = TARGET_INTENSITY;
        #[allow(clippy::cast_precision_loss)]
        let target = self.target_intensity as f32;
        logged(
            "set auto exposure target",
            session.set_property(Property::AutoExposureTarget, target, PropertyFlags::NONE),
        );
        logged(
            "set exposure",
            session.set_property(Property::Exposure, INITIAL_EXPOSURE_MS, PropertyFlags::NONE),
        );

        logged("start streaming", session.stream_control(StreamControl::Start));

        if let Some(format) = logged("query image format", session.image_format()) {
            self.display_size = display_size_for(&format);
            let roi = format.full_frame();
            logged(
                "one-shot auto white balance",
                session.one_shot_auto_white_balance(roi),
            );
            logged("digital white balance", session.digital_white_balance(roi));
            tracing::debug!(
                width = format.width,
                height = format.height,
                pixel_format = ?format.pixel_format,
                image_size = format.image_size,
                "image format"
            );
            self.image_format = Some(format);
        }

        logged("stop streaming", session.stream_control(StreamControl::Stop));
        logged(
            "set automatic exposure",
            session.set_property(Property::Exposure, INITIAL_EXPOSURE_MS, PropertyFlags::AUTO_USE),
        );

        let mut params = ConversionParams {
            correction_matrix: CorrectionMatrix::Fluorescent,
            demosaic_method: DemosaicMethod::Fast,
            use_color_gains_over_wb: true,
            flip_x: false,
            flip_y: false,
            hue: 0.0,
            saturation: 1.0,
            ..ConversionParams::default()
        };
        let gains = [
            (Property::DigitalGainBlue, &mut params.digital_gain_blue),
            (Property::DigitalGainGreen, &mut params.digital_gain_green),
            (Property::DigitalGainRed, &mut params.digital_gain_red),
        ];
        for (property, slot) in gains {
            if let Some((gain, _)) = logged("read digital gain", session.property(property)) {
                *slot = gain;
            }
        }
        self.conversion_params = params;
        self.session = Some(session);

        let name = self.name();
        if !processing.is_empty() {
            self.processed_window_name = Some(format!("{name} - {processing}"));
        }
        self.unprocessed_window_name = Some(name);

        tracing::info!(
            camera = %self.name(),
            red = params.digital_gain_red,
            green = params.digital_gain_green,
            blue = params.digital_gain_blue,
            "camera initialized"
        );
    }

    /// Start streaming. A no-op when already streaming.
    ///
    /// The streaming flag only changes when the driver call succeeds.
    pub fn start_streaming(&mut self) -> Result<()> {
        if self.streaming {
            return Ok(());
        }
        self.session_mut()?.stream_control(StreamControl::Start)?;
        self.streaming = true;
        tracing::debug!("streaming started");
        Ok(())
    }

    /// Stop streaming. A no-op when not streaming.
    ///
    /// The streaming flag only changes when the driver call succeeds.
    pub fn stop_streaming(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.session_mut()?.stream_control(StreamControl::Stop)?;
        self.streaming = false;
        tracing::debug!("streaming stopped");
        Ok(())
    }

    /// Give the converted buffer back to the producer.
    pub fn release_image(&mut self) {
        self.rgb_image.release();
    }

    /// Block until one raw frame has been pulled into the raw buffer.
    pub fn raw_image(&mut self) -> Result<&[u8]> {
        let size = self.frame_size();
        let session = self.session.as_mut().ok_or(CameraError::NotOpen)?;
        self.raw_image.resize(size, 0);
        session.take_video(&mut self.raw_image)?;
        Ok(&self.raw_image)
    }

    /// The converted buffer while the consumer owns it.
    pub fn image(&self) -> Option<&[u8]> {
        self.rgb_image.claim()
    }

    /// Raw frame size in bytes.
    pub fn frame_size(&self) -> usize {
        self.image_format
            .map_or(0, |format| format.image_size as usize)
    }

    /// Display size: 640 pixels wide, height following the sensor aspect ratio.
    pub const fn display_size(&self) -> Size {
        self.display_size
    }

    /// Raw image dimensions.
    pub fn mat_size(&self) -> Size {
        self.image_format
            .map_or_else(Size::default, |format| Size::new(format.width, format.height))
    }

    /// Display label for this camera.
    ///
    /// # Panics
    ///
    /// Panics if the camera was never opened; device indices start at 1.
    pub fn name(&self) -> String {
        match self.index {
            Some(index) if index >= 1 => format!("Camera {index}"),
            #[allow(clippy::panic)]
            _ => panic!("name() called on an uninitialized camera"),
        }
    }

    /// Write every byte of the converted buffer, one per line.
    pub fn conversion_dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for byte in self.rgb_image.contents() {
            out.write_all(&[*byte, b'\n'])?;
        }
        out.flush()?;
        Ok(())
    }

    /// Convert `raw` into the RGB slot.
    ///
    /// Returns `Dropped` while the consumer still owns the previous image.
    pub fn create_rgb_image(&mut self, raw: &[u8]) -> Result<Handoff> {
        let session = self.session.as_mut().ok_or(CameraError::NotOpen)?;
        let format = self.image_format.ok_or(CameraError::FormatUnavailable)?;
        convert_into(session, &mut self.rgb_image, raw, &format, &self.conversion_params)
    }

    /// Convert the last frame pulled by [`Camera::raw_image`].
    pub fn convert_raw_image(&mut self) -> Result<Handoff> {
        let session = self.session.as_mut().ok_or(CameraError::NotOpen)?;
        let format = self.image_format.ok_or(CameraError::FormatUnavailable)?;
        convert_into(
            session,
            &mut self.rgb_image,
            &self.raw_image,
            &format,
            &self.conversion_params,
        )
    }

    /// Whether a device session is open.
    pub const fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Whether streaming was started through [`Camera::start_streaming`].
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Device index, once opened.
    pub const fn index(&self) -> Option<u32> {
        self.index
    }

    /// Automatic exposure target intensity.
    pub const fn target_intensity(&self) -> u32 {
        self.target_intensity
    }

    /// Parameters used for every conversion.
    pub const fn conversion_params(&self) -> &ConversionParams {
        &self.conversion_params
    }

    /// Raw image format, once opened.
    pub const fn image_format(&self) -> Option<&ImageFormat> {
        self.image_format.as_ref()
    }

    /// Label of the window showing unprocessed frames.
    pub fn unprocessed_window_name(&self) -> Option<&str> {
        self.unprocessed_window_name.as_deref()
    }

    /// Label of the window showing processed frames, if processing was named.
    pub fn processed_window_name(&self) -> Option<&str> {
        self.processed_window_name.as_deref()
    }

    fn session_mut(&mut self) -> Result<&mut D::Session> {
        self.session.as_mut().ok_or(CameraError::NotOpen)
    }

    /// Stop streaming, close the session and forget everything learned from it.
    fn shutdown(&mut self) {
        if self.streaming {
            if let Err(err) = self.stop_streaming() {
                tracing::warn!(error = %err, "failed to stop streaming on teardown");
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(err) = session.close() {
                tracing::warn!(error = %err, "failed to close camera");
            }
        }
        self.streaming = false;
        self.index = None;
        self.image_format = None;
        self.conversion_params = ConversionParams::default();
        self.display_size = Size::default();
        self.rgb_image = FrameSlot::new();
        self.unprocessed_window_name = None;
        self.processed_window_name = None;
    }
}

impl<D: CameraDriver> Drop for Camera<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn convert_into<S: CameraSession>(
    session: &mut S,
    slot: &mut FrameSlot,
    raw: &[u8],
    format: &ImageFormat,
    params: &ConversionParams,
) -> Result<Handoff> {
    let outcome = slot.produce(format.rgb24_size(), |dest| {
        session.convert_frame_to_rgb24(dest, raw, format, params)
    })?;
    if outcome == Handoff::Dropped {
        tracing::trace!("consumer still holds the previous image, frame dropped");
    }
    Ok(outcome)
}

fn display_size_for(format: &ImageFormat) -> Size {
    if format.width == 0 {
        return Size::new(DISPLAY_WIDTH, 0);
    }
    let height = u64::from(format.height) * u64::from(DISPLAY_WIDTH) / u64::from(format.width);
    Size::new(DISPLAY_WIDTH, u32::try_from(height).unwrap_or(u32::MAX))
}

fn logged<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(operation, error = %err, "camera call failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCall, MockDriver, MockOp};
    use crate::traits::{FourCC, Roi};

    fn opened() -> (Camera<MockDriver>, MockDriver) {
        let driver = MockDriver::new();
        let mut camera = Camera::new(driver.clone());
        camera.init(1, "");
        (camera, driver)
    }

    #[test]
    fn test_init_call_sequence() {
        let driver = MockDriver::new().with_format(ImageFormat::new(320, 240, FourCC::YUYV));
        let mut camera = Camera::new(driver.clone());
        camera.init(2, "");

        let roi = Roi { x: 0, y: 0, width: 320, height: 240 };
        assert_eq!(
            driver.calls(),
            vec![
                MockCall::Open(2),
                MockCall::SetProperty(Property::Gain, 2.0, PropertyFlags::NONE),
                MockCall::SetProperty(Property::AutoExposureTarget, 90.0, PropertyFlags::NONE),
                MockCall::SetProperty(Property::Exposure, 5.0, PropertyFlags::NONE),
                MockCall::StreamControl(StreamControl::Start),
                MockCall::ImageFormat,
                MockCall::OneShotAutoWhiteBalance(roi),
                MockCall::DigitalWhiteBalance(roi),
                MockCall::StreamControl(StreamControl::Stop),
                MockCall::SetProperty(Property::Exposure, 5.0, PropertyFlags::AUTO_USE),
                MockCall::GetProperty(Property::DigitalGainBlue),
                MockCall::GetProperty(Property::DigitalGainGreen),
                MockCall::GetProperty(Property::DigitalGainRed),
            ]
        );
        assert!(!camera.is_streaming());
        assert_eq!(camera.target_intensity(), 90);
    }

    #[test]
    fn test_init_fills_conversion_params() {
        let driver = MockDriver::new().with_digital_gains(1.5, 1.0, 0.75);
        let mut camera = Camera::new(driver);
        camera.init(1, "");

        let params = camera.conversion_params();
        assert_eq!(params.correction_matrix, CorrectionMatrix::Fluorescent);
        assert_eq!(params.demosaic_method, DemosaicMethod::Fast);
        assert!(params.use_color_gains_over_wb);
        assert!((params.digital_gain_red - 1.5).abs() < f32::EPSILON);
        assert!((params.digital_gain_blue - 0.75).abs() < f32::EPSILON);
        assert!(!params.flip_x && !params.flip_y);
    }

    #[test]
    fn test_sizes_after_init() {
        let driver = MockDriver::new().with_format(ImageFormat::new(1280, 1024, FourCC::YUYV));
        let mut camera = Camera::new(driver);
        camera.init(1, "");

        assert_eq!(camera.frame_size(), 1280 * 1024 * 2);
        assert_eq!(camera.mat_size(), Size::new(1280, 1024));
        assert_eq!(camera.display_size(), Size::new(640, 512));
    }

    #[test]
    fn test_open_failure_leaves_camera_unopened() {
        let driver = MockDriver::new().failing(MockOp::Open);
        let mut camera = Camera::new(driver.clone());
        camera.init(1, "edges");

        assert!(!camera.is_open());
        assert_eq!(camera.index(), None);
        assert_eq!(camera.unprocessed_window_name(), None);
        assert_eq!(driver.calls(), vec![MockCall::Open(1)]);
        assert!(matches!(camera.raw_image(), Err(CameraError::NotOpen)));
        assert!(matches!(camera.start_streaming(), Err(CameraError::NotOpen)));
    }

    #[test]
    fn test_init_continues_past_property_failures() {
        let driver = MockDriver::new().failing(MockOp::SetProperty);
        let mut camera = Camera::new(driver);
        camera.init(1, "");
        assert!(camera.is_open());
        assert!(camera.image_format().is_some());
    }

    #[test]
    fn test_init_continues_past_format_failure() {
        let driver = MockDriver::new().failing(MockOp::ImageFormat);
        let mut camera = Camera::new(driver.clone());
        camera.init(1, "");

        assert!(camera.is_open());
        assert!(camera.image_format().is_none());
        assert_eq!(camera.frame_size(), 0);
        assert_eq!(camera.mat_size(), Size::default());
        let calls = driver.calls();
        let balanced = calls.iter().any(|call| {
            matches!(
                call,
                MockCall::OneShotAutoWhiteBalance(_) | MockCall::DigitalWhiteBalance(_)
            )
        });
        assert!(!balanced, "white balance needs the image format");
        assert!(calls.contains(&MockCall::StreamControl(StreamControl::Stop)));
        assert!(calls.contains(&MockCall::SetProperty(
            Property::Exposure,
            5.0,
            PropertyFlags::AUTO_USE
        )));
    }

    #[test]
    fn test_conversion_without_format_reports_it() {
        let driver = MockDriver::new().failing(MockOp::ImageFormat);
        let mut camera = Camera::new(driver);
        camera.init(1, "");

        assert!(matches!(
            camera.create_rgb_image(&[0; 16]),
            Err(CameraError::FormatUnavailable)
        ));
        assert!(matches!(
            camera.convert_raw_image(),
            Err(CameraError::FormatUnavailable)
        ));
    }

    #[test]
    fn test_init_continues_past_white_balance_failure() {
        let driver = MockDriver::new().failing(MockOp::WhiteBalance);
        let mut camera = Camera::new(driver.clone());
        camera.init(1, "");

        assert!(camera.is_open());
        assert!(camera.image_format().is_some());
        let calls = driver.calls();
        let roi = Roi { x: 0, y: 0, width: 640, height: 480 };
        assert!(calls.contains(&MockCall::OneShotAutoWhiteBalance(roi)));
        assert!(calls.contains(&MockCall::StreamControl(StreamControl::Stop)));
        assert_eq!(calls.last(), Some(&MockCall::GetProperty(Property::DigitalGainRed)));

        let params = camera.conversion_params();
        assert!((params.digital_gain_red - 1.0).abs() < f32::EPSILON);
        assert!((params.digital_gain_blue - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_second_init_closes_previous_session() {
        let (mut camera, driver) = opened();
        camera.start_streaming().expect("start");
        camera.raw_image().expect("raw image");
        camera.convert_raw_image().expect("convert");
        driver.clear_calls();

        camera.init(2, "");
        let calls = driver.calls();
        assert_eq!(
            calls.get(..3),
            Some(
                &[
                    MockCall::StreamControl(StreamControl::Stop),
                    MockCall::Close,
                    MockCall::Open(2),
                ][..]
            )
        );
        assert!(!camera.is_streaming());
        assert!(camera.image().is_none());
        assert_eq!(camera.name(), "Camera 2");
        assert_eq!(calls.iter().filter(|call| **call == MockCall::Close).count(), 1);
    }

    #[test]
    fn test_window_names() {
        let driver = MockDriver::new();
        let mut camera = Camera::new(driver);
        camera.init(3, "edges");
        assert_eq!(camera.name(), "Camera 3");
        assert_eq!(camera.unprocessed_window_name(), Some("Camera 3"));
        assert_eq!(camera.processed_window_name(), Some("Camera 3 - edges"));

        let (camera, _) = opened();
        assert_eq!(camera.processed_window_name(), None);
    }

    #[test]
    #[should_panic(expected = "uninitialized camera")]
    fn test_name_of_unopened_camera_panics() {
        let camera = Camera::new(MockDriver::new());
        let _ = camera.name();
    }

    #[test]
    fn test_streaming_toggle_is_idempotent() {
        let (mut camera, driver) = opened();
        driver.clear_calls();

        camera.start_streaming().expect("start");
        camera.start_streaming().expect("second start");
        assert!(camera.is_streaming());
        camera.stop_streaming().expect("stop");
        camera.stop_streaming().expect("second stop");
        assert!(!camera.is_streaming());

        assert_eq!(
            driver.calls(),
            vec![
                MockCall::StreamControl(StreamControl::Start),
                MockCall::StreamControl(StreamControl::Stop),
            ]
        );
    }

    #[test]
    fn test_streaming_failure_keeps_state() {
        let (mut camera, driver) = opened();
        driver.set_failing(MockOp::StreamControl, true);
        assert!(camera.start_streaming().is_err());
        assert!(!camera.is_streaming());

        driver.set_failing(MockOp::StreamControl, false);
        camera.start_streaming().expect("start");
        driver.set_failing(MockOp::StreamControl, true);
        assert!(camera.stop_streaming().is_err());
        assert!(camera.is_streaming());
    }

    #[test]
    fn test_raw_image_has_frame_size() {
        let (mut camera, _) = opened();
        let size = camera.frame_size();
        let raw = camera.raw_image().expect("raw image");
        assert_eq!(raw.len(), size);
    }

    #[test]
    fn test_convert_hands_off_and_drops_while_claimed() {
        let (mut camera, driver) = opened();
        assert!(camera.image().is_none());

        camera.raw_image().expect("raw image");
        assert_eq!(camera.convert_raw_image().expect("convert"), Handoff::Published);
        let first = camera.image().expect("consumer owns image").to_vec();
        assert_eq!(first.len(), 640 * 480 * 3);

        driver.clear_calls();
        let raw = vec![0u8; camera.frame_size()];
        assert_eq!(camera.create_rgb_image(&raw).expect("convert"), Handoff::Dropped);
        assert!(driver.calls().is_empty());
        assert_eq!(camera.image(), Some(first.as_slice()));

        camera.release_image();
        assert!(camera.image().is_none());
        assert_eq!(camera.create_rgb_image(&raw).expect("convert"), Handoff::Published);
        assert!(camera.image().is_some());
    }

    #[test]
    fn test_conversion_failure_keeps_producer_ownership() {
        let (mut camera, driver) = opened();
        driver.set_failing(MockOp::Convert, true);
        camera.raw_image().expect("raw image");
        assert!(camera.convert_raw_image().is_err());
        assert!(camera.image().is_none());
    }

    #[test]
    fn test_conversion_dump_writes_one_byte_per_line() {
        let driver = MockDriver::new()
            .with_format(ImageFormat::new(2, 1, FourCC::GREY))
            .with_digital_gains(1.0, 1.0, 1.0);
        let mut camera = Camera::new(driver);
        camera.init(1, "");
        camera.create_rgb_image(&[65, 66]).expect("convert");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dump.txt");
        camera.conversion_dump(&path).expect("dump");
        let written = std::fs::read(&path).expect("read dump");
        assert_eq!(written, b"A\nA\nA\nB\nB\nB\n");
    }

    #[test]
    fn test_drop_stops_streaming_and_closes() {
        let (mut camera, driver) = opened();
        camera.start_streaming().expect("start");
        driver.clear_calls();
        drop(camera);
        assert_eq!(
            driver.calls(),
            vec![MockCall::StreamControl(StreamControl::Stop), MockCall::Close]
        );
    }
}
