//! Core traits and types for the camera driver abstraction.

use thiserror::Error;

/// Pixel format representation (e.g., YUYV, RGB3, RGGB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// GREY pixel format (8-bit luminance).
    pub const GREY: Self = Self::new(b"GREY");
    /// 8-bit Bayer, RGGB ordering.
    pub const RGGB: Self = Self::new(b"RGGB");
    /// 8-bit Bayer, BGGR ordering.
    pub const BA81: Self = Self::new(b"BA81");

    /// Bytes used by one pixel for the formats the software converter knows.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<u32> {
        match &self.0 {
            b"YUYV" => Some(2),
            b"RGB3" => Some(3),
            b"GREY" | b"RGGB" | b"BA81" => Some(1),
            _ => None,
        }
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Raw frame format reported by the device after opening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFormat {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of the raw frame.
    pub pixel_format: FourCC,
    /// Bytes per raw row, including any padding after the last pixel.
    pub stride: u32,
    /// Total raw frame size in bytes.
    pub image_size: u32,
}

impl ImageFormat {
    /// Create a format whose size follows from the pixel format.
    ///
    /// Unknown pixel formats are assumed to be 8 bits per pixel.
    #[must_use]
    pub const fn new(width: u32, height: u32, pixel_format: FourCC) -> Self {
        let bpp = match pixel_format.bytes_per_pixel() {
            Some(bpp) => bpp,
            None => 1,
        };
        Self {
            width,
            height,
            pixel_format,
            stride: width * bpp,
            image_size: width * height * bpp,
        }
    }

    /// Same format with rows padded to `stride` bytes.
    #[must_use]
    pub const fn with_stride(self, stride: u32) -> Self {
        Self {
            stride,
            image_size: stride * self.height,
            ..self
        }
    }

    /// Number of pixels in one frame.
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of the RGB24 image produced from one frame.
    #[must_use]
    pub const fn rgb24_size(&self) -> usize {
        self.pixel_count() * 3
    }

    /// Region covering the whole frame.
    #[must_use]
    pub const fn full_frame(&self) -> Roi {
        Roi {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }
}

/// Width/height pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rectangular region of a frame, used by the white-balance passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roi {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Region width.
    pub width: u32,
    /// Region height.
    pub height: u32,
}

/// Device properties the wrapper reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Analog gain.
    Gain,
    /// Exposure time in milliseconds.
    Exposure,
    /// Target intensity for automatic exposure.
    AutoExposureTarget,
    /// Digital gain applied to the red channel during conversion.
    DigitalGainRed,
    /// Digital gain applied to the green channel during conversion.
    DigitalGainGreen,
    /// Digital gain applied to the blue channel during conversion.
    DigitalGainBlue,
}

/// Flags attached to a property value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PropertyFlags {
    /// The device adjusts the value automatically.
    pub auto: bool,
    /// The value is in use.
    pub use_value: bool,
}

impl PropertyFlags {
    /// Plain manual value.
    pub const NONE: Self = Self {
        auto: false,
        use_value: false,
    };
    /// Automatic control, seeded with the given value.
    pub const AUTO_USE: Self = Self {
        auto: true,
        use_value: true,
    };
}

/// Streaming control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    /// Start video streaming.
    Start,
    /// Stop video streaming.
    Stop,
}

/// Color correction matrix selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CorrectionMatrix {
    /// No correction.
    None,
    /// Fluorescent illuminant preset.
    Fluorescent,
    /// Daylight illuminant preset.
    Daylight,
    /// Incandescent illuminant preset.
    Incandescent,
    /// Row-major 3x3 matrix applied to (r, g, b).
    Custom([f32; 9]),
}

/// Demosaicing method for Bayer frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemosaicMethod {
    /// Nearest neighbour.
    Simple,
    /// Nearest neighbour, tuned for speed.
    Fast,
    /// Bilinear interpolation.
    HighQuality,
}

/// Parameters consumed by the raw to RGB24 conversion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionParams {
    /// Color correction matrix.
    pub correction_matrix: CorrectionMatrix,
    /// Demosaicing method.
    pub demosaic_method: DemosaicMethod,
    /// Apply the per-channel digital gains below.
    pub use_color_gains_over_wb: bool,
    /// Red channel gain.
    pub digital_gain_red: f32,
    /// Green channel gain.
    pub digital_gain_green: f32,
    /// Blue channel gain.
    pub digital_gain_blue: f32,
    /// Mirror horizontally.
    pub flip_x: bool,
    /// Mirror vertically.
    pub flip_y: bool,
    /// Hue rotation in degrees.
    pub hue: f32,
    /// Saturation multiplier.
    pub saturation: f32,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            correction_matrix: CorrectionMatrix::None,
            demosaic_method: DemosaicMethod::Fast,
            use_color_gains_over_wb: false,
            digital_gain_red: 1.0,
            digital_gain_green: 1.0,
            digital_gain_blue: 1.0,
            flip_x: false,
            flip_y: false,
            hue: 0.0,
            saturation: 1.0,
        }
    }
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Device with given index was not found.
    #[error("Device {0} not found")]
    DeviceNotFound(u32),
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// The camera has no open session.
    #[error("Camera is not open")]
    NotOpen,
    /// The camera is open but its image format is not known.
    #[error("Image format is not available")]
    FormatUnavailable,
    /// Reading or writing a property failed.
    #[error("Property {property:?} failed: {message}")]
    Property {
        /// Property involved.
        property: Property,
        /// Driver message.
        message: String,
    },
    /// A white-balance pass failed.
    #[error("White balance failed: {0}")]
    WhiteBalance(String),
    /// Error during streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Raw to RGB24 conversion failed.
    #[error("Conversion failed: {0}")]
    Conversion(String),
    /// Pixel format is not handled by the converter.
    #[error("Unsupported pixel format: {0:?}")]
    UnsupportedFormat(FourCC),
    /// A buffer does not have the size the format requires.
    #[error("Buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize {
        /// Required size.
        expected: usize,
        /// Provided size.
        actual: usize,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Entry point of a camera driver: opens sessions by device index.
pub trait CameraDriver {
    /// Session type returned by `open`.
    type Session: CameraSession;

    /// Open the device with the given 1-based index.
    fn open(&mut self, index: u32) -> Result<Self::Session>;
}

/// An open device session.
pub trait CameraSession {
    /// Write a property value.
    fn set_property(&mut self, property: Property, value: f32, flags: PropertyFlags)
        -> Result<()>;

    /// Read a property value and its flags.
    fn property(&mut self, property: Property) -> Result<(f32, PropertyFlags)>;

    /// Start or stop streaming.
    fn stream_control(&mut self, control: StreamControl) -> Result<()>;

    /// Raw frame format.
    fn image_format(&mut self) -> Result<ImageFormat>;

    /// Let the device settle its own white balance over `roi`.
    fn one_shot_auto_white_balance(&mut self, roi: Roi) -> Result<()>;

    /// Compute digital gains over `roi` and store them as the digital gain properties.
    fn digital_white_balance(&mut self, roi: Roi) -> Result<()>;

    /// Block until one raw frame has been copied into `dest`.
    fn take_video(&mut self, dest: &mut [u8]) -> Result<()>;

    /// Convert `raw` to RGB24 into `dest`.
    fn convert_frame_to_rgb24(
        &mut self,
        dest: &mut [u8],
        raw: &[u8],
        format: &ImageFormat,
        params: &ConversionParams,
    ) -> Result<()>;

    /// Close the session.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
