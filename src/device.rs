//! V4L2 driver implementation using the v4l crate.
//!
//! Device index `n` maps to `/dev/video{n-1}`. Properties without a V4L2
//! counterpart (auto-exposure target, digital gains) are kept by the session
//! and applied by the software converter.

use std::collections::HashMap;

use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::convert;
use crate::traits::{
    CameraDriver, CameraError, CameraSession, ConversionParams, ImageFormat, Property,
    PropertyFlags, Result, Roi, StreamControl,
};

const BUFFER_COUNT: u32 = 4;

// V4L2 control IDs (from videodev2.h)
const V4L2_CID_AUTO_WHITE_BALANCE: u32 = 0x0098_090c;
const V4L2_CID_DO_WHITE_BALANCE: u32 = 0x0098_090d;
const V4L2_CID_GAIN: u32 = 0x0098_0913;
const V4L2_CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const V4L2_CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;

/// Frames pulled while continuous auto white balance converges.
const AWB_SETTLE_FRAMES: u32 = 10;

const V4L2_EXPOSURE_MANUAL: i64 = 1;
const V4L2_EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in 100 µs units.
const EXPOSURE_UNITS_PER_MS: f32 = 10.0;

/// Driver opening V4L2 capture devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4L2Driver;

impl CameraDriver for V4L2Driver {
    type Session = V4L2Session;

    fn open(&mut self, index: u32) -> Result<Self::Session> {
        V4L2Session::open(index)
    }
}

/// Open V4L2 device.
pub struct V4L2Session {
    device: Device,
    controls: Vec<u32>,
    properties: HashMap<Property, (f32, PropertyFlags)>,
    stream: Option<Stream<'static>>,
}

impl V4L2Session {
    /// Open the device with 1-based `index`.
    pub fn open(index: u32) -> Result<Self> {
        let node = index.checked_sub(1).ok_or(CameraError::DeviceNotFound(index))?;
        let device = Device::new(node as usize)
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{} does not support video capture",
                caps.card
            )));
        }

        let controls = match device.query_controls() {
            Ok(controls) => controls.into_iter().map(|desc| desc.id).collect(),
            Err(err) => {
                tracing::warn!(error = %err, "failed to query camera controls");
                Vec::new()
            }
        };

        tracing::info!(
            node,
            card = %caps.card,
            driver = %caps.driver,
            "V4L2 device opened"
        );

        Ok(Self {
            device,
            controls,
            properties: HashMap::new(),
            stream: None,
        })
    }

    fn has_control(&self, id: u32) -> bool {
        self.controls.contains(&id)
    }

    fn set_control(&self, property: Property, id: u32, value: Value) -> Result<()> {
        self.device
            .set_control(Control { id, value })
            .map_err(|err| CameraError::Property {
                property,
                message: err.to_string(),
            })
    }

    fn set_white_balance_control(&self, name: &str, id: u32, value: Value) -> Result<()> {
        self.device
            .set_control(Control { id, value })
            .map_err(|err| CameraError::WhiteBalance(format!("{name}: {err}")))
    }

    fn set_auto_white_balance(&self, enabled: bool) -> Result<()> {
        self.set_white_balance_control(
            "auto white balance",
            V4L2_CID_AUTO_WHITE_BALANCE,
            Value::Boolean(enabled),
        )
    }

    fn settle_frames(&mut self, count: u32) -> Result<()> {
        let format = self.image_format()?;
        let mut frame = vec![0u8; format.image_size as usize];
        for _ in 0..count {
            self.take_video(&mut frame)?;
        }
        Ok(())
    }

    fn set_exposure(&self, value: f32, flags: PropertyFlags) -> Result<()> {
        if self.has_control(V4L2_CID_EXPOSURE_AUTO) {
            let mode = if flags.auto {
                V4L2_EXPOSURE_APERTURE_PRIORITY
            } else {
                V4L2_EXPOSURE_MANUAL
            };
            self.set_control(
                Property::Exposure,
                V4L2_CID_EXPOSURE_AUTO,
                Value::Integer(mode),
            )?;
        }
        if flags.auto {
            // Automatic mode: the absolute value is only a seed in aperture priority
            return Ok(());
        }
        if !self.has_control(V4L2_CID_EXPOSURE_ABSOLUTE) {
            tracing::debug!("camera does not expose an absolute exposure control");
            return Ok(());
        }
        #[allow(clippy::cast_possible_truncation)]
        let units = (value * EXPOSURE_UNITS_PER_MS).round() as i64;
        self.set_control(
            Property::Exposure,
            V4L2_CID_EXPOSURE_ABSOLUTE,
            Value::Integer(units.max(1)),
        )
    }
}

/// How a one-shot white balance is carried out with the controls a device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WhiteBalancePlan {
    /// Press `DO_WHITE_BALANCE`, turning continuous auto off first if present.
    Trigger {
        /// Device also has `AUTO_WHITE_BALANCE`.
        disable_auto: bool,
    },
    /// Run continuous auto for a few frames, then turn it off to hold the result.
    SettleAuto,
    /// Neither control exists.
    Unsupported,
}

impl WhiteBalancePlan {
    const fn for_controls(has_auto: bool, has_trigger: bool) -> Self {
        match (has_auto, has_trigger) {
            (has_auto, true) => Self::Trigger {
                disable_auto: has_auto,
            },
            (true, false) => Self::SettleAuto,
            (false, false) => Self::Unsupported,
        }
    }
}

fn next_frame_into(stream: &mut Stream<'_>, dest: &mut [u8]) -> Result<()> {
    let (buf, _meta) = stream
        .next()
        .map_err(|err| CameraError::StreamError(err.to_string()))?;
    let frame = buf.get(..dest.len()).ok_or(CameraError::BufferSize {
        expected: dest.len(),
        actual: buf.len(),
    })?;
    dest.copy_from_slice(frame);
    Ok(())
}

impl CameraSession for V4L2Session {
    fn set_property(
        &mut self,
        property: Property,
        value: f32,
        flags: PropertyFlags,
    ) -> Result<()> {
        match property {
            Property::Gain if self.has_control(V4L2_CID_GAIN) => {
                #[allow(clippy::cast_possible_truncation)]
                let gain = value.round() as i64;
                self.set_control(property, V4L2_CID_GAIN, Value::Integer(gain))?;
            }
            Property::Exposure => self.set_exposure(value, flags)?,
            Property::Gain
            | Property::AutoExposureTarget
            | Property::DigitalGainRed
            | Property::DigitalGainGreen
            | Property::DigitalGainBlue => {
                tracing::trace!(?property, value, "property kept by session");
            }
        }
        self.properties.insert(property, (value, flags));
        Ok(())
    }

    fn property(&mut self, property: Property) -> Result<(f32, PropertyFlags)> {
        if let Some(value) = self.properties.get(&property) {
            return Ok(*value);
        }
        match property {
            Property::DigitalGainRed | Property::DigitalGainGreen | Property::DigitalGainBlue => {
                Ok((1.0, PropertyFlags::NONE))
            }
            Property::Gain | Property::Exposure | Property::AutoExposureTarget => {
                Err(CameraError::Property {
                    property,
                    message: "value has not been set".to_owned(),
                })
            }
        }
    }

    fn stream_control(&mut self, control: StreamControl) -> Result<()> {
        match control {
            StreamControl::Start => {
                if self.stream.is_none() {
                    let stream =
                        Stream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
                            .map_err(|err| CameraError::StreamError(err.to_string()))?;
                    self.stream = Some(stream);
                }
            }
            StreamControl::Stop => {
                // Dropping the stream turns streaming off and unmaps its buffers
                self.stream = None;
            }
        }
        Ok(())
    }

    fn image_format(&mut self) -> Result<ImageFormat> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::StreamError(err.to_string()))?;

        Ok(ImageFormat {
            width: fmt.width,
            height: fmt.height,
            pixel_format: fmt.fourcc.into(),
            stride: fmt.stride,
            image_size: fmt.size,
        })
    }

    fn one_shot_auto_white_balance(&mut self, roi: Roi) -> Result<()> {
        tracing::debug!(?roi, "V4L2 white balance covers the whole frame");
        let plan = WhiteBalancePlan::for_controls(
            self.has_control(V4L2_CID_AUTO_WHITE_BALANCE),
            self.has_control(V4L2_CID_DO_WHITE_BALANCE),
        );
        match plan {
            WhiteBalancePlan::Trigger { disable_auto } => {
                if disable_auto {
                    self.set_auto_white_balance(false)?;
                }
                self.set_white_balance_control(
                    "white balance trigger",
                    V4L2_CID_DO_WHITE_BALANCE,
                    Value::Integer(1),
                )
            }
            WhiteBalancePlan::SettleAuto => {
                self.set_auto_white_balance(true)?;
                let settled = self.settle_frames(AWB_SETTLE_FRAMES);
                // Always leave auto off so the settled balance holds
                let held = self.set_auto_white_balance(false);
                settled.and(held)
            }
            WhiteBalancePlan::Unsupported => {
                tracing::debug!("camera has no white balance controls");
                Ok(())
            }
        }
    }

    fn digital_white_balance(&mut self, roi: Roi) -> Result<()> {
        let format = self.image_format()?;
        let mut raw = vec![0u8; format.image_size as usize];
        self.take_video(&mut raw)?;

        let mut rgb = vec![0u8; format.rgb24_size()];
        convert::convert_to_rgb24(&raw, &format, &ConversionParams::default(), &mut rgb)?;
        let gains = convert::white_balance_gains(&rgb, format.width, roi);
        tracing::debug!(
            red = gains.red,
            green = gains.green,
            blue = gains.blue,
            "digital white balance"
        );

        for (property, gain) in [
            (Property::DigitalGainRed, gains.red),
            (Property::DigitalGainGreen, gains.green),
            (Property::DigitalGainBlue, gains.blue),
        ] {
            self.properties.insert(property, (gain, PropertyFlags::NONE));
        }
        Ok(())
    }

    fn take_video(&mut self, dest: &mut [u8]) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            return next_frame_into(stream, dest);
        }
        let mut stream = Stream::with_buffers(&self.device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|err| CameraError::StreamError(err.to_string()))?;
        next_frame_into(&mut stream, dest)
    }

    fn convert_frame_to_rgb24(
        &mut self,
        dest: &mut [u8],
        raw: &[u8],
        format: &ImageFormat,
        params: &ConversionParams,
    ) -> Result<()> {
        convert::convert_to_rgb24(raw, format, params, dest)
    }

    fn close(mut self) -> Result<()> {
        self.stream = None;
        tracing::debug!("V4L2 device closed");
        Ok(())
    }
}
