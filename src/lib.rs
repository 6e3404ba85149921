//! Lucam-Capture: a camera wrapper with single-slot frame hand-off
//!
//! A [`Camera`] opens a device through a [`CameraDriver`], configures exposure
//! and white balance, pulls raw frames, converts them to RGB24 and hands the
//! converted buffer to one consumer at a time. Drivers are pluggable: the
//! crate ships a V4L2 driver for real hardware and a mock for tests.

pub mod camera;
pub mod config;
pub mod convert;
pub mod device;
pub mod handoff;
pub mod logging;
pub mod mock;
pub mod traits;
pub mod validation;

pub use camera::Camera;
pub use device::V4L2Driver;
pub use handoff::{FrameSlot, Handoff, Owner};
pub use traits::{
    CameraDriver, CameraError, CameraSession, ConversionParams, CorrectionMatrix, DemosaicMethod,
    FourCC, ImageFormat, Property, PropertyFlags, Roi, Size, StreamControl,
};
