//! facegate-hw: Linux board backends.
//!
//! V4L2 capture implementing [`facegate_core::ImageSource`] and sysfs GPIO
//! buttons implementing [`facegate_core::ButtonLevels`].

pub mod camera;
pub mod gpio;

pub use camera::{Camera, CameraError, CameraSource, PixelFormat};
pub use gpio::{ButtonPins, GpioError, SysfsButtons};
