pub mod capture;
#[cfg(feature = "desktop")]
pub mod openni;

pub use capture::{Capture, CaptureSource, DepthDevice, DepthImage, ImageSpace, RawFrame};
#[cfg(feature = "desktop")]
pub use openni::OpenNiCamera;
