//! storewatch-hw — camera capture for the shop-floor feed.
//!
//! Opens a V4L2 camera at the requested size and hands out grayscale
//! frames, flagging ones too dark to search for faces.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo};
pub use frame::{Frame, FrameError, PixelFormat};
