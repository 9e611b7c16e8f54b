//! faceid-hw: hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access, RGB frame conversion and a background
//! capture loop with cooperative cancellation.

pub mod camera;
pub mod capture;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, PixelFormat};
pub use capture::{CaptureLoop, FrameSource, FrameStream};
pub use frame::Frame;
