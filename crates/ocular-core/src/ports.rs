//! Ports for the external collaborators: the capture device and the
//! landmark tracker.

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

use crate::geometry::LandmarkSet;
use crate::rectify::Resolution;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture device unavailable: {0}")]
    Unavailable(String),
    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A live frame source.
///
/// Frames are stored at `native_resolution`; landmarks are reported in
/// `display_resolution`.
pub trait CaptureDevice: Send + Sync {
    fn start(&self) -> Result<(), CaptureError>;
    fn stop(&self);
    /// Most recent frame, or `None` before the first one arrives.
    fn current_frame(&self) -> Option<Arc<RgbImage>>;
    fn native_resolution(&self) -> Resolution;
    fn display_resolution(&self) -> Resolution;
}

/// Face landmark tracker following the capture device's frames.
pub trait Tracker: Send + Sync {
    fn start(&self) {}
    fn stop(&self) {}
    /// Landmarks for the current frame, `None` when tracking is lost.
    fn current_landmarks(&self) -> Option<LandmarkSet>;
}
