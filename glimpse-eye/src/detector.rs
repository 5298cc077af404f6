//! Detector abstraction

use crate::error::VisionError;
use glimpse_core::Detection;
use image::DynamicImage;

/// Black-box object detector.
///
/// Implementations return boxes in the pixel coordinates of `image`.
/// Inference is CPU-bound, so async callers should run it on a blocking
/// thread.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, VisionError>;

    fn name(&self) -> &str;
}
