//! Object detection pipeline

use crate::detector::Detector;
use crate::error::VisionError;
use crate::utils::decode_image;
use glimpse_core::{Detection, ImageDimensions};
use image::DynamicImage;
use std::sync::Arc;
use tracing::debug;

/// Decoded upload together with what the detector saw in it
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
    pub image: Arc<DynamicImage>,
    pub dimensions: ImageDimensions,
    pub detections: Vec<Detection>,
}

/// Object detection pipeline
#[derive(Clone)]
pub struct DetectionPipeline {
    detector: Arc<dyn Detector>,
}

impl DetectionPipeline {
    /// Create a new detection pipeline
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self { detector }
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Decode raw upload bytes and detect objects in them
    pub fn analyze(&self, bytes: &[u8]) -> Result<FrameAnalysis, VisionError> {
        let image = decode_image(bytes)?;
        self.analyze_image(Arc::new(image))
    }

    /// Detect objects in an already decoded image
    pub fn analyze_image(&self, image: Arc<DynamicImage>) -> Result<FrameAnalysis, VisionError> {
        let dimensions = ImageDimensions::new(image.width(), image.height());
        debug!(
            "Running {} on {}x{} frame",
            self.detector.name(),
            dimensions.width,
            dimensions.height
        );

        let detections = self.detector.detect(&image)?;
        debug!("Detected {} objects", detections.len());

        Ok(FrameAnalysis {
            image,
            dimensions,
            detections,
        })
    }
}
