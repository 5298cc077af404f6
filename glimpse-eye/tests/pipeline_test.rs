//! Tests for the detection pipeline

use glimpse_core::{BoundingBox, Detection};
use glimpse_eye::{DetectionPipeline, Detector, VisionError};
use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FixedDetector {
    detections: Vec<Detection>,
    calls: AtomicUsize,
}

impl Detector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

struct BrokenDetector;

impl Detector for BrokenDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
        Err(VisionError::Ort("session poisoned".to_string()))
    }

    fn name(&self) -> &str {
        "broken"
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 100, 50])))
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .unwrap();
    buf
}

#[test]
fn test_analyze_reports_dimensions_and_detections() {
    let card = Detection::new(0, "card", 0.5, BoundingBox::new(10.0, 10.0, 50.0, 50.0));
    let detector = Arc::new(FixedDetector {
        detections: vec![card.clone()],
        calls: AtomicUsize::new(0),
    });
    let pipeline = DetectionPipeline::new(detector.clone());

    let analysis = pipeline.analyze(&png(64, 48)).unwrap();
    assert_eq!(analysis.dimensions.width, 64);
    assert_eq!(analysis.dimensions.height, 48);
    assert_eq!(analysis.detections, vec![card]);
    assert_eq!(analysis.image.width(), 64);
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.detector_name(), "fixed");
}

#[test]
fn test_undecodable_upload_skips_detector() {
    let detector = Arc::new(FixedDetector {
        detections: vec![],
        calls: AtomicUsize::new(0),
    });
    let pipeline = DetectionPipeline::new(detector.clone());

    let err = pipeline.analyze(b"\x00\x01\x02 not an image").unwrap_err();
    assert!(err.is_input_error());
    assert_eq!(detector.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_detector_failure_is_not_input_error() {
    let pipeline = DetectionPipeline::new(Arc::new(BrokenDetector));
    let err = pipeline.analyze(&png(8, 8)).unwrap_err();
    assert!(!err.is_input_error());
    assert!(err.to_string().contains("session poisoned"));
}
