//! glimpse-eye: object detection for glimpse
//!
//! Wraps an object detector behind the [`Detector`] trait and turns uploaded
//! image bytes into a list of [`Detection`](glimpse_core::Detection)s. The
//! YOLOv8 ONNX backend is compiled in with the `onnx` feature.

pub mod detector;
pub mod error;
pub mod models;
pub mod processing;
mod utils;

pub use detector::Detector;
pub use error::VisionError;
pub use processing::{DetectionPipeline, FrameAnalysis};
pub use utils::decode_image;

#[cfg(feature = "onnx")]
pub use models::YoloDetector;
