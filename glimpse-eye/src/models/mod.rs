//! Detection model backends

pub mod yolo;

pub use yolo::{decode_yolov8_output, non_max_suppression, parse_class_names};

#[cfg(feature = "onnx")]
pub use yolo::YoloDetector;
