//! YOLOv8 object detection model
//!
//! Ultralytics YOLOv8 ONNX exports produce a single `[1, 4 + classes, anchors]`
//! tensor: box centre and size in model-input pixels followed by one score per
//! class. Decoding and suppression are plain functions so they can be used
//! without a runtime session.

use crate::error::VisionError;
use glimpse_core::{BoundingBox, Detection, ImageDimensions};
use std::collections::HashMap;

#[cfg(feature = "onnx")]
pub use session::YoloDetector;

/// Decode a YOLOv8 output tensor into detections in source-image pixels.
///
/// `shape` may be `[1, 4 + nc, anchors]` or the transposed
/// `[1, anchors, 4 + nc]`. The attribute axis is the one matching the number
/// of known class names, or the smaller axis when names are unknown. Boxes
/// are rescaled from the square `input_size` to `dims` and clamped to the
/// image.
pub fn decode_yolov8_output(
    data: &[f32],
    shape: &[usize],
    input_size: u32,
    dims: ImageDimensions,
    confidence_threshold: f32,
    class_names: &[String],
) -> Result<Vec<Detection>, VisionError> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(VisionError::Processing(format!("Unexpected YOLO output shape {:?}", shape)));
    }

    let declared = 4 + class_names.len();
    let transposed = if !class_names.is_empty() && shape[1] == declared {
        false
    } else if !class_names.is_empty() && shape[2] == declared {
        true
    } else {
        shape[1] > shape[2]
    };
    let (attrs, anchors) = if transposed { (shape[2], shape[1]) } else { (shape[1], shape[2]) };

    if attrs <= 4 {
        return Err(VisionError::Processing(format!(
            "YOLO output has no class scores: {:?}",
            shape
        )));
    }

    let expected = attrs
        .checked_mul(anchors)
        .ok_or_else(|| VisionError::Processing("YOLO output size overflow".to_string()))?;
    if data.len() < expected {
        return Err(VisionError::Processing(format!(
            "YOLO output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            expected
        )));
    }

    let at = |attr: usize, anchor: usize| -> f32 {
        if transposed {
            data[anchor * attrs + attr]
        } else {
            data[attr * anchors + anchor]
        }
    };

    let num_classes = attrs - 4;
    let scale_x = dims.width as f32 / input_size as f32;
    let scale_y = dims.height as f32 / input_size as f32;
    let (max_x, max_y) = (dims.width as f32, dims.height as f32);

    let mut detections = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }

        if !best_score.is_finite() || best_score < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
        let finite = cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite();
        if !finite || w <= 0.0 || h <= 0.0 {
            continue;
        }

        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy - h / 2.0) * scale_y).clamp(0.0, max_y),
            ((cx + w / 2.0) * scale_x).clamp(0.0, max_x),
            ((cy + h / 2.0) * scale_y).clamp(0.0, max_y),
        );
        if bbox.area() <= 0.0 {
            continue;
        }

        let class_name = class_names
            .get(best_class)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", best_class));

        detections.push(Detection::new(best_class, class_name, best_score.min(1.0), bbox));
    }

    Ok(detections)
}

/// Class-aware non-maximum suppression, highest confidence first
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        let suppressed = keep.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

/// Parse the `names` metadata entry written by Ultralytics exports,
/// e.g. `{0: 'card', 1: 'wallets'}`. Gaps are filled with `class_<id>`.
pub fn parse_class_names(raw: &str) -> Vec<String> {
    let body = raw.trim().trim_start_matches('{').trim_end_matches('}');

    let mut by_index: HashMap<usize, String> = HashMap::new();
    for entry in body.split(',') {
        let Some((index, name)) = entry.split_once(':') else {
            continue;
        };
        let Ok(index) = index.trim().parse::<usize>() else {
            continue;
        };
        let name = name.trim().trim_matches(|c| c == '\'' || c == '"').trim();
        if !name.is_empty() {
            by_index.insert(index, name.to_string());
        }
    }

    let len = by_index.keys().max().map(|m| m + 1).unwrap_or(0);
    (0..len)
        .map(|i| by_index.remove(&i).unwrap_or_else(|| format!("class_{}", i)))
        .collect()
}

#[cfg(feature = "onnx")]
mod session {
    use super::{decode_yolov8_output, non_max_suppression, parse_class_names};
    use crate::detector::Detector;
    use crate::error::VisionError;
    use crate::utils::to_chw_tensor;
    use glimpse_core::config::DetectorConfig;
    use glimpse_core::{Detection, ImageDimensions};
    use image::DynamicImage;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;
    use parking_lot::Mutex;
    use tracing::{debug, info, warn};

    /// YOLOv8 detector running on ONNX Runtime
    pub struct YoloDetector {
        session: Mutex<Session>,
        input_size: u32,
        confidence_threshold: f32,
        iou_threshold: f32,
        class_names: Vec<String>,
    }

    impl YoloDetector {
        /// Load a model. Class names come from `config` when given, otherwise
        /// from the model's `names` metadata.
        pub fn new(config: &DetectorConfig) -> Result<Self, VisionError> {
            if !config.model_path.exists() {
                return Err(VisionError::Model(format!(
                    "Model not found at {:?}",
                    config.model_path
                )));
            }

            let session = Session::builder()
                .map_err(|e| VisionError::Ort(format!("Failed to create session builder: {}", e)))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| VisionError::Ort(format!("Failed to set optimization level: {}", e)))?
                .commit_from_file(&config.model_path)
                .map_err(|e| VisionError::Ort(format!("Failed to load YOLO model: {}", e)))?;

            let class_names = if config.class_names.is_empty() {
                let names = session
                    .metadata()
                    .ok()
                    .and_then(|m| m.custom("names").ok().flatten())
                    .map(|raw| parse_class_names(&raw))
                    .unwrap_or_default();
                if names.is_empty() {
                    warn!("Model carries no class names; labels will be class_<id>");
                }
                names
            } else {
                config.class_names.clone()
            };

            info!("YOLO model loaded from {:?} ({} classes)", config.model_path, class_names.len());

            Ok(Self {
                session: Mutex::new(session),
                input_size: config.input_size,
                confidence_threshold: config.confidence_threshold,
                iou_threshold: config.iou_threshold,
                class_names,
            })
        }

        pub fn class_names(&self) -> &[String] {
            &self.class_names
        }
    }

    impl Detector for YoloDetector {
        fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, VisionError> {
            let dims = ImageDimensions::new(image.width(), image.height());
            let size = self.input_size as usize;

            let pixels = to_chw_tensor(image, self.input_size)?;
            let input = Tensor::from_array(([1usize, 3, size, size], pixels))
                .map_err(|e| VisionError::Ort(format!("Failed to create input tensor: {}", e)))?;

            let (shape, data) = {
                let mut session = self.session.lock();
                let outputs = session
                    .run(ort::inputs![input])
                    .map_err(|e| VisionError::Ort(format!("YOLO inference failed: {}", e)))?;
                let (shape, data) = outputs[0]
                    .try_extract_tensor::<f32>()
                    .map_err(|e| {
                        VisionError::Ort(format!("Failed to extract output tensor: {}", e))
                    })?;
                let shape: Vec<usize> = shape.iter().map(|d| (*d).max(0) as usize).collect();
                (shape, data.to_vec())
            };
            debug!("YOLO output shape: {:?}", shape);

            let detections = decode_yolov8_output(
                &data,
                &shape,
                self.input_size,
                dims,
                self.confidence_threshold,
                &self.class_names,
            )?;
            let detections = non_max_suppression(detections, self.iou_threshold);

            debug!("YOLO detected {} objects", detections.len());
            Ok(detections)
        }

        fn name(&self) -> &str {
            "yolov8-onnx"
        }
    }
}
