//! Detection data model

use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-image pixel coordinates (corner form)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Intersection over union with another box
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let inter = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 || !union.is_finite() {
            return 0.0;
        }

        let iou = inter / union;
        if iou.is_finite() {
            iou.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// One observation produced by a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(
        class_id: usize,
        class_name: impl Into<String>,
        confidence: f32,
        bbox: BoundingBox,
    ) -> Self {
        Self {
            class_id,
            class_name: class_name.into(),
            confidence,
            bbox,
        }
    }
}

/// Size of the source image in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Crop rectangle, half-open on both axes (`x1..x2`, `y1..y2`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl CaptureRegion {
    /// Expand `bbox` by `margin` pixels on every side and clamp to the image.
    ///
    /// Box corners are truncated toward zero first. Non-finite or negative
    /// coordinates clamp to 0, so the result always satisfies
    /// `x1 <= x2 <= width` and `y1 <= y2 <= height`.
    pub fn around(bbox: &BoundingBox, margin: u32, dims: ImageDimensions) -> Self {
        let margin = i64::from(margin);
        let (w, h) = (i64::from(dims.width), i64::from(dims.height));

        // `as` saturates and maps NaN to 0
        let x1 = (bbox.x1 as i64).saturating_sub(margin).clamp(0, w);
        let y1 = (bbox.y1 as i64).saturating_sub(margin).clamp(0, h);
        let x2 = (bbox.x2 as i64).saturating_add(margin).clamp(0, w).max(x1);
        let y2 = (bbox.y2 as i64).saturating_add(margin).clamp(0, h).max(y1);

        Self {
            x1: x1 as u32,
            y1: y1 as u32,
            x2: x2 as u32,
            y2: y2 as u32,
        }
    }

    /// Zero when the region is inverted
    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Outcome of evaluating one detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    Capture(CaptureRegion),
}

impl Action {
    pub fn is_capture(&self) -> bool {
        matches!(self, Action::Capture(_))
    }

    pub fn region(&self) -> Option<CaptureRegion> {
        match self {
            Action::Capture(region) => Some(*region),
            Action::None => None,
        }
    }
}
