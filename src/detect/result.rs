use serde::{Deserialize, Serialize};

/// One labeled region detected in a frame.
///
/// The sequence order of detections per frame is render order only; it
/// carries no ranking semantics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Human-readable class label (e.g. "cat").
    pub label: String,
    /// Confidence in 0..=1.
    pub confidence: f32,
    /// Bounding box in frame pixel coordinates.
    pub bbox: BoundingBox,
}

/// Axis-aligned bounding box in frame pixel coordinates.
///
/// Coordinates may extend past the frame edge; the overlay clamps at draw
/// time rather than at detection time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in square pixels; zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        if self.width <= 0.0 || self.height <= 0.0 {
            return 0.0;
        }
        self.width * self.height
    }
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}
