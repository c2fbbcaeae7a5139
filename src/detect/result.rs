/// Axis-aligned box in pixel coordinates of the analysed frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Centre point, rounded down.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Result of running detection on one frame.
///
/// `present` is true exactly when at least one box was found.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub present: bool,
    pub boxes: Vec<BoundingBox>,
}

impl DetectionResult {
    /// No target in view.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self {
            present: !boxes.is_empty(),
            boxes,
        }
    }
}
