use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, DetectionResult};

/// Stub backend for testing. Reports the same boxes for every frame.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    boxes: Vec<BoundingBox>,
}

impl StubBackend {
    /// Backend that never detects anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that reports `boxes` on every frame.
    pub fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self { boxes }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _pixels: &[u8], _width: u32, _height: u32) -> Result<DetectionResult> {
        Ok(DetectionResult::from_boxes(self.boxes.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_reports_configured_boxes() {
        let empty = StubBackend::new();
        assert_eq!(empty.detect(b"rgb", 1, 1).unwrap(), DetectionResult::none());

        let boxed = StubBackend::with_boxes(vec![BoundingBox::new(1, 2, 3, 4)]);
        let result = boxed.detect(b"rgb", 1, 1).unwrap();
        assert!(result.present);
        assert_eq!(result.boxes, vec![BoundingBox::new(1, 2, 3, 4)]);
    }
}
