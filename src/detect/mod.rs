//! Stop-sign detection.
//!
//! `Detector` wraps one `DetectorBackend` and gives the control loop a contract that
//! never fails: a missing frame or a backend error both read as "nothing detected".

mod backend;
mod backends;
mod model;
mod result;

use anyhow::Result;

pub use backend::DetectorBackend;
pub use backends::{ChromaBackend, StubBackend};
pub use model::ChromaModel;
pub use result::{BoundingBox, DetectionResult};

use crate::config::{DetectionSettings, DetectorKind};
use crate::frame::Frame;

pub struct Detector {
    backend: Box<dyn DetectorBackend>,
}

impl Detector {
    pub fn new<B: DetectorBackend + 'static>(backend: B) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Build the configured backend. Model loading failures are returned to the caller.
    pub fn from_settings(settings: &DetectionSettings) -> Result<Self> {
        let detector = match settings.backend {
            DetectorKind::Chroma => {
                let model = ChromaModel::load(&settings.model_path)?;
                log::info!(
                    "detector: loaded model '{}' from {}",
                    model.name,
                    settings.model_path.display()
                );
                Self::new(ChromaBackend::new(
                    model,
                    settings.scale_factor,
                    settings.min_neighbors,
                )?)
            }
            DetectorKind::Stub => Self::new(StubBackend::new()),
        };
        log::info!("detector: using {} backend", detector.backend_name());
        Ok(detector)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Detect on an optional frame. `None` yields an empty result.
    pub fn detect_frame(&self, frame: Option<&Frame>) -> DetectionResult {
        let Some(frame) = frame else {
            return DetectionResult::none();
        };
        match self
            .backend
            .detect(frame.pixels(), frame.width, frame.height)
        {
            Ok(result) => result,
            Err(err) => {
                log::warn!(
                    "detector: {} failed on frame {}: {:#}",
                    self.backend.name(),
                    frame.sequence,
                    err
                );
                DetectionResult::none()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::path::PathBuf;

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&self, _pixels: &[u8], _width: u32, _height: u32) -> Result<DetectionResult> {
            Err(anyhow!("inference failed"))
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 4 * 4 * 3], 4, 4, 1).unwrap()
    }

    #[test]
    fn missing_frame_reads_as_nothing_detected() {
        let detector = Detector::new(StubBackend::with_boxes(vec![BoundingBox::new(0, 0, 1, 1)]));
        let result = detector.detect_frame(None);
        assert!(!result.present);
        assert!(result.boxes.is_empty());
    }

    #[test]
    fn backend_error_reads_as_nothing_detected() {
        let detector = Detector::new(FailingBackend);
        assert_eq!(detector.detect_frame(Some(&frame())), DetectionResult::none());
    }

    #[test]
    fn from_settings_fails_on_missing_model() {
        let settings = DetectionSettings {
            backend: DetectorKind::Chroma,
            model_path: PathBuf::from("/nonexistent/model.toml"),
            scale_factor: 1.1,
            min_neighbors: 3,
        };
        assert!(Detector::from_settings(&settings).is_err());
    }

    #[test]
    fn from_settings_builds_stub_without_model() {
        let settings = DetectionSettings {
            backend: DetectorKind::Stub,
            model_path: PathBuf::new(),
            scale_factor: 1.1,
            min_neighbors: 3,
        };
        let detector = Detector::from_settings(&settings).unwrap();
        assert_eq!(detector.backend_name(), "stub");
        assert!(!detector.detect_frame(Some(&frame())).present);
    }
}
