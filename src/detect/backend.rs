use anyhow::Result;

use crate::detect::result::DetectionResult;

/// Detector backend trait.
///
/// Backends take `&self`: a detection pass must not carry memory into the next one.
/// All temporal behaviour lives in the stability controller, so swapping backends
/// never changes debounce behaviour.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on packed RGB24 pixels.
    ///
    /// Implementations must treat the pixel slice as read-only and ephemeral.
    fn detect(&self, pixels: &[u8], width: u32, height: u32) -> Result<DetectionResult>;
}
