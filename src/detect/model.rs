//! Colour-profile model files for the chroma backend.
//!
//! A model is a small TOML document:
//!
//! ```toml
//! name = "stop-sign-red"
//! red_min = 100
//! dominance = 1.8
//! base_window = 24
//! fill_ratio = 0.5
//! ```

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChromaModel {
    pub name: String,
    /// Minimum red channel value for a target pixel.
    pub red_min: u8,
    /// Red must exceed `dominance` times the larger of green and blue.
    pub dominance: f32,
    /// Smallest search window side, in pixels.
    pub base_window: u32,
    /// Fraction of target pixels a window needs to count as a hit.
    pub fill_ratio: f32,
}

impl Default for ChromaModel {
    fn default() -> Self {
        Self {
            name: "stop-sign-red".to_string(),
            red_min: 100,
            dominance: 1.8,
            base_window: 24,
            fill_ratio: 0.5,
        }
    }
}

impl ChromaModel {
    /// Load and validate a model file. Any failure here is a startup error.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("could not load detector model {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid detector model {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let model: ChromaModel = toml::from_str(raw).map_err(|e| anyhow!("{}", e))?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.dominance.is_finite() || self.dominance < 1.0 {
            return Err(anyhow!("dominance must be at least 1.0"));
        }
        if self.base_window < 4 {
            return Err(anyhow!("base_window must be at least 4 pixels"));
        }
        if !(self.fill_ratio > 0.0 && self.fill_ratio <= 1.0) {
            return Err(anyhow!("fill_ratio must be in (0, 1]"));
        }
        Ok(())
    }

    /// True when an RGB pixel matches the target colour.
    pub fn is_target(&self, r: u8, g: u8, b: u8) -> bool {
        r >= self.red_min && r as f32 >= self.dominance * g.max(b) as f32
    }
}
