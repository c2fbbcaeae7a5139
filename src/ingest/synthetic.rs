//! Synthetic camera (`stub://` devices).
//!
//! Produces paced RGB24 frames of a noisy gray scene. On a fixed schedule a red
//! octagon drifts into view, so the whole control loop can be exercised without
//! hardware.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::{Duration, Instant};

use super::{CaptureDevice, CapturedImage};
use crate::frame::BYTES_PER_PIXEL;

const BACKGROUND: u8 = 110;
const NOISE: i16 = 8;
const SIGN_COLOR: [u8; 3] = [200, 24, 32];

/// When the synthetic sign is in view: frames `[0, visible)` of every `period`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignSchedule {
    pub period: u64,
    pub visible: u64,
}

impl SignSchedule {
    pub fn always() -> Self {
        Self {
            period: 1,
            visible: 1,
        }
    }

    pub fn never() -> Self {
        Self {
            period: 1,
            visible: 0,
        }
    }

    pub fn is_visible(&self, frame_index: u64) -> bool {
        self.period > 0 && frame_index % self.period < self.visible
    }
}

impl Default for SignSchedule {
    fn default() -> Self {
        Self {
            period: 150,
            visible: 45,
        }
    }
}

pub struct SyntheticCamera {
    name: String,
    frame_interval: Option<Duration>,
    schedule: SignSchedule,
    resolution: Option<(u32, u32)>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(name: &str, target_fps: u32) -> Self {
        let frame_interval = (target_fps > 0).then(|| Duration::from_secs(1) / target_fps);
        Self {
            name: name.to_string(),
            frame_interval,
            schedule: SignSchedule::default(),
            resolution: None,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    pub fn with_schedule(mut self, schedule: SignSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    /// Sleep so frames arrive at the target rate, like a real driver read.
    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn render(&self, width: u32, height: u32) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let mut pixels = Vec::with_capacity(width as usize * height as usize * BYTES_PER_PIXEL);
        for _ in 0..width as usize * height as usize {
            let shade = (BACKGROUND as i16 + rng.gen_range(-NOISE..=NOISE)) as u8;
            pixels.extend_from_slice(&[shade, shade, shade]);
        }

        if self.schedule.is_visible(self.frame_count) {
            let radius = (width.min(height) / 8).max(4) as i64;
            let span = (width as i64 - 2 * radius).max(1);
            // Drift horizontally so consecutive frames differ.
            let cx = radius + (self.frame_count as i64 * 2) % span;
            let cy = height as i64 / 2;
            paint_octagon(&mut pixels, width, height, (cx, cy), radius);
        }
        pixels
    }
}

fn paint_octagon(pixels: &mut [u8], width: u32, height: u32, center: (i64, i64), radius: i64) {
    let (cx, cy) = center;
    let corner = radius * 3 / 2;
    for y in (cy - radius).max(0)..(cy + radius).min(height as i64) {
        for x in (cx - radius).max(0)..(cx + radius).min(width as i64) {
            let (dx, dy) = ((x - cx).abs(), (y - cy).abs());
            if dx + dy <= corner {
                let i = (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL;
                pixels[i..i + BYTES_PER_PIXEL].copy_from_slice(&SIGN_COLOR);
            }
        }
    }
}

impl CaptureDevice for SyntheticCamera {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(anyhow!("{}: invalid resolution {}x{}", self.name, width, height));
        }
        self.resolution = Some((width, height));
        log::info!("SyntheticCamera: opened {} ({}x{})", self.name, width, height);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<CapturedImage> {
        let (width, height) = self
            .resolution
            .ok_or_else(|| anyhow!("{}: device not open", self.name))?;
        self.pace();
        let pixels = self.render(width, height);
        self.frame_count += 1;
        Ok(CapturedImage {
            pixels,
            width,
            height,
        })
    }

    fn release(&mut self) {
        if self.resolution.take().is_some() {
            log::info!(
                "SyntheticCamera: released {} after {} frames",
                self.name,
                self.frame_count
            );
        }
    }
}
