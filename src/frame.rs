//! Frame snapshots and the single-slot latest-frame handoff.
//!
//! - `Frame`: immutable RGB24 pixel buffer. Pixels are fixed at construction.
//! - `FrameSlot`: holds the newest `Arc<Frame>`. The acquisition worker replaces it,
//!   the control loop clones it. A reader either sees the previous complete frame or
//!   the next complete frame, never a partially written one.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, PoisonError};

/// Bytes per pixel for the RGB24 layout every capture backend produces.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame: immutable captured image
// ----------------------------------------------------------------------------

/// Captured frame. There is no `&mut` access to the pixels once built.
#[derive(Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Arrival order assigned by the frame source, starting at 1.
    pub sequence: u64,
}

impl Frame {
    /// Build a frame from packed RGB24 pixels.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer holds {} bytes, expected {} for {}x{} RGB24",
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

// ----------------------------------------------------------------------------
// FrameSlot: single-writer / single-reader latest-frame handoff
// ----------------------------------------------------------------------------

/// Single-slot buffer for the most recent frame.
///
/// There is no queue: publishing drops the previous snapshot (once no reader holds it)
/// and readers always get the newest one. The lock only guards the pointer swap or
/// clone, never a device read or a detection pass.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest frame.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let previous = {
            let mut guard = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            guard.replace(frame)
        };
        // Freeing the old pixel buffer happens outside the lock.
        drop(previous);
    }

    /// Newest frame snapshot, or `None` before the first capture.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.latest().is_none()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn solid_frame(width: u32, height: u32, sequence: u64) -> Frame {
        let len = width as usize * height as usize * BYTES_PER_PIXEL;
        Frame::new(vec![(sequence % 256) as u8; len], width, height, sequence).unwrap()
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0; 10], 4, 4, 1).is_err());
        assert!(Frame::new(vec![], 0, 4, 1).is_err());
        assert!(Frame::new(vec![0; 48], 4, 4, 1).is_ok());
    }

    #[test]
    fn slot_is_empty_until_first_publish() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        assert!(slot.is_empty());

        slot.publish(solid_frame(4, 4, 1));
        let frame = slot.latest().expect("frame published");
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn slot_overwrites_instead_of_queueing() {
        let slot = FrameSlot::new();
        slot.publish(solid_frame(4, 4, 1));
        slot.publish(solid_frame(4, 4, 2));
        slot.publish(solid_frame(4, 4, 3));

        assert_eq!(slot.latest().unwrap().sequence, 3);
        // Repeated reads without a new publish return the same frame.
        assert_eq!(slot.latest().unwrap().sequence, 3);
    }

    #[test]
    fn reader_keeps_snapshot_after_overwrite() {
        let slot = FrameSlot::new();
        slot.publish(solid_frame(4, 4, 7));
        let held = slot.latest().unwrap();

        slot.publish(solid_frame(4, 4, 8));

        assert_eq!(held.sequence, 7);
        assert!(held.pixels().iter().all(|&p| p == 7));
        assert_eq!(slot.latest().unwrap().sequence, 8);
    }

    #[test]
    fn concurrent_reader_never_sees_partial_frame() {
        let slot = Arc::new(FrameSlot::new());
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let slot = Arc::clone(&slot);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for sequence in 1..=2_000u64 {
                    slot.publish(solid_frame(32, 24, sequence));
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let mut last_seen = 0u64;
        loop {
            let finished = done.load(Ordering::SeqCst);
            if let Some(frame) = slot.latest() {
                let fill = (frame.sequence % 256) as u8;
                assert_eq!(frame.pixels().len(), 32 * 24 * BYTES_PER_PIXEL);
                assert!(frame.pixels().iter().all(|&p| p == fill));
                assert!(frame.sequence >= last_seen);
                last_seen = frame.sequence;
            }
            if finished {
                break;
            }
        }

        writer.join().unwrap();
        assert_eq!(slot.latest().unwrap().sequence, 2_000);
    }
}
