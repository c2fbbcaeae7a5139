//! V4L2 capture device.
//!
//! Opens a local device node (e.g. /dev/video0), requests RGB24 at the configured
//! resolution and streams frames through an mmap buffer queue.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::{CaptureDevice, CapturedImage};
use crate::frame::BYTES_PER_PIXEL;

const BUFFER_COUNT: u32 = 4;

pub struct V4l2Camera {
    path: String,
    target_fps: u32,
    state: Option<V4l2State>,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(path: &str, target_fps: u32) -> Self {
        Self {
            path: path.to_string(),
            target_fps,
            state: None,
            active_width: 0,
            active_height: 0,
        }
    }
}

impl CaptureDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.path
    }

    fn open(&mut self, width: u32, height: u32) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.path)
            .with_context(|| format!("open v4l2 device {}", self.path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = device
            .set_format(&format)
            .with_context(|| format!("set RGB3 {}x{} on {}", width, height, self.path))?;
        if format.fourcc != v4l::FourCC::new(b"RGB3") {
            return Err(anyhow!(
                "{} does not support RGB3 capture (driver chose {:?})",
                self.path,
                format.fourcc
            ));
        }

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Camera: failed to set fps on {}: {}", self.path, err);
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        // Creating the stream claims the device; a busy device fails here.
        let state = V4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Camera: opened {} ({}x{})",
            self.path,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<CapturedImage> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let pixels = state
            .with_mut(|fields| fields.stream.next().map(|(buf, _meta)| buf.to_vec()))
            .context("capture v4l2 frame")?;

        let expected = self.active_width as usize * self.active_height as usize * BYTES_PER_PIXEL;
        if pixels.len() < expected {
            return Err(anyhow!(
                "short v4l2 frame from {}: {} of {} bytes",
                self.path,
                pixels.len(),
                expected
            ));
        }
        let mut pixels = pixels;
        pixels.truncate(expected);

        Ok(CapturedImage {
            pixels,
            width: self.active_width,
            height: self.active_height,
        })
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Camera: released {}", self.path);
        }
    }
}
