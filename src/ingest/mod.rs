//! Frame acquisition.
//!
//! `FrameSource` owns a `CaptureDevice` and runs a background acquisition worker that
//! keeps replacing the single latest-frame slot. The control loop reads snapshots from
//! the slot and never waits on the device.
//!
//! Backends:
//! - `stub://<name>`: synthetic camera (always available)
//! - `/dev/videoN`: V4L2 device (feature: camera-v4l2)

pub mod synthetic;
#[cfg(feature = "camera-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::CameraSettings;
use crate::frame::{Frame, FrameSlot};

pub use synthetic::{SignSchedule, SyntheticCamera};
#[cfg(feature = "camera-v4l2")]
pub use v4l2::V4l2Camera;

/// Longest single sleep while backing off, so a stop request is noticed quickly.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// A source with no frame for this long reports unhealthy.
const HEALTH_GRACE: Duration = Duration::from_secs(2);

/// Packed RGB24 image as read from a device.
#[derive(Debug)]
pub struct CapturedImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// A camera the frame source can drive.
///
/// `read_frame` may block up to the driver's own timeout. `release` is called exactly
/// once, from the thread that last used the device.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    /// Open the device at the requested resolution. Busy devices fail here.
    fn open(&mut self, width: u32, height: u32) -> Result<()>;

    fn read_frame(&mut self) -> Result<CapturedImage>;

    fn release(&mut self);
}

/// Build the capture device named by the camera settings.
pub fn open_capture_device(camera: &CameraSettings) -> Result<Box<dyn CaptureDevice>> {
    let path = camera.device_path();
    if path.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(&path, camera.target_fps)));
    }
    #[cfg(feature = "camera-v4l2")]
    {
        Ok(Box::new(V4l2Camera::new(&path, camera.target_fps)))
    }
    #[cfg(not(feature = "camera-v4l2"))]
    {
        Err(anyhow!(
            "camera device {} requires the camera-v4l2 feature",
            path
        ))
    }
}

/// Timing knobs for the acquisition worker.
#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    /// Back-off after a failed read.
    pub read_retry_delay: Duration,
    /// Upper bound on waiting for the worker during `stop()`.
    pub join_timeout: Duration,
}

impl From<&CameraSettings> for SourceSettings {
    fn from(camera: &CameraSettings) -> Self {
        Self {
            width: camera.width,
            height: camera.height,
            read_retry_delay: camera.read_retry_delay,
            join_timeout: camera.join_timeout,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub device: String,
    pub healthy: bool,
}

#[derive(Debug)]
struct SourceCounters {
    started_at: Instant,
    frames: AtomicU64,
    failures: AtomicU64,
    /// Milliseconds after `started_at` of the newest frame, plus one (0 = none yet).
    last_frame_ms: AtomicU64,
}

impl SourceCounters {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            frames: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_frame_ms: AtomicU64::new(0),
        }
    }

    fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let ms = self.started_at.elapsed().as_millis() as u64 + 1;
        self.last_frame_ms.store(ms, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn since_last_frame(&self) -> Option<Duration> {
        match self.last_frame_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => {
                let at = Duration::from_millis(ms - 1);
                Some(self.started_at.elapsed().saturating_sub(at))
            }
        }
    }
}

struct Worker {
    stop_signal: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Continuously acquires frames on a worker thread and publishes the newest one.
pub struct FrameSource {
    /// Present until `start()` hands the device to the worker.
    device: Option<Box<dyn CaptureDevice>>,
    device_name: String,
    settings: SourceSettings,
    slot: Arc<FrameSlot>,
    counters: Arc<SourceCounters>,
    worker: Option<Worker>,
    stopped: bool,
}

impl FrameSource {
    pub fn new(device: Box<dyn CaptureDevice>, settings: SourceSettings) -> Self {
        Self {
            device_name: device.name().to_string(),
            device: Some(device),
            settings,
            slot: Arc::new(FrameSlot::new()),
            counters: Arc::new(SourceCounters::new()),
            worker: None,
            stopped: false,
        }
    }

    /// Open the device and spawn the acquisition worker.
    ///
    /// On failure the device stays with the source and `start()` may be retried.
    pub fn start(&mut self) -> Result<()> {
        if self.stopped {
            return Err(anyhow!("frame source {} was already stopped", self.device_name));
        }
        if self.worker.is_some() {
            return Err(anyhow!("frame source {} is already running", self.device_name));
        }
        let mut device = self
            .device
            .take()
            .ok_or_else(|| anyhow!("frame source {} has no device", self.device_name))?;

        if let Err(err) = device.open(self.settings.width, self.settings.height) {
            log::error!("FrameSource: cannot open camera {}: {:#}", self.device_name, err);
            self.device = Some(device);
            return Err(err);
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop_signal = Arc::clone(&stop_signal);
            let slot = Arc::clone(&self.slot);
            let counters = Arc::clone(&self.counters);
            let retry_delay = self.settings.read_retry_delay;
            thread::Builder::new()
                .name("frame-acquisition".to_string())
                .spawn(move || acquisition_loop(device, slot, counters, stop_signal, retry_delay))
                .map_err(|e| anyhow!("failed to spawn acquisition thread: {}", e))?
        };
        self.worker = Some(Worker {
            stop_signal,
            handle,
        });
        log::info!("FrameSource: started on {}", self.device_name);
        Ok(())
    }

    /// Newest frame snapshot, or `None` before the first successful read.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Signal the worker, wait for it (bounded), and let it release the device.
    ///
    /// Calling this again, or without a prior `start()`, does nothing harmful.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let Some(worker) = self.worker.take() else {
            if let Some(mut device) = self.device.take() {
                device.release();
            }
            return;
        };

        worker.stop_signal.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + self.settings.join_timeout;
        while !worker.handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if worker.handle.is_finished() {
            if worker.handle.join().is_err() {
                log::error!("FrameSource: acquisition thread for {} panicked", self.device_name);
            }
            log::info!("FrameSource: stopped {}", self.device_name);
        } else {
            // The worker still owns the device and releases it when its read returns.
            log::warn!(
                "FrameSource: acquisition thread for {} did not exit within {:?}; detaching",
                self.device_name,
                self.settings.join_timeout
            );
        }
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.counters.frames.load(Ordering::Relaxed),
            read_failures: self.counters.failures.load(Ordering::Relaxed),
            device: self.device_name.clone(),
            healthy: self.is_healthy(),
        }
    }

    /// Running and produced a frame recently (or is still within the startup grace).
    pub fn is_healthy(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.counters.since_last_frame() {
            Some(gap) => gap <= HEALTH_GRACE,
            None => self.counters.started_at.elapsed() <= HEALTH_GRACE,
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn acquisition_loop(
    mut device: Box<dyn CaptureDevice>,
    slot: Arc<FrameSlot>,
    counters: Arc<SourceCounters>,
    stop_signal: Arc<AtomicBool>,
    retry_delay: Duration,
) {
    let mut sequence = 0u64;
    log::debug!("FrameSource: acquisition loop running for {}", device.name());

    while !stop_signal.load(Ordering::SeqCst) {
        let frame = device.read_frame().and_then(|image| {
            Frame::new(image.pixels, image.width, image.height, sequence + 1)
        });
        match frame {
            Ok(frame) => {
                sequence = frame.sequence;
                slot.publish(frame);
                counters.record_frame();
            }
            Err(err) => {
                counters.record_failure();
                log::warn!(
                    "FrameSource: failed to grab frame from {}: {:#}. retrying",
                    device.name(),
                    err
                );
                sleep_unless_stopped(&stop_signal, retry_delay);
            }
        }
    }

    device.release();
    log::debug!("FrameSource: released {}", device.name());
}

fn sleep_unless_stopped(stop_signal: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop_signal.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Scripted device: fails the first `fail_reads` reads, records lifecycle calls.
    struct ScriptedDevice {
        open_ok: bool,
        fail_reads: u32,
        reads: Arc<AtomicU64>,
        released: Arc<Mutex<u32>>,
    }

    impl ScriptedDevice {
        fn new(open_ok: bool, fail_reads: u32) -> (Self, Arc<AtomicU64>, Arc<Mutex<u32>>) {
            let reads = Arc::new(AtomicU64::new(0));
            let released = Arc::new(Mutex::new(0));
            let device = Self {
                open_ok,
                fail_reads,
                reads: Arc::clone(&reads),
                released: Arc::clone(&released),
            };
            (device, reads, released)
        }
    }

    impl CaptureDevice for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        fn open(&mut self, _width: u32, _height: u32) -> Result<()> {
            if self.open_ok {
                Ok(())
            } else {
                Err(anyhow!("device busy"))
            }
        }

        fn read_frame(&mut self) -> Result<CapturedImage> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(1));
            if n < self.fail_reads as u64 {
                return Err(anyhow!("read timeout"));
            }
            Ok(CapturedImage {
                pixels: vec![n as u8; 2 * 2 * 3],
                width: 2,
                height: 2,
            })
        }

        fn release(&mut self) {
            *self.released.lock().unwrap() += 1;
        }
    }

    fn settings(retry_ms: u64) -> SourceSettings {
        SourceSettings {
            width: 2,
            height: 2,
            read_retry_delay: Duration::from_millis(retry_ms),
            join_timeout: Duration::from_secs(2),
        }
    }

    fn wait_for_frame(source: &FrameSource) -> Arc<Frame> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(frame) = source.latest() {
                return frame;
            }
            assert!(Instant::now() < deadline, "no frame within deadline");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn open_failure_is_reported_and_nothing_runs() {
        let (device, reads, released) = ScriptedDevice::new(false, 0);
        let mut source = FrameSource::new(Box::new(device), settings(10));

        assert!(source.start().is_err());
        assert!(!source.is_running());
        assert!(source.latest().is_none());
        assert_eq!(reads.load(Ordering::SeqCst), 0);

        source.stop();
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[test]
    fn publishes_frames_with_increasing_sequence() {
        let (device, _reads, released) = ScriptedDevice::new(true, 0);
        let mut source = FrameSource::new(Box::new(device), settings(10));
        source.start().unwrap();

        let first = wait_for_frame(&source);
        thread::sleep(Duration::from_millis(20));
        let later = source.latest().unwrap();
        assert!(later.sequence >= first.sequence);

        source.stop();
        assert!(!source.is_running());
        assert_eq!(*released.lock().unwrap(), 1);
        assert!(source.stats().frames_captured >= later.sequence);
    }

    #[test]
    fn read_failures_back_off_and_recover() {
        let (device, _reads, _released) = ScriptedDevice::new(true, 3);
        let mut source = FrameSource::new(Box::new(device), settings(30));
        let started = Instant::now();
        source.start().unwrap();

        let frame = wait_for_frame(&source);
        // Three failed reads, each followed by a 30 ms back-off.
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert!(frame.sequence >= 1);
        assert_eq!(source.stats().read_failures, 3);
        source.stop();
    }

    #[test]
    fn stop_interrupts_long_back_off() {
        let (device, _reads, released) = ScriptedDevice::new(true, u32::MAX);
        let mut source = FrameSource::new(Box::new(device), settings(60_000));
        source.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let begun = Instant::now();
        source.stop();
        assert!(begun.elapsed() < Duration::from_secs(1));
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[test]
    fn stop_is_idempotent_and_start_after_stop_fails() {
        let (device, _reads, released) = ScriptedDevice::new(true, 0);
        let mut source = FrameSource::new(Box::new(device), settings(10));
        source.start().unwrap();
        assert!(source.start().is_err());

        source.stop();
        source.stop();
        drop(source);
        assert_eq!(*released.lock().unwrap(), 1);

        let (device, _reads, _released) = ScriptedDevice::new(true, 0);
        let mut source = FrameSource::new(Box::new(device), settings(10));
        source.stop();
        assert!(source.start().is_err());
    }
}
