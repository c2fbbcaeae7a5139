//! Control loop: frame snapshot -> detection -> debounce -> actuator signal.
//!
//! Shutdown order is the reverse of the dependency order: the frame source stops
//! first, then the signal sink sends its fail-safe byte and closes.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ControlSettings;
use crate::control::{ControlSignal, ControlState, StabilityController};
use crate::detect::{BoundingBox, DetectionResult, Detector};
use crate::ingest::FrameSource;
use crate::sink::SignalSink;

/// Cloneable handle the operator side uses to end the loop.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one iteration did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Iteration {
    /// No frame captured yet; nothing was detected, updated or sent.
    NoFrame,
    Processed {
        sequence: u64,
        detected: bool,
        boxes: Vec<BoundingBox>,
        signal: ControlSignal,
    },
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    /// Pause when there is no new frame to look at.
    pub idle_delay: Duration,
    /// Period of the status log line.
    pub status_interval: Duration,
}

impl From<&ControlSettings> for OrchestratorSettings {
    fn from(control: &ControlSettings) -> Self {
        Self {
            idle_delay: control.idle_delay,
            status_interval: control.status_interval,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub frames_detected: u64,
    pub stop_signals: u64,
}

pub struct Orchestrator {
    source: FrameSource,
    detector: Detector,
    controller: StabilityController,
    sink: SignalSink,
    settings: OrchestratorSettings,
    stop: StopHandle,
    /// Detection for the most recently analysed frame, reused while it is still latest.
    last_detection: Option<(u64, DetectionResult)>,
    summary: RunSummary,
    last_status: Instant,
    shut_down: bool,
}

impl Orchestrator {
    pub fn new(
        source: FrameSource,
        detector: Detector,
        controller: StabilityController,
        sink: SignalSink,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            source,
            detector,
            controller,
            sink,
            settings,
            stop: StopHandle::new(),
            last_detection: None,
            summary: RunSummary::default(),
            last_status: Instant::now(),
            shut_down: false,
        }
    }

    /// Start acquisition (fatal on failure) and, if asked, connect the serial link
    /// (degraded mode on failure).
    pub fn start(&mut self, connect_serial: bool) -> Result<()> {
        self.source.start()?;
        if !connect_serial {
            log::warn!("serial output disabled. running without serial communication.");
        } else if !self.sink.connect() {
            log::warn!("running without serial communication.");
        }
        Ok(())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> ControlState {
        self.controller.state()
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    pub fn sink(&self) -> &SignalSink {
        &self.sink
    }

    /// Run one pass of the loop against the current frame snapshot.
    pub fn run_iteration(&mut self) -> Iteration {
        let Some(frame) = self.source.latest() else {
            return Iteration::NoFrame;
        };
        self.summary.iterations += 1;

        let detection = match &self.last_detection {
            // Detection is stateless, so the same frame gives the same answer.
            Some((sequence, cached)) if *sequence == frame.sequence => cached.clone(),
            _ => {
                let fresh = self.detector.detect_frame(Some(&frame));
                self.last_detection = Some((frame.sequence, fresh.clone()));
                fresh
            }
        };
        if detection.present {
            self.summary.frames_detected += 1;
        }

        self.controller.update(detection.present);
        let signal = self.controller.signal();
        if signal == ControlSignal::Stop {
            self.summary.stop_signals += 1;
        }
        self.sink.send(signal);

        Iteration::Processed {
            sequence: frame.sequence,
            detected: detection.present,
            boxes: detection.boxes,
            signal,
        }
    }

    /// Loop until a stop is requested, then shut everything down.
    pub fn run(&mut self) -> RunSummary {
        log::info!(
            "control loop running (detector={}, hold={:?})",
            self.detector.backend_name(),
            self.controller.stop_duration()
        );
        let mut last_sequence = None;
        while !self.stop.is_stop_requested() {
            match self.run_iteration() {
                Iteration::Processed { sequence, .. } if last_sequence != Some(sequence) => {
                    last_sequence = Some(sequence);
                }
                _ => std::thread::sleep(self.settings.idle_delay),
            }
            self.log_status_if_due();
        }
        log::info!("shutting down system...");
        self.shutdown();
        self.summary
    }

    /// Stop the frame source, then disconnect the sink. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.source.stop();
        self.sink.disconnect();
        log::info!(
            "shutdown complete ({} iterations, {} with detections)",
            self.summary.iterations,
            self.summary.frames_detected
        );
    }

    fn log_status_if_due(&mut self) {
        if self.last_status.elapsed() < self.settings.status_interval {
            return;
        }
        let stats = self.source.stats();
        log::info!(
            "STATE: {} frames={} read_failures={} healthy={} serial={} device={}",
            self.controller.state(),
            stats.frames_captured,
            stats.read_failures,
            stats.healthy,
            self.sink.is_connected(),
            stats.device
        );
        self.last_status = Instant::now();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
