//! Stop-sign controller
//!
//! Watches a camera for a stop sign and drives an actuator over a serial line with a
//! single-byte stop/move directive.
//!
//! # Architecture
//!
//! - `ingest`: `FrameSource` runs a background acquisition worker over a
//!   `CaptureDevice` and publishes the newest frame into a single-slot buffer.
//! - `frame`: immutable `Frame` snapshots and the `FrameSlot` handoff.
//! - `detect`: stateless `DetectorBackend`s; frame in, bounding boxes out.
//! - `control`: `StabilityController`, the debounced `Moving`/`Stopping` state machine.
//! - `sink`: `SignalSink`, best-effort serial transmission of `'0'`/`'1'`.
//! - `orchestrator`: the control loop tying the above together.
//! - `config` / `logging`: startup configuration and log setup.
//!
//! Failures inside a component stay inside it: a bad frame read, a failed detection or
//! a failed serial write is logged and the loop carries on. Only startup failures
//! (camera, detector model, configuration) are fatal.

pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod orchestrator;
pub mod sink;

pub use config::ControllerConfig;
pub use control::{ControlSignal, ControlState, StabilityController, MOVE_BYTE, STOP_BYTE};
pub use detect::{BoundingBox, DetectionResult, Detector, DetectorBackend};
pub use frame::{Frame, FrameSlot};
pub use ingest::{open_capture_device, CaptureDevice, FrameSource, SourceSettings};
pub use logging::init_logging;
pub use orchestrator::{Iteration, Orchestrator, OrchestratorSettings, RunSummary, StopHandle};
pub use sink::SignalSink;
