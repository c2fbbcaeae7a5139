//! Debounced stop/move state machine.
//!
//! A positive detection latches `Stopping` and re-arms the hold timer every time it is
//! seen. The controller only falls back to `Moving` once strictly more than the hold
//! duration has passed since the most recent positive detection, so a single missed
//! frame never releases the actuator early.

use std::fmt;
use std::time::{Duration, Instant};

/// Wire byte for `Move` (ASCII `'0'`). Also the fail-safe byte on shutdown.
pub const MOVE_BYTE: u8 = b'0';
/// Wire byte for `Stop` (ASCII `'1'`).
pub const STOP_BYTE: u8 = b'1';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlState {
    Moving,
    Stopping,
}

impl ControlState {
    pub fn label(self) -> &'static str {
        match self {
            ControlState::Moving => "MOVING",
            ControlState::Stopping => "STOPPING",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    Move,
    Stop,
}

impl ControlSignal {
    pub fn as_byte(self) -> u8 {
        match self {
            ControlSignal::Move => MOVE_BYTE,
            ControlSignal::Stop => STOP_BYTE,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ControlSignal::Move => "MOVE",
            ControlSignal::Stop => "STOP",
        }
    }
}

impl From<ControlState> for ControlSignal {
    fn from(state: ControlState) -> Self {
        match state {
            ControlState::Stopping => ControlSignal::Stop,
            ControlState::Moving => ControlSignal::Move,
        }
    }
}

pub struct StabilityController {
    state: ControlState,
    stop_duration: Duration,
    /// Time of the most recent positive detection.
    stop_epoch: Option<Instant>,
    last_signal: Option<ControlSignal>,
    transitions: u64,
}

impl StabilityController {
    pub fn new(stop_duration: Duration) -> Self {
        Self {
            state: ControlState::Moving,
            stop_duration,
            stop_epoch: None,
            last_signal: None,
            transitions: 0,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn stop_duration(&self) -> Duration {
        self.stop_duration
    }

    /// Number of signal changes reported by `signal()` so far.
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Feed one detection outcome observed now.
    pub fn update(&mut self, detected: bool) {
        self.update_at(detected, Instant::now());
    }

    /// Feed one detection outcome observed at `now`.
    ///
    /// Both the re-arm and the expiry check use the same `now`, so the call that sees a
    /// detection always leaves the controller in `Stopping`, even with a zero hold.
    pub fn update_at(&mut self, detected: bool, now: Instant) {
        if detected {
            self.state = ControlState::Stopping;
            self.stop_epoch = Some(now);
        }

        if self.state == ControlState::Stopping {
            let elapsed = self
                .stop_epoch
                .map(|epoch| now.saturating_duration_since(epoch))
                .unwrap_or(Duration::MAX);
            if elapsed > self.stop_duration {
                self.state = ControlState::Moving;
                self.stop_epoch = None;
            }
        }
    }

    /// Signal for the current state. Logs a notice when it differs from the last call.
    pub fn signal(&mut self) -> ControlSignal {
        let signal = ControlSignal::from(self.state);
        if self.last_signal != Some(signal) {
            log::info!("STATE CHANGE: entering {} state", signal.label());
            self.transitions += 1;
        }
        self.last_signal = Some(signal);
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn starts_moving() {
        let mut controller = StabilityController::new(secs(2.0));
        assert_eq!(controller.state(), ControlState::Moving);
        assert_eq!(controller.signal(), ControlSignal::Move);
    }

    #[test]
    fn hold_expires_after_last_detection() {
        let t0 = Instant::now();
        let mut controller = StabilityController::new(secs(2.0));

        controller.update_at(true, t0);
        assert_eq!(controller.signal(), ControlSignal::Stop);

        controller.update_at(false, t0 + secs(1.0));
        assert_eq!(controller.signal(), ControlSignal::Stop);

        controller.update_at(false, t0 + secs(2.1));
        assert_eq!(controller.signal(), ControlSignal::Move);
        assert_eq!(controller.state(), ControlState::Moving);
    }

    #[test]
    fn release_requires_strictly_more_than_hold() {
        let t0 = Instant::now();
        let mut controller = StabilityController::new(secs(2.0));

        controller.update_at(true, t0);
        controller.update_at(false, t0 + secs(2.0));
        assert_eq!(controller.state(), ControlState::Stopping);

        controller.update_at(false, t0 + secs(2.0) + Duration::from_nanos(1));
        assert_eq!(controller.state(), ControlState::Moving);
    }

    #[test]
    fn stop_is_continuous_until_hold_expires() {
        let t0 = Instant::now();
        let hold = secs(1.0);
        let mut controller = StabilityController::new(hold);

        controller.update_at(true, t0);
        for step in 1..=100 {
            let now = t0 + hold.mul_f64(step as f64 / 100.0);
            controller.update_at(false, now);
            assert_eq!(controller.signal(), ControlSignal::Stop, "step {step}");
        }
        controller.update_at(false, t0 + hold + Duration::from_millis(1));
        assert_eq!(controller.signal(), ControlSignal::Move);
    }

    #[test]
    fn repeated_detection_rearms_the_hold() {
        let t0 = Instant::now();
        let hold = secs(1.0);
        let mut controller = StabilityController::new(hold);

        controller.update_at(true, t0);
        controller.update_at(true, t0 + hold.mul_f64(0.6));

        // Past the first detection's window but inside the re-armed one.
        controller.update_at(false, t0 + hold.mul_f64(1.2));
        assert_eq!(controller.signal(), ControlSignal::Stop);
        controller.update_at(false, t0 + hold.mul_f64(1.59));
        assert_eq!(controller.signal(), ControlSignal::Stop);

        controller.update_at(false, t0 + hold.mul_f64(1.61));
        assert_eq!(controller.signal(), ControlSignal::Move);
    }

    #[test]
    fn no_detection_while_moving_changes_nothing() {
        let t0 = Instant::now();
        let mut controller = StabilityController::new(secs(2.0));
        for step in 0..10 {
            controller.update_at(false, t0 + secs(step as f64));
            assert_eq!(controller.state(), ControlState::Moving);
        }
    }

    #[test]
    fn zero_hold_emits_stop_once_then_resumes() {
        let t0 = Instant::now();
        let mut controller = StabilityController::new(Duration::ZERO);

        controller.update_at(true, t0);
        assert_eq!(controller.signal(), ControlSignal::Stop);

        // Same instant: nothing has elapsed yet.
        controller.update_at(false, t0);
        assert_eq!(controller.signal(), ControlSignal::Stop);

        controller.update_at(false, t0 + Duration::from_nanos(1));
        assert_eq!(controller.signal(), ControlSignal::Move);
    }

    #[test]
    fn transition_notice_fires_only_on_change() {
        let t0 = Instant::now();
        let mut controller = StabilityController::new(secs(1.0));

        controller.signal();
        controller.signal();
        assert_eq!(controller.transition_count(), 1);

        controller.update_at(true, t0);
        controller.signal();
        controller.update_at(true, t0 + secs(0.5));
        controller.signal();
        assert_eq!(controller.transition_count(), 2);

        controller.update_at(false, t0 + secs(2.0));
        controller.signal();
        assert_eq!(controller.transition_count(), 3);
    }

    #[test]
    fn signal_bytes_match_wire_format() {
        assert_eq!(ControlSignal::Move.as_byte(), 0x30);
        assert_eq!(ControlSignal::Stop.as_byte(), 0x31);
    }
}
