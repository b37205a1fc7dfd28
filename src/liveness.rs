//! ==============================================================================
//! liveness.rs - display-side connected/disconnected heuristic
//! ==============================================================================
//!
//! purpose:
//!     decides what the status indicator and numeric readout show.
//!     it never touches the serial link itself; a silent device is only
//!     *displayed* as disconnected.
//!
//! state machine:
//!
//!     Disconnected --(device opened)--> Connected
//!     Connected    --(silence >= threshold)--> Disconnected
//!     Disconnected --(sample delivered)--> Connected
//!     any          --(device closed)--> Disconnected
//!
//! every method that can change state returns the new state only when it
//! actually changed, so callers publish each transition exactly once.
//!
//! ==============================================================================

use std::time::{Duration, Instant};

use crate::domain::ConnectionState;

/// readout shown when there is nothing current to display
pub const NO_DATA: &str = "--";

#[derive(Debug)]
pub struct LivenessMonitor {
    threshold: Duration,
    last_seen: Option<Instant>,
    state: ConnectionState,
    latest: Option<f64>,
}

impl LivenessMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_seen: None,
            state: ConnectionState::Disconnected,
            latest: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// most recent value delivered to the UI, kept across disconnects
    pub fn latest(&self) -> Option<f64> {
        self.latest
    }

    /// formatted readout: two decimals while connected, `--` otherwise
    pub fn readout(&self) -> String {
        match (self.state, self.latest) {
            (ConnectionState::Connected, Some(value)) => format!("{:.2}", value),
            _ => NO_DATA.to_string(),
        }
    }

    /// the device was opened; silence is measured from here
    pub fn mark_open(&mut self, now: Instant) -> Option<ConnectionState> {
        self.last_seen = Some(now);
        self.transition(ConnectionState::Connected)
    }

    /// the device closed or failed
    pub fn mark_closed(&mut self) -> Option<ConnectionState> {
        self.last_seen = None;
        self.transition(ConnectionState::Disconnected)
    }

    /// a sample reached the UI-facing layer
    pub fn observe(&mut self, value: f64, now: Instant) -> Option<ConnectionState> {
        self.latest = Some(value);
        self.last_seen = Some(now);
        self.transition(ConnectionState::Connected)
    }

    /// periodic check against the silence threshold
    pub fn check(&mut self, now: Instant) -> Option<ConnectionState> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        let silent_for = match self.last_seen {
            Some(last) => now.saturating_duration_since(last),
            None => return self.transition(ConnectionState::Disconnected),
        };
        if silent_for >= self.threshold {
            self.transition(ConnectionState::Disconnected)
        } else {
            None
        }
    }

    fn transition(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_millis(3000);

    #[test]
    fn test_starts_disconnected() {
        let mut monitor = LivenessMonitor::new(THRESHOLD);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
        assert_eq!(monitor.readout(), NO_DATA);
        assert_eq!(monitor.check(Instant::now()), None);
    }

    #[test]
    fn test_silence_disconnects_exactly_once() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(THRESHOLD);
        monitor.mark_open(t0);
        assert_eq!(monitor.observe(120.02, t0), None);
        assert_eq!(monitor.readout(), "120.02");

        assert_eq!(monitor.check(t0 + Duration::from_millis(2999)), None);
        assert_eq!(
            monitor.check(t0 + Duration::from_millis(3001)),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(monitor.readout(), NO_DATA);
        assert_eq!(monitor.check(t0 + Duration::from_millis(3250)), None);
        assert_eq!(monitor.check(t0 + Duration::from_millis(9000)), None);
        assert_eq!(monitor.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(THRESHOLD);
        monitor.observe(1.0, t0);
        assert_eq!(monitor.check(t0 + THRESHOLD), Some(ConnectionState::Disconnected));
    }

    #[test]
    fn test_one_sample_reconnects() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(THRESHOLD);
        monitor.observe(100.0, t0);
        monitor.check(t0 + Duration::from_secs(4));
        assert_eq!(monitor.state(), ConnectionState::Disconnected);

        let t1 = t0 + Duration::from_secs(5);
        assert_eq!(monitor.observe(101.5, t1), Some(ConnectionState::Connected));
        assert_eq!(monitor.readout(), "101.50");
        assert_eq!(monitor.check(t1 + Duration::from_millis(10)), None);
    }

    #[test]
    fn test_open_without_data_times_out() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(THRESHOLD);
        assert_eq!(monitor.mark_open(t0), Some(ConnectionState::Connected));
        assert_eq!(monitor.readout(), NO_DATA);
        assert_eq!(monitor.check(t0 + Duration::from_secs(3)), Some(ConnectionState::Disconnected));
    }

    #[test]
    fn test_close_disconnects_but_keeps_latest() {
        let t0 = Instant::now();
        let mut monitor = LivenessMonitor::new(THRESHOLD);
        monitor.observe(99.0, t0);
        assert_eq!(monitor.mark_closed(), Some(ConnectionState::Disconnected));
        assert_eq!(monitor.mark_closed(), None);
        assert_eq!(monitor.latest(), Some(99.0));
        assert_eq!(monitor.readout(), NO_DATA);
    }
}
