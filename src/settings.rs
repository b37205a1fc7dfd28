//! ==============================================================================
//! settings.rs - target values forwarded to the device
//! ==============================================================================
//!
//! purpose:
//!     holds the systolic / diastolic / heart-rate targets and the zero and
//!     calibration offsets for the current session.
//!
//! invariant:
//!     diastolic < systolic after every mutation. whichever value is being
//!     changed is clamped, the other one is left alone.
//!
//! ==============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::domain::{ConnectionState, SettingsUpdate};

/// wire value for an offset that has not been captured yet
pub const OFFSET_UNSET: f64 = -1.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Sensor not connected or no data received!")]
    NoData,
    #[error("Please capture Zero first!")]
    ZeroNotCaptured,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TargetSettings {
    systolic: i32,
    diastolic: i32,
    heart_rate: i32,
    zero: f64,
    calibration: f64,
}

impl TargetSettings {
    pub fn new(systolic: i32, diastolic: i32, heart_rate: i32) -> Self {
        let mut settings = Self {
            systolic,
            diastolic,
            heart_rate,
            zero: OFFSET_UNSET,
            calibration: OFFSET_UNSET,
        };
        settings.restore_order();
        settings
    }

    pub fn systolic(&self) -> i32 {
        self.systolic
    }

    pub fn diastolic(&self) -> i32 {
        self.diastolic
    }

    pub fn heart_rate(&self) -> i32 {
        self.heart_rate
    }

    pub fn zero(&self) -> f64 {
        self.zero
    }

    pub fn calibration(&self) -> f64 {
        self.calibration
    }

    pub fn zero_captured(&self) -> bool {
        self.zero != OFFSET_UNSET
    }

    /// set systolic, raising it to diastolic + 1 if it would not stay above
    pub fn set_systolic(&mut self, value: i32) -> i32 {
        self.systolic = if value <= self.diastolic { self.diastolic + 1 } else { value };
        self.systolic
    }

    /// set diastolic, lowering it to systolic - 1 if it would not stay below
    pub fn set_diastolic(&mut self, value: i32) -> i32 {
        self.diastolic = if value >= self.systolic { self.systolic - 1 } else { value };
        self.diastolic
    }

    pub fn set_heart_rate(&mut self, value: i32) -> i32 {
        self.heart_rate = value;
        value
    }

    /// apply the fields present in `update`
    ///
    /// a lone systolic or diastolic is clamped like a slider move. when both
    /// arrive together the submitted systolic wins on conflict.
    pub fn apply(&mut self, update: &SettingsUpdate) {
        match (update.systolic, update.diastolic) {
            (Some(systolic), Some(diastolic)) => {
                self.systolic = systolic;
                self.diastolic = diastolic;
            }
            (Some(systolic), None) => {
                self.set_systolic(systolic);
            }
            (None, Some(diastolic)) => {
                self.set_diastolic(diastolic);
            }
            (None, None) => {}
        }
        if let Some(heart_rate) = update.heart_rate {
            self.heart_rate = heart_rate;
        }
        if let Some(zero) = update.zero {
            self.zero = zero;
        }
        if let Some(calibration) = update.calibration {
            self.calibration = calibration;
        }
        self.restore_order();
    }

    /// record the latest raw reading as the zero reference
    pub fn capture_zero(&mut self, state: ConnectionState, latest: Option<f64>) -> Result<f64, CaptureError> {
        let value = connected_value(state, latest)?;
        self.zero = value;
        Ok(value)
    }

    /// record the latest raw reading as the calibration reference
    pub fn capture_calibration(
        &mut self,
        state: ConnectionState,
        latest: Option<f64>,
    ) -> Result<f64, CaptureError> {
        let value = connected_value(state, latest)?;
        if !self.zero_captured() {
            return Err(CaptureError::ZeroNotCaptured);
        }
        self.calibration = value;
        Ok(value)
    }

    fn restore_order(&mut self) {
        if self.diastolic >= self.systolic {
            if self.systolic == i32::MIN {
                self.systolic += 1;
            }
            self.diastolic = self.systolic - 1;
        }
    }
}

fn connected_value(state: ConnectionState, latest: Option<f64>) -> Result<f64, CaptureError> {
    match (state, latest) {
        (ConnectionState::Connected, Some(value)) => Ok(value),
        _ => Err(CaptureError::NoData),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ordered(s: &TargetSettings) -> bool {
        s.diastolic() < s.systolic()
    }

    #[test]
    fn test_systolic_clamps_above_diastolic() {
        let mut s = TargetSettings::new(120, 80, 75);
        assert_eq!(s.set_systolic(80), 81);
        assert_eq!(s.systolic(), 81);
        assert_eq!(s.diastolic(), 80);

        assert_eq!(s.set_systolic(40), 81);
        assert_eq!(s.set_systolic(140), 140);
        assert!(ordered(&s));
    }

    #[test]
    fn test_diastolic_clamps_below_systolic() {
        let mut s = TargetSettings::new(120, 80, 75);
        assert_eq!(s.set_diastolic(120), 119);
        assert_eq!(s.set_diastolic(200), 119);
        assert_eq!(s.set_diastolic(60), 60);
        assert_eq!(s.systolic(), 120);
        assert!(ordered(&s));
    }

    #[test]
    fn test_order_holds_over_any_sequence() {
        let mut s = TargetSettings::new(120, 80, 75);
        let steps = [90, 95, 60, 200, 201, 199, 0, -5, 300, 300];
        for (i, v) in steps.iter().enumerate() {
            if i % 2 == 0 {
                s.set_systolic(*v);
            } else {
                s.set_diastolic(*v);
            }
            assert!(ordered(&s), "violated after step {}: {:?}", i, s);
        }
    }

    #[test]
    fn test_new_repairs_inverted_pair() {
        let s = TargetSettings::new(80, 80, 70);
        assert_eq!(s.diastolic(), 79);

        let s = TargetSettings::new(i32::MIN, i32::MIN, 0);
        assert!(ordered(&s));
    }

    #[test]
    fn test_heart_rate_is_unchecked() {
        let mut s = TargetSettings::new(120, 80, 75);
        assert_eq!(s.set_heart_rate(-3), -3);
        assert_eq!(s.set_heart_rate(400), 400);
    }

    #[test]
    fn test_apply_full_update() {
        let mut s = TargetSettings::new(120, 80, 75);
        s.apply(&SettingsUpdate {
            systolic: Some(70),
            diastolic: Some(60),
            heart_rate: Some(90),
            zero: None,
            calibration: Some(600.25),
        });
        assert_eq!((s.systolic(), s.diastolic(), s.heart_rate()), (70, 60, 90));
        assert_eq!(s.zero(), OFFSET_UNSET);
        assert_eq!(s.calibration(), 600.25);

        s.apply(&SettingsUpdate {
            systolic: Some(100),
            diastolic: Some(130),
            heart_rate: Some(90),
            zero: None,
            calibration: None,
        });
        assert_eq!((s.systolic(), s.diastolic()), (100, 99));
    }

    #[test]
    fn test_apply_partial_update() {
        let mut s = TargetSettings::new(120, 80, 75);
        s.apply(&SettingsUpdate { heart_rate: Some(64), ..Default::default() });
        assert_eq!((s.systolic(), s.diastolic(), s.heart_rate()), (120, 80, 64));

        s.apply(&SettingsUpdate { systolic: Some(80), ..Default::default() });
        assert_eq!((s.systolic(), s.diastolic()), (81, 80));

        s.apply(&SettingsUpdate { diastolic: Some(95), ..Default::default() });
        assert_eq!((s.systolic(), s.diastolic()), (81, 80));

        s.apply(&SettingsUpdate { diastolic: Some(70), ..Default::default() });
        assert_eq!((s.systolic(), s.diastolic()), (81, 70));

        s.apply(&SettingsUpdate::default());
        assert_eq!((s.systolic(), s.diastolic(), s.heart_rate()), (81, 70, 64));
        assert_eq!(s.zero(), OFFSET_UNSET);
    }

    #[test]
    fn test_capture_requires_connection_and_data() {
        let mut s = TargetSettings::new(120, 80, 75);
        assert_eq!(s.capture_zero(ConnectionState::Disconnected, Some(512.0)), Err(CaptureError::NoData));
        assert_eq!(s.capture_zero(ConnectionState::Connected, None), Err(CaptureError::NoData));
        assert!(!s.zero_captured());
    }

    #[test]
    fn test_calibration_needs_zero_first() {
        let mut s = TargetSettings::new(120, 80, 75);
        assert_eq!(
            s.capture_calibration(ConnectionState::Connected, Some(700.0)),
            Err(CaptureError::ZeroNotCaptured)
        );
        assert_eq!(s.calibration(), OFFSET_UNSET);

        assert_eq!(s.capture_zero(ConnectionState::Connected, Some(512.5)), Ok(512.5));
        assert_eq!(s.capture_calibration(ConnectionState::Connected, Some(700.0)), Ok(700.0));
        assert_eq!(s.zero(), 512.5);
        assert_eq!(s.calibration(), 700.0);
    }
}
