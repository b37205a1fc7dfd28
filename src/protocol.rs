//! line protocol spoken with the microcontroller (v1)
//!
//! device -> host: one reading per line, e.g. `119.98\n`. anything that is not
//! a finite number (boot banners, debug prints, blank lines) is dropped.
//!
//! host -> device: `systolic,diastolic,heart_rate,zero,calibration\n`.
//! offsets use `-1` while unset.

use crate::settings::TargetSettings;

pub const PROTOCOL_VERSION: u8 = 1;

/// parse one device line into a sample
pub fn parse_sample_line(line: &str) -> Option<f64> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// render the settings line written to the device
pub fn encode_settings(settings: &TargetSettings) -> String {
    format!(
        "{},{},{},{},{}\n",
        settings.systolic(),
        settings.diastolic(),
        settings.heart_rate(),
        settings.zero(),
        settings.calibration()
    )
}
