use serde::{Deserialize, Serialize};

use crate::settings::TargetSettings;

/// display-side link state, derived from how recently a sample arrived
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// messages pushed from the host to every dashboard client
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// every sample flushed in one tick, oldest first
    Batch { values: Vec<f64>, timestamp_ms: u64 },
    /// status indicator plus the formatted readout ("120.02" or "--")
    Status { state: ConnectionState, readout: String },
    /// current targets as last forwarded to the device
    Settings(TargetSettings),
    /// outcome of a user-initiated action, only sent to the requester
    Notice { ok: bool, message: String },
}

/// messages a dashboard client may send
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SetSystolic { value: i32 },
    SetDiastolic { value: i32 },
    SetHeartRate { value: i32 },
    Update(SettingsUpdate),
    CaptureZero,
    CaptureCalibration,
    /// ask whether the device link is up; failures come back as a notice
    Connect,
}

/// a targets update
///
/// accepts both the long field names and the short ones older dashboards
/// post (`sys`, `dia`, `hr`, `zero`, `calib`). fields left out keep their
/// current value.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SettingsUpdate {
    #[serde(default, alias = "sys")]
    pub systolic: Option<i32>,
    #[serde(default, alias = "dia")]
    pub diastolic: Option<i32>,
    #[serde(default, alias = "hr")]
    pub heart_rate: Option<i32>,
    #[serde(default)]
    pub zero: Option<f64>,
    #[serde(default, alias = "calib")]
    pub calibration: Option<f64>,
}

/// point-in-time view of the session, served by `GET /api/status` and
/// replayed to clients as they connect
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub readout: String,
    pub latest: Option<f64>,
    pub device_open: bool,
    /// why the last open attempt failed, until the device opens again
    pub last_open_error: Option<String>,
    pub settings: TargetSettings,
}

impl Snapshot {
    /// messages a newly connected client needs to render the current state
    pub fn replay(&self) -> Vec<ServerMessage> {
        let mut messages = vec![
            ServerMessage::Status { state: self.state, readout: self.readout.clone() },
            ServerMessage::Settings(self.settings.clone()),
        ];
        if let Some(value) = self.latest {
            messages.push(ServerMessage::Batch { values: vec![value], timestamp_ms: get_timestamp_ms() });
        }
        messages
    }
}

/// get current timestamp in milliseconds (unix epoch)
pub fn get_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
