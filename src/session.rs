//! ==============================================================================
//! session.rs - the bridge session and its event loop
//! ==============================================================================
//!
//! purpose:
//!     owns everything that changes while the bridge runs: the pending batch,
//!     the liveness monitor, the target settings and the device writer.
//!     a single task applies events in arrival order, so none of it is shared
//!     or locked.
//!
//! event sources:
//!     - link.rs: device opened / open failed / sample / device closed
//!     - server.rs: client commands and snapshot requests
//!     - two timers: batch flush and liveness check
//!
//! outputs:
//!     - broadcast channel of ServerMessage, one receiver per dashboard client
//!     - settings lines to the device writer while the device is open
//!
//! ==============================================================================

use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::batch::SampleBatcher;
use crate::config::HostConfig;
use crate::domain::{get_timestamp_ms, ClientMessage, ConnectionState, ServerMessage, Snapshot};
use crate::liveness::LivenessMonitor;
use crate::protocol;
use crate::settings::{CaptureError, TargetSettings};

const EVENT_QUEUE: usize = 1024;
const UPDATE_QUEUE: usize = 256;

#[derive(Debug)]
pub enum Event {
    /// device opened; lines sent here are written to it
    DeviceOpened(mpsc::UnboundedSender<String>),
    DeviceClosed,
    /// the device could not be opened; carries the reason
    OpenFailed(String),
    Sample(f64),
    Client {
        message: ClientMessage,
        reply: oneshot::Sender<Option<ServerMessage>>,
    },
    Snapshot(oneshot::Sender<Snapshot>),
}

pub struct Session {
    batcher: SampleBatcher,
    liveness: LivenessMonitor,
    settings: TargetSettings,
    device: Option<mpsc::UnboundedSender<String>>,
    last_open_error: Option<String>,
    updates: broadcast::Sender<ServerMessage>,
    show_sensor_data: bool,
}

impl Session {
    pub fn new(config: &HostConfig, updates: broadcast::Sender<ServerMessage>) -> Self {
        let targets = &config.targets;
        Self {
            batcher: SampleBatcher::new(config.stream.max_batch_size),
            liveness: LivenessMonitor::new(config.liveness.silence_threshold()),
            settings: TargetSettings::new(targets.systolic, targets.diastolic, targets.heart_rate),
            device: None,
            last_open_error: None,
            updates,
            show_sensor_data: config.logging.show_sensor_data,
        }
    }

    pub fn handle_event(&mut self, event: Event, now: Instant) {
        match event {
            Event::DeviceOpened(writer) => self.on_device_opened(writer, now),
            Event::DeviceClosed => self.on_device_closed(),
            Event::OpenFailed(reason) => self.on_open_failed(reason),
            Event::Sample(value) => self.on_sample(value),
            Event::Client { message, reply } => {
                let outcome = self.handle_client(message);
                let _ = reply.send(outcome);
            }
            Event::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    pub fn on_device_opened(&mut self, writer: mpsc::UnboundedSender<String>, now: Instant) {
        self.device = Some(writer);
        self.last_open_error = None;
        // device starts from the same targets the dashboard shows
        self.forward_settings();
        if let Some(state) = self.liveness.mark_open(now) {
            self.publish_status(state);
        }
    }

    pub fn on_device_closed(&mut self) {
        self.device = None;
        // samples read before the close still reach clients, but must not
        // count as a sign of life for a device that is gone
        if let Some(values) = self.batcher.flush() {
            self.publish(ServerMessage::Batch { values, timestamp_ms: get_timestamp_ms() });
        }
        if let Some(state) = self.liveness.mark_closed() {
            self.publish_status(state);
        }
    }

    pub fn on_open_failed(&mut self, reason: String) {
        self.last_open_error = Some(reason);
    }

    pub fn on_sample(&mut self, value: f64) {
        if self.device.is_none() {
            debug!(value, "sample after device closed; dropped");
            return;
        }
        self.batcher.push(value);
    }

    /// hand the pending batch to every client; returns whether anything was sent
    pub fn on_flush(&mut self, now: Instant) -> bool {
        let Some(values) = self.batcher.flush() else {
            return false;
        };
        if self.show_sensor_data {
            debug!(count = values.len(), last = ?values.last(), "flushing batch");
        }

        if let Some(&last) = values.last() {
            if let Some(state) = self.liveness.observe(last, now) {
                self.publish_status(state);
            }
        }
        self.publish(ServerMessage::Batch { values, timestamp_ms: get_timestamp_ms() });
        true
    }

    pub fn on_liveness_check(&mut self, now: Instant) {
        if let Some(state) = self.liveness.check(now) {
            self.publish_status(state);
        }
    }

    /// apply a dashboard command; returns a reply meant only for the sender
    pub fn handle_client(&mut self, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::SetSystolic { value } => {
                self.settings.set_systolic(value);
            }
            ClientMessage::SetDiastolic { value } => {
                self.settings.set_diastolic(value);
            }
            ClientMessage::SetHeartRate { value } => {
                self.settings.set_heart_rate(value);
            }
            ClientMessage::Update(update) => self.settings.apply(&update),
            ClientMessage::Connect => return Some(self.connect_outcome()),
            ClientMessage::CaptureZero => {
                let outcome = self
                    .settings
                    .capture_zero(self.liveness.state(), self.liveness.latest())
                    .map(|v| format!("Zero captured at raw value: {:.2}", v));
                return Some(self.capture_outcome(outcome));
            }
            ClientMessage::CaptureCalibration => {
                let outcome = self
                    .settings
                    .capture_calibration(self.liveness.state(), self.liveness.latest())
                    .map(|v| {
                        format!(
                            "Calibration captured at raw value: {:.2}\nCalibration active! Sensor will now display mmHg.",
                            v
                        )
                    });
                return Some(self.capture_outcome(outcome));
            }
        }
        self.forward_settings();
        None
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.liveness.state(),
            readout: self.liveness.readout(),
            latest: self.liveness.latest(),
            device_open: self.device.is_some(),
            last_open_error: self.last_open_error.clone(),
            settings: self.settings.clone(),
        }
    }

    /// answer a user asking whether the device link is up
    fn connect_outcome(&self) -> ServerMessage {
        if self.device.is_some() {
            return ServerMessage::Notice { ok: true, message: "Device linked.".to_string() };
        }
        let message = match &self.last_open_error {
            Some(reason) => format!(
                "Could not connect. Make sure the Arduino is plugged in and no other apps are using it. ({})",
                reason
            ),
            None => "Could not connect. Waiting for the device to appear.".to_string(),
        };
        ServerMessage::Notice { ok: false, message }
    }

    fn capture_outcome(&mut self, outcome: Result<String, CaptureError>) -> ServerMessage {
        match outcome {
            Ok(message) => {
                info!("{}", message.lines().next().unwrap_or_default());
                self.forward_settings();
                ServerMessage::Notice { ok: true, message }
            }
            Err(e) => ServerMessage::Notice { ok: false, message: e.to_string() },
        }
    }

    /// write the settings line if the device is open, and show it to every client
    fn forward_settings(&self) {
        let line = protocol::encode_settings(&self.settings);
        match &self.device {
            Some(device) => {
                if device.send(line).is_err() {
                    warn!("device writer is gone; settings update dropped");
                }
            }
            None => debug!("device not open; settings kept locally"),
        }
        self.publish(ServerMessage::Settings(self.settings.clone()));
    }

    fn publish_status(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => info!("sensor connected"),
            ConnectionState::Disconnected => warn!("sensor disconnected"),
        }
        self.publish(ServerMessage::Status { state, readout: self.liveness.readout() });
    }

    fn publish(&self, message: ServerMessage) {
        // no subscribers is fine
        let _ = self.updates.send(message);
    }
}

/// cloneable handle used by the link task and the web server
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<Event>,
    updates: broadcast::Sender<ServerMessage>,
}

impl SessionHandle {
    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.updates.subscribe()
    }

    pub async fn send(&self, message: ClientMessage) -> Result<Option<ServerMessage>> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Client { message, reply })
            .await
            .map_err(|_| anyhow!("session stopped"))?;
        rx.await.map_err(|_| anyhow!("session stopped"))
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(Event::Snapshot(reply))
            .await
            .map_err(|_| anyhow!("session stopped"))?;
        rx.await.map_err(|_| anyhow!("session stopped"))
    }
}

/// create the session and start its event loop
pub fn spawn(config: &HostConfig) -> SessionHandle {
    let (events, rx) = mpsc::channel(EVENT_QUEUE);
    let (updates, _) = broadcast::channel(UPDATE_QUEUE);
    let session = Session::new(config, updates.clone());

    tokio::spawn(run(
        session,
        rx,
        config.stream.flush_interval(),
        config.liveness.check_interval(),
    ));

    SessionHandle { events, updates }
}

/// a handle whose session has already stopped
#[cfg(test)]
pub(crate) fn stopped_handle() -> SessionHandle {
    let (events, _) = mpsc::channel(1);
    let (updates, _) = broadcast::channel(1);
    SessionHandle { events, updates }
}

async fn run(mut session: Session, mut events: mpsc::Receiver<Event>, flush_every: Duration, check_every: Duration) {
    let mut flush = tokio::time::interval(flush_every);
    flush.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut check = tokio::time::interval(check_every);
    check.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => session.handle_event(event, Instant::now()),
                None => break,
            },
            _ = flush.tick() => {
                session.on_flush(Instant::now());
            }
            _ = check.tick() => session.on_liveness_check(Instant::now()),
        }
    }

    debug!("session event loop stopped");
}
