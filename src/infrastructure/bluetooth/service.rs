//! Bluetooth Service Module
//!
//! Main service that owns the device registry, the session, the trace
//! aggregator and the live statistics. It is the only writer of that state:
//! user commands and transport events are consumed one at a time by
//! [`BluetoothService::run`], and observers only see [`AppEvent`]s.

use crate::domain::models::{
    AppEvent, DeviceId, DeviceRecord, MessageSeverity, SensorKind, StatusMessage,
};
use crate::domain::pages::{ActivityProfile, Command, OperatingMode, Page};
use crate::domain::session::{SessionAction, SessionController, SessionSnapshot};
use crate::domain::settings::SettingsService;
use crate::domain::statistics::{ChartBuffers, LiveMetrics, SessionStatistics};
use crate::domain::trace::{Trace, TraceAggregator, Trackpoint};
use crate::infrastructure::bluetooth::{
    codec,
    connection::{ConnectionConfig, ConnectionStateMachine, LinkEvent},
    protocol::{self, core_sensor, obu},
    transport::{spawn_transport_worker, Transport, TransportEvent, TransportHandle},
};
use crate::infrastructure::publisher::{LiveMonitoringPayload, PublishRecord, TrackpointSink};
use anyhow::Result;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Commands addressed to a connected unit outside the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRequest {
    SetProfile(ActivityProfile),
    SetMode(OperatingMode),
    /// Program the unit with the current local time.
    SyncTime,
    RequestUuid,
    RequestInfo,
}

#[derive(Debug)]
pub enum ServiceCommand {
    StartScan,
    StopScan,
    Connect(DeviceId),
    Disconnect(DeviceId),
    EnableNotifications(DeviceId),
    DisableNotifications(DeviceId),
    SetAutoReconnect(DeviceId, bool),
    Session(DeviceId, SessionAction),
    Device(DeviceId, DeviceRequest),
    ClearRegistry,
    Snapshot(oneshot::Sender<LiveSnapshot>),
    Shutdown,
}

/// Full live state at one instant.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    pub devices: Vec<DeviceRecord>,
    pub session: SessionSnapshot,
    pub trace: Trace,
    pub statistics: SessionStatistics,
    pub buffers: ChartBuffers,
}

/// Cloneable front end for a running [`BluetoothService`].
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    commands: mpsc::UnboundedSender<ServiceCommand>,
}

impl ServiceHandle {
    pub fn send(&self, command: ServiceCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("Bluetooth service has stopped"))
    }

    pub fn start_scan(&self) -> Result<()> {
        self.send(ServiceCommand::StartScan)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.send(ServiceCommand::StopScan)
    }

    pub fn connect(&self, id: &DeviceId) -> Result<()> {
        self.send(ServiceCommand::Connect(id.clone()))
    }

    pub fn disconnect(&self, id: &DeviceId) -> Result<()> {
        self.send(ServiceCommand::Disconnect(id.clone()))
    }

    pub fn session(&self, id: &DeviceId, action: SessionAction) -> Result<()> {
        self.send(ServiceCommand::Session(id.clone(), action))
    }

    pub fn device(&self, id: &DeviceId, request: DeviceRequest) -> Result<()> {
        self.send(ServiceCommand::Device(id.clone(), request))
    }

    pub async fn snapshot(&self) -> Result<LiveSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(ServiceCommand::Snapshot(tx))?;
        Ok(rx.await?)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(ServiceCommand::Shutdown);
    }
}

/// Main service coordinating all BLE operations
pub struct BluetoothService {
    connection: ConnectionStateMachine,
    session: SessionController,
    aggregator: TraceAggregator,
    live: LiveMetrics,
    sink: Box<dyn TrackpointSink>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    settings: Arc<Mutex<SettingsService>>,
    tick_period: Duration,
}

impl BluetoothService {
    /// Create a new Bluetooth service
    pub fn new(
        transport: TransportHandle,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        settings: Arc<Mutex<SettingsService>>,
        sink: Box<dyn TrackpointSink>,
    ) -> Result<Self> {
        let (config, tick_period) = {
            let settings = settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            let s = settings.get();
            (ConnectionConfig::from(s), s.stopwatch_tick())
        };

        Ok(Self {
            connection: ConnectionStateMachine::new(transport, event_sender.clone(), config),
            session: SessionController::new(),
            aggregator: TraceAggregator::new(),
            live: LiveMetrics::default(),
            sink,
            event_sender,
            settings,
            tick_period,
        })
    }

    /// Start the transport worker and the service loop.
    ///
    /// `transport_events` must be the sending side the transport was built
    /// with; the worker reports failed requests on it.
    pub fn spawn<T: Transport>(
        transport: T,
        transport_events: mpsc::UnboundedSender<TransportEvent>,
        transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        settings: Arc<Mutex<SettingsService>>,
        sink: Box<dyn TrackpointSink>,
    ) -> Result<(ServiceHandle, mpsc::UnboundedReceiver<AppEvent>, JoinHandle<()>)> {
        let (handle, _worker) = spawn_transport_worker(transport, transport_events)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let service = Self::new(handle, event_tx, settings, sink)?;
        let task = tokio::spawn(service.run(command_rx, transport_rx));

        Ok((
            ServiceHandle {
                commands: command_tx,
            },
            event_rx,
            task,
        ))
    }

    /// Consume commands and transport events until shutdown.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ServiceCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut tick = tokio::time::interval(self.tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let scan_deadline = self.connection.scan_deadline();

            // Pending transport events are drained before the next command, so a
            // snapshot requested after a notification was delivered includes it.
            tokio::select! {
                biased;

                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                command = commands.recv() => match command {
                    Some(ServiceCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                _ = tokio::time::sleep_until(scan_deadline.unwrap_or_else(Instant::now)),
                    if scan_deadline.is_some() =>
                {
                    if let Err(e) = self.connection.poll_scan_timeout(Instant::now()) {
                        warn!("Failed to stop scan: {}", e);
                    }
                }
                _ = tick.tick(), if self.session.is_ticking() => {
                    let elapsed = self.session.elapsed_seconds(Instant::now());
                    let _ = self.event_sender.send(AppEvent::Elapsed(elapsed));
                }
            }
        }

        info!("Bluetooth service stopped");
        self.connection.transport().shutdown();
    }

    fn handle_command(&mut self, command: ServiceCommand) {
        let result = match command {
            ServiceCommand::StartScan => self.connection.start_scan(Instant::now()),
            ServiceCommand::StopScan => self.connection.stop_scan(),
            ServiceCommand::Connect(id) => self.connection.connect(&id).map(|_| ()),
            ServiceCommand::Disconnect(id) => self.connection.disconnect(&id).map(|_| ()),
            ServiceCommand::EnableNotifications(id) => {
                self.connection.enable_notifications(&id).map(|_| ())
            }
            ServiceCommand::DisableNotifications(id) => {
                self.connection.disable_notifications(&id).map(|_| ())
            }
            ServiceCommand::SetAutoReconnect(id, enabled) => {
                self.connection.set_auto_reconnect(&id, enabled);
                Ok(())
            }
            ServiceCommand::Session(id, action) => {
                self.apply_session(&id, action);
                Ok(())
            }
            ServiceCommand::Device(id, request) => {
                let command = match request {
                    DeviceRequest::SetProfile(profile) => Command::SetProfile(profile),
                    DeviceRequest::SetMode(mode) => Command::Session(mode.into()),
                    DeviceRequest::SyncTime => Command::set_time_now(),
                    DeviceRequest::RequestUuid => Command::RequestDeviceUuid,
                    DeviceRequest::RequestInfo => Command::RequestDeviceInfo,
                };
                self.send_command(&id, &command);
                Ok(())
            }
            ServiceCommand::ClearRegistry => {
                self.connection.registry_mut().clear();
                Ok(())
            }
            ServiceCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            ServiceCommand::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!("Transport request failed: {}", e);
            self.send_log(&e.to_string(), MessageSeverity::Error);
        }
    }

    fn apply_session(&mut self, id: &DeviceId, action: SessionAction) {
        let Some(record) = self.connection.registry().connected_device(id) else {
            debug!("Dropping {:?} for {}: not connected", action, id);
            return;
        };
        if record.sensor_kind != SensorKind::Obu {
            debug!("Dropping {:?} for {}: not an OBU", action, id);
            return;
        }

        let now = Instant::now();
        let command = match self.session.apply(id, action, now) {
            Ok(command) => command,
            Err(e) => {
                warn!("Session command rejected: {}", e);
                self.send_log(&e.to_string(), MessageSeverity::Warning);
                return;
            }
        };

        match action {
            SessionAction::Start | SessionAction::StartWithoutGnss => {
                self.reset_live();
                self.aggregator.set_trigger(self.session.emit_trigger());
                if let Some(session) = self.session.session() {
                    info!("Session {} started on {}", session.id, id);
                }
            }
            SessionAction::Stop => {
                self.reset_live();
                info!("Session stopped on {}", id);
            }
            SessionAction::Pause | SessionAction::Resume => {
                info!("Session {:?} on {}", action, id);
            }
        }

        self.send_command(id, &command);
        let _ = self
            .event_sender
            .send(AppEvent::SessionChanged(self.session.snapshot(now)));
    }

    fn send_command(&mut self, id: &DeviceId, command: &Command) {
        let Some(record) = self.connection.registry().connected_device(id) else {
            debug!("Dropping {:?} for {}: not connected", command, id);
            return;
        };
        let Some(characteristic) = protocol::command_characteristic(record.sensor_kind) else {
            debug!("Dropping {:?} for {}: no command characteristic", command, id);
            return;
        };

        let bytes = codec::encode(command);
        debug!("Sending {:?} to {}: {}", command, id, hex::encode(&bytes));
        match self.connection.write(id, characteristic, bytes) {
            Ok(true) => {}
            Ok(false) => debug!("Command {:?} for {} was dropped", command, id),
            Err(e) => warn!("Failed to send {:?} to {}: {}", command, id, e),
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let Some(link_event) = self.connection.handle(event) else {
            return;
        };

        match link_event {
            LinkEvent::Connected(id) => self.remember_device(&id),
            LinkEvent::NotificationsReady(id) => debug!("{} is streaming", id),
            LinkEvent::Disconnected {
                id,
                kind,
                requested,
                reconnecting,
            } => {
                debug!(
                    "{} ({}) disconnected, requested: {}, reconnecting: {}",
                    id, kind, requested, reconnecting
                );
                if self.session.belongs_to(&id) {
                    self.session.reset();
                    self.reset_live();
                    let _ = self.event_sender.send(AppEvent::SessionChanged(
                        self.session.snapshot(Instant::now()),
                    ));
                } else if kind == SensorKind::Obu {
                    self.reset_live();
                }
            }
            LinkEvent::Notification {
                id,
                kind,
                characteristic,
                bytes,
            } => self.route_notification(&id, kind, characteristic, &bytes),
        }
    }

    fn route_notification(
        &mut self,
        id: &DeviceId,
        kind: SensorKind,
        characteristic: Uuid,
        bytes: &[u8],
    ) {
        match (kind, characteristic) {
            (SensorKind::Obu, c) if c == obu::NUS_TX => {
                let page = codec::decode(bytes);
                self.handle_page(id, page);
            }
            (SensorKind::Obu, c) if c == obu::NUS_RX => {
                let page = codec::decode_rx(bytes);
                debug!("RX echo from {}: page {}", id, page.page_id());
            }
            (SensorKind::Obu, c) if c == obu::HRM_MEASUREMENT => {
                match codec::decode_heart_rate_measurement(bytes) {
                    Some(measurement) => self.aggregator.ingest_heart_rate(&measurement),
                    None => debug!("Short heart rate frame from {}", id),
                }
            }
            (SensorKind::Core, c)
                if c == core_sensor::TEMPERATURE || c == core_sensor::CONTROL_POINT =>
            {
                debug!("CORE frame from {} on {}: {}", id, c, hex::encode(bytes));
            }
            _ => trace!("Unhandled notification from {} on {}", id, characteristic),
        }
    }

    fn handle_page(&mut self, id: &DeviceId, page: Page) {
        match page {
            Page::DeviceUuid(uuid) => {
                info!(
                    "Device uuid of {}: {:08X}-{:08X}-{:08X}",
                    id, uuid.uuid0, uuid.uuid1, uuid.uuid2
                );
                self.connection
                    .registry_mut()
                    .set_device_uuid(id, uuid.clone());
                let _ = self
                    .event_sender
                    .send(AppEvent::DeviceUuid(id.clone(), uuid));
            }
            Page::DeviceInfo(device_info) => {
                let battery = device_info.battery();
                info!(
                    "Device info of {}: firmware {}, battery {}% ({} mV)",
                    id, device_info.firmware_version, battery.level, battery.voltage
                );
                self.connection
                    .registry_mut()
                    .set_device_info(id, device_info.clone());
                let _ = self
                    .event_sender
                    .send(AppEvent::DeviceInfo(id.clone(), device_info));
            }
            Page::RawLog(raw) => {
                debug!(
                    "Raw frame from {} (page {}): {}",
                    id,
                    raw.page_id,
                    hex::encode(&raw.bytes)
                );
            }
            page => {
                if let Some(trackpoint) = self.aggregator.ingest(&page, Utc::now()) {
                    self.publish(&trackpoint);
                    let update = self.live.ingest(trackpoint);
                    let _ = self
                        .event_sender
                        .send(AppEvent::LiveUpdate(Box::new(update)));
                }
            }
        }
    }

    /// Best-effort publish of a trackpoint of the active session.
    fn publish(&mut self, trackpoint: &Trackpoint) {
        let Some(session) = self.session.session() else {
            return;
        };

        let publisher = match self.settings.lock() {
            Ok(settings) => settings.get().publisher.clone(),
            Err(_) => {
                warn!("Settings lock poisoned; skipping publish");
                return;
            }
        };
        if !publisher.enabled {
            return;
        }

        let record = PublishRecord::new(&publisher.user_id, session.id, trackpoint);
        if let Err(e) = self.sink.publish(&publisher.topic(), &record) {
            warn!("Failed to publish trackpoint: {}", e);
        }
        let payload = LiveMonitoringPayload::from(trackpoint);
        if let Err(e) = self.sink.publish_live(&publisher.live_topic(), &payload) {
            warn!("Failed to publish live payload: {}", e);
        }
    }

    /// Clear trace, statistics and chart buffers in one step.
    fn reset_live(&mut self) {
        self.aggregator.reset();
        self.live.reset();
        let _ = self.event_sender.send(AppEvent::LiveReset);
    }

    /// Store the device in memory now; the file is written on the blocking pool.
    fn remember_device(&self, id: &DeviceId) {
        let pending = match self.settings.lock() {
            Ok(mut settings) => settings
                .set_last_connected_device(id.as_str())
                .then(|| (settings.get().clone(), settings.path().to_path_buf())),
            Err(_) => {
                warn!("Settings lock poisoned; not remembering {}", id);
                return;
            }
        };
        let Some((snapshot, path)) = pending else {
            return;
        };

        tokio::task::spawn_blocking(move || {
            if let Err(e) = SettingsService::write(&snapshot, &path) {
                warn!("Failed to save settings to {}: {}", path.display(), e);
            }
        });
    }

    fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            devices: self.connection.registry().records(),
            session: self.session.snapshot(Instant::now()),
            trace: self.aggregator.trace().clone(),
            statistics: self.live.statistics.clone(),
            buffers: self.live.buffers.clone(),
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}
