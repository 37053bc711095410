//! Connection State Machine
//!
//! Drives each peripheral through
//!
//! ```text
//! Scanned -> Connecting -> Connected -> ServicesDiscovered -> NotificationsEnabled
//!     ^                                                              |
//!     +----------------------- Disconnected <------------------------+
//! ```
//!
//! Requests go out through the transport worker; the matching
//! [`TransportEvent`] moves the record forward. Nothing here blocks.

use crate::domain::models::{
    AppEvent, DeviceId, LinkState, MessageSeverity, SensorKind, StatusMessage,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::scanner::ScanWindow;
use crate::infrastructure::bluetooth::transport::{
    TransportError, TransportEvent, TransportHandle,
};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// How long a scan runs before it is stopped automatically
    pub scan_timeout: Duration,
    /// Subscribe as soon as characteristics are discovered
    pub auto_enable_notifications: bool,
    /// Ask the transport to acknowledge command writes
    pub write_with_response: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            scan_timeout: settings.scan_timeout(),
            auto_enable_notifications: settings.auto_enable_notifications,
            write_with_response: settings.write_with_response,
        }
    }
}

/// Link changes the service loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected(DeviceId),
    NotificationsReady(DeviceId),
    Disconnected {
        id: DeviceId,
        kind: SensorKind,
        /// The disconnect was asked for by the application.
        requested: bool,
        /// A reconnect request was issued.
        reconnecting: bool,
    },
    Notification {
        id: DeviceId,
        kind: SensorKind,
        characteristic: Uuid,
        bytes: Vec<u8>,
    },
}

pub struct ConnectionStateMachine {
    registry: DeviceRegistry,
    transport: TransportHandle,
    scan: ScanWindow,
    config: ConnectionConfig,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl ConnectionStateMachine {
    pub fn new(
        transport: TransportHandle,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            registry: DeviceRegistry::new(event_sender.clone()),
            transport,
            scan: ScanWindow::new(),
            config,
            event_sender,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    pub fn scan_deadline(&self) -> Option<Instant> {
        self.scan.deadline()
    }

    /// Reset the device list (connected devices stay) and start a bounded scan.
    pub fn start_scan(&mut self, now: Instant) -> Result<(), TransportError> {
        self.registry.clear_scanned();
        self.transport.scan(&protocol::SCAN_SERVICE_FILTERS)?;
        self.scan.open(now, self.config.scan_timeout);

        info!(
            "Scanning for sensors ({} ms window)",
            self.config.scan_timeout.as_millis()
        );
        self.send_log("Scanning for sensors...", MessageSeverity::Info);
        let _ = self.event_sender.send(AppEvent::ScanStateChanged(true));
        Ok(())
    }

    pub fn stop_scan(&mut self) -> Result<(), TransportError> {
        if !self.scan.close() {
            return Ok(());
        }

        info!("Stopping scan");
        let _ = self.event_sender.send(AppEvent::ScanStateChanged(false));
        self.transport.stop_scan()
    }

    /// Stop the scan once its window has elapsed.
    pub fn poll_scan_timeout(&mut self, now: Instant) -> Result<(), TransportError> {
        if self.scan.is_expired(now) {
            debug!("Scan window elapsed");
            self.stop_scan()?;
        }
        Ok(())
    }

    /// Connect to a device of the current scan. Returns `false` when the
    /// device is not available for connection.
    pub fn connect(&mut self, id: &DeviceId) -> Result<bool, TransportError> {
        self.request_connect(id, LinkState::Scanned)
    }

    fn reconnect(&mut self, id: &DeviceId) -> Result<bool, TransportError> {
        self.request_connect(id, LinkState::Disconnected)
    }

    fn request_connect(
        &mut self,
        id: &DeviceId,
        from: LinkState,
    ) -> Result<bool, TransportError> {
        let Some(record) = self.registry.get(id) else {
            debug!("Ignoring connect to unknown device {}", id);
            return Ok(false);
        };
        if record.link != from {
            debug!("Ignoring connect to {} in state {:?}", id, record.link);
            return Ok(false);
        }

        let name = record.display_name().to_string();

        self.stop_scan()?;

        info!("Connecting to {} ({})", name, id);
        self.send_log(&format!("Connecting to {}...", name), MessageSeverity::Info);
        self.registry.set_disconnect_requested(id, false);
        self.registry.set_link(id, LinkState::Connecting);
        self.transport.connect(id)?;
        Ok(true)
    }

    /// Request a disconnect. Local state is reset when the transport reports
    /// the disconnect.
    pub fn disconnect(&mut self, id: &DeviceId) -> Result<bool, TransportError> {
        let Some(record) = self.registry.get(id) else {
            debug!("Ignoring disconnect from unknown device {}", id);
            return Ok(false);
        };
        if !record.is_connected() && record.link != LinkState::Connecting {
            debug!("Ignoring disconnect from {} in state {:?}", id, record.link);
            return Ok(false);
        }

        info!("Disconnecting from {}", id);
        self.registry.set_disconnect_requested(id, true);
        self.transport.disconnect(id)?;
        Ok(true)
    }

    pub fn set_auto_reconnect(&mut self, id: &DeviceId, enabled: bool) -> bool {
        self.registry.set_auto_reconnect(id, enabled)
    }

    pub fn enable_notifications(&mut self, id: &DeviceId) -> Result<bool, TransportError> {
        self.set_notifications(id, true)
    }

    pub fn disable_notifications(&mut self, id: &DeviceId) -> Result<bool, TransportError> {
        self.set_notifications(id, false)
    }

    fn set_notifications(&mut self, id: &DeviceId, enabled: bool) -> Result<bool, TransportError> {
        let Some(record) = self.registry.connected_device(id) else {
            debug!("Ignoring notification change for {}: not connected", id);
            return Ok(false);
        };

        let targets: Vec<Uuid> = notification_targets(record.sensor_kind)
            .filter(|c| record.has_characteristic(*c))
            .collect();
        for characteristic in targets {
            self.transport.set_notify(id, characteristic, enabled)?;
        }
        Ok(true)
    }

    /// Write a frame to a characteristic of a connected device. Returns
    /// `false` when the write was dropped.
    pub fn write(
        &mut self,
        id: &DeviceId,
        characteristic: Uuid,
        bytes: Vec<u8>,
    ) -> Result<bool, TransportError> {
        let Some(record) = self.registry.connected_device(id) else {
            debug!("Dropping write to {}: not connected", id);
            return Ok(false);
        };
        if !record.has_characteristic(characteristic) {
            debug!("Dropping write to {}: no characteristic {}", id, characteristic);
            return Ok(false);
        }
        if protocol::requires_notifications_for_write(record.sensor_kind, characteristic)
            && !all_notifying(record.sensor_kind, &record.notifying)
        {
            warn!(
                "Dropping write to {} on {}: notifications are not active",
                characteristic, id
            );
            return Ok(false);
        }

        self.transport
            .write(id, characteristic, bytes, self.config.write_with_response)?;
        Ok(true)
    }

    /// Apply a transport event.
    pub fn handle(&mut self, event: TransportEvent) -> Option<LinkEvent> {
        match event {
            TransportEvent::Discovered(advertisement) => {
                if !self.scan.is_scanning() {
                    debug!("Ignoring advertisement from {} outside a scan", advertisement.id);
                    return None;
                }
                self.registry.insert_discovered(&advertisement);
                None
            }
            TransportEvent::Connected(id) => self.on_connected(id),
            TransportEvent::ConnectFailed { id, reason } => {
                warn!("Connection to {} failed: {}", id, reason);
                self.send_log(
                    &format!("Connection failed: {}", reason),
                    MessageSeverity::Error,
                );
                self.registry.set_link(&id, LinkState::Disconnected);
                None
            }
            TransportEvent::Disconnected { id, reason } => self.on_disconnected(id, reason),
            TransportEvent::ServicesDiscovered { id, services } => {
                if !self.registry.set_services(&id, &services) {
                    return None;
                }
                debug!("{} services discovered on {}", services.len(), id);
                for service in services {
                    if let Err(e) = self.transport.discover_characteristics(&id, service) {
                        warn!("Characteristic discovery for {} failed: {}", service, e);
                    }
                }
                None
            }
            TransportEvent::CharacteristicsDiscovered {
                id,
                service,
                characteristics,
            } => {
                self.on_characteristics(&id, service, &characteristics);
                None
            }
            TransportEvent::NotificationStateChanged {
                id,
                characteristic,
                enabled,
            } => self.on_notification_state(id, characteristic, enabled),
            TransportEvent::NotificationValue {
                id,
                characteristic,
                bytes,
            } => {
                let Some(record) = self.registry.connected_device(&id) else {
                    debug!("Dropping notification from {}: not connected", id);
                    return None;
                };
                Some(LinkEvent::Notification {
                    kind: record.sensor_kind,
                    id,
                    characteristic,
                    bytes,
                })
            }
            TransportEvent::OperationFailed { id, error } => {
                warn!("Transport operation failed: {}", error);
                self.send_log(&error.to_string(), MessageSeverity::Warning);
                if let Some(id) = id {
                    let connecting = self
                        .registry
                        .get(&id)
                        .is_some_and(|d| d.link == LinkState::Connecting);
                    if connecting {
                        self.registry.set_link(&id, LinkState::Disconnected);
                    }
                }
                None
            }
        }
    }

    fn on_connected(&mut self, id: DeviceId) -> Option<LinkEvent> {
        if !self.registry.contains(&id) {
            error!("Connected to {} which was never scanned; disconnecting", id);
            if let Err(e) = self.transport.disconnect(&id) {
                warn!("Disconnect of {} failed: {}", id, e);
            }
            return None;
        }

        self.registry.set_link(&id, LinkState::Connected);
        info!("Connected to {}", id);
        self.send_log("Connected", MessageSeverity::Success);

        if let Err(e) = self.transport.discover_services(&id) {
            warn!("Service discovery for {} failed: {}", id, e);
        }
        Some(LinkEvent::Connected(id))
    }

    fn on_disconnected(&mut self, id: DeviceId, reason: Option<String>) -> Option<LinkEvent> {
        let record = self.registry.get(&id)?;
        let kind = record.sensor_kind;
        let requested = record.disconnect_requested;
        let auto_reconnect = record.auto_reconnect;

        match &reason {
            Some(reason) => info!("Disconnected from {}: {}", id, reason),
            None => info!("Disconnected from {}", id),
        }
        self.send_log("Disconnected from device", MessageSeverity::Info);

        self.registry.set_link(&id, LinkState::Disconnected);
        self.registry.set_disconnect_requested(&id, false);

        let mut reconnecting = false;
        if !requested && auto_reconnect {
            info!("Reconnecting to {}", id);
            match self.reconnect(&id) {
                Ok(issued) => reconnecting = issued,
                Err(e) => warn!("Reconnect to {} failed: {}", id, e),
            }
        }

        Some(LinkEvent::Disconnected {
            id,
            kind,
            requested,
            reconnecting,
        })
    }

    fn on_characteristics(&mut self, id: &DeviceId, service: Uuid, characteristics: &[Uuid]) {
        if !self.registry.set_characteristics(id, service, characteristics) {
            return;
        }
        if !self.config.auto_enable_notifications {
            return;
        }
        let Some(record) = self.registry.get(id) else {
            return;
        };

        let targets: Vec<Uuid> = notification_targets(record.sensor_kind)
            .filter(|c| characteristics.contains(c) && !record.notifying.contains(c))
            .collect();
        for characteristic in targets {
            if let Err(e) = self.transport.set_notify(id, characteristic, true) {
                warn!("Enabling notifications on {} failed: {}", characteristic, e);
            }
        }
    }

    fn on_notification_state(
        &mut self,
        id: DeviceId,
        characteristic: Uuid,
        enabled: bool,
    ) -> Option<LinkEvent> {
        if !self.registry.set_notifying(&id, characteristic, enabled) {
            return None;
        }
        let record = self.registry.get(&id)?;
        let ready = all_notifying(record.sensor_kind, &record.notifying);

        match (record.link, ready) {
            (LinkState::Connected | LinkState::ServicesDiscovered, true) => {
                self.registry.set_link(&id, LinkState::NotificationsEnabled);
                info!("Notifications enabled on {}", id);
                self.send_log("Notifications enabled", MessageSeverity::Success);
                let _ = self
                    .event_sender
                    .send(AppEvent::NotificationsReady(id.clone()));
                Some(LinkEvent::NotificationsReady(id))
            }
            (LinkState::NotificationsEnabled, false) => {
                self.registry.set_link(&id, LinkState::ServicesDiscovered);
                info!("Notifications disabled on {}", id);
                None
            }
            _ => None,
        }
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

/// Required and optional subscriptions for a sensor kind.
fn notification_targets(kind: SensorKind) -> impl Iterator<Item = Uuid> {
    protocol::notify_characteristics(kind)
        .iter()
        .chain(protocol::optional_notify_characteristics(kind))
        .copied()
}

fn all_notifying(kind: SensorKind, notifying: &BTreeSet<Uuid>) -> bool {
    let required = protocol::notify_characteristics(kind);
    !required.is_empty() && required.iter().all(|c| notifying.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Advertisement;
    use crate::infrastructure::bluetooth::protocol::{core_sensor, obu};
    use crate::infrastructure::bluetooth::transport::TransportRequest;

    struct Harness {
        machine: ConnectionStateMachine,
        requests: mpsc::UnboundedReceiver<TransportRequest>,
        events: mpsc::UnboundedReceiver<AppEvent>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_config(ConnectionConfig::default())
        }

        fn with_config(config: ConnectionConfig) -> Self {
            let (req_tx, requests) = mpsc::unbounded_channel();
            let (event_tx, events) = mpsc::unbounded_channel();
            Self {
                machine: ConnectionStateMachine::new(TransportHandle::new(req_tx), event_tx, config),
                requests,
                events,
            }
        }

        fn requests(&mut self) -> Vec<TransportRequest> {
            let mut out = Vec::new();
            while let Ok(request) = self.requests.try_recv() {
                out.push(request);
            }
            out
        }

        fn discover(&mut self, id: &str, name: &str) -> DeviceId {
            let id = DeviceId::from(id);
            self.machine.handle(TransportEvent::Discovered(Advertisement {
                id: id.clone(),
                name: Some(name.to_string()),
                service_uuids: vec![],
                rssi: -55,
            }));
            id
        }

        /// Scan, connect and subscribe an OBU.
        fn ready_obu(&mut self, id: &str) -> DeviceId {
            self.machine.start_scan(Instant::now()).unwrap();
            let id = self.discover(id, "OBU-7");
            self.machine.connect(&id).unwrap();
            self.machine.handle(TransportEvent::Connected(id.clone()));
            self.machine.handle(TransportEvent::ServicesDiscovered {
                id: id.clone(),
                services: vec![obu::NUS_SERVICE],
            });
            self.machine.handle(TransportEvent::CharacteristicsDiscovered {
                id: id.clone(),
                service: obu::NUS_SERVICE,
                characteristics: vec![obu::NUS_RX, obu::NUS_TX],
            });
            self.machine.handle(TransportEvent::NotificationStateChanged {
                id: id.clone(),
                characteristic: obu::NUS_TX,
                enabled: true,
            });
            self.requests();
            id
        }
    }

    #[test]
    fn test_full_connection_flow() {
        let mut h = Harness::new();
        let t0 = Instant::now();
        h.machine.start_scan(t0).unwrap();
        assert!(h.machine.is_scanning());

        let id = h.discover("obu-1", "OBU-0001");
        assert!(h.machine.connect(&id).unwrap());
        assert!(!h.machine.is_scanning());
        assert_eq!(
            h.requests(),
            vec![
                TransportRequest::Scan {
                    service_filters: protocol::SCAN_SERVICE_FILTERS.to_vec()
                },
                TransportRequest::StopScan,
                TransportRequest::Connect(id.clone()),
            ]
        );

        assert_eq!(
            h.machine.handle(TransportEvent::Connected(id.clone())),
            Some(LinkEvent::Connected(id.clone()))
        );
        assert_eq!(h.requests(), vec![TransportRequest::DiscoverServices(id.clone())]);

        h.machine.handle(TransportEvent::ServicesDiscovered {
            id: id.clone(),
            services: vec![obu::NUS_SERVICE, obu::HRM_SERVICE],
        });
        assert_eq!(
            h.requests(),
            vec![
                TransportRequest::DiscoverCharacteristics {
                    id: id.clone(),
                    service: obu::NUS_SERVICE
                },
                TransportRequest::DiscoverCharacteristics {
                    id: id.clone(),
                    service: obu::HRM_SERVICE
                },
            ]
        );

        h.machine.handle(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service: obu::NUS_SERVICE,
            characteristics: vec![obu::NUS_RX, obu::NUS_TX],
        });
        h.machine.handle(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service: obu::HRM_SERVICE,
            characteristics: vec![obu::HRM_MEASUREMENT],
        });
        assert_eq!(
            h.requests(),
            vec![
                TransportRequest::SetNotify {
                    id: id.clone(),
                    characteristic: obu::NUS_TX,
                    enabled: true
                },
                TransportRequest::SetNotify {
                    id: id.clone(),
                    characteristic: obu::HRM_MEASUREMENT,
                    enabled: true
                },
            ]
        );

        let outcome = h.machine.handle(TransportEvent::NotificationStateChanged {
            id: id.clone(),
            characteristic: obu::NUS_TX,
            enabled: true,
        });
        assert_eq!(outcome, Some(LinkEvent::NotificationsReady(id.clone())));
        assert_eq!(
            h.machine.registry().get(&id).unwrap().link,
            LinkState::NotificationsEnabled
        );
    }

    #[test]
    fn test_connected_without_scan_forces_disconnect() {
        let mut h = Harness::new();
        let stranger = DeviceId::from("ghost");

        assert_eq!(h.machine.handle(TransportEvent::Connected(stranger.clone())), None);
        assert_eq!(h.requests(), vec![TransportRequest::Disconnect(stranger)]);
        assert!(h.machine.registry().is_empty());
    }

    #[test]
    fn test_connect_requires_scanned_device() {
        let mut h = Harness::new();
        assert!(!h.machine.connect(&DeviceId::from("nobody")).unwrap());
        assert!(h.requests().is_empty());

        let id = h.ready_obu("obu-1");
        // Already connected.
        assert!(!h.machine.connect(&id).unwrap());

        h.machine.disconnect(&id).unwrap();
        h.machine.handle(TransportEvent::Disconnected {
            id: id.clone(),
            reason: None,
        });
        h.requests();
        // A dropped device has to be found by a new scan first.
        assert!(!h.machine.connect(&id).unwrap());
        assert!(h.requests().is_empty());
        assert_eq!(h.machine.registry().get(&id).unwrap().link, LinkState::Disconnected);
    }

    #[test]
    fn test_start_scan_keeps_connected_devices() {
        let mut h = Harness::new();
        let connected = h.ready_obu("obu-1");
        h.machine.start_scan(Instant::now()).unwrap();
        h.discover("obu-2", "OBU-0002");
        h.machine.stop_scan().unwrap();

        h.machine.start_scan(Instant::now()).unwrap();
        let registry = h.machine.registry();
        assert_eq!(registry.len(), 1);
        assert!(registry.connected_device(&connected).is_some());
    }

    #[test]
    fn test_scan_times_out() {
        let mut h = Harness::new();
        let t0 = Instant::now();
        h.machine.start_scan(t0).unwrap();
        h.requests();

        h.machine.poll_scan_timeout(t0 + Duration::from_secs(1)).unwrap();
        assert!(h.machine.is_scanning());

        h.machine.poll_scan_timeout(t0 + Duration::from_secs(5)).unwrap();
        assert!(!h.machine.is_scanning());
        assert_eq!(h.requests(), vec![TransportRequest::StopScan]);

        // Advertisements after the window closed are ignored.
        h.discover("late", "OBU-9");
        assert!(h.machine.registry().is_empty());
    }

    #[test]
    fn test_requested_disconnect() {
        let mut h = Harness::new();
        let id = h.ready_obu("obu-1");
        h.machine.set_auto_reconnect(&id, true);

        assert!(h.machine.disconnect(&id).unwrap());
        assert_eq!(h.requests(), vec![TransportRequest::Disconnect(id.clone())]);
        // Still connected until the transport confirms.
        assert!(h.machine.registry().connected_device(&id).is_some());

        let outcome = h.machine.handle(TransportEvent::Disconnected {
            id: id.clone(),
            reason: None,
        });
        assert_eq!(
            outcome,
            Some(LinkEvent::Disconnected {
                id: id.clone(),
                kind: SensorKind::Obu,
                requested: true,
                reconnecting: false,
            })
        );
        assert!(h.requests().is_empty());
        let record = h.machine.registry().get(&id).unwrap();
        assert_eq!(record.link, LinkState::Disconnected);
        assert!(record.notifying.is_empty());
    }

    #[test]
    fn test_unexpected_disconnect_reconnects_when_enabled() {
        let mut h = Harness::new();
        let id = h.ready_obu("obu-1");
        h.machine.set_auto_reconnect(&id, true);

        let outcome = h.machine.handle(TransportEvent::Disconnected {
            id: id.clone(),
            reason: Some("link lost".into()),
        });
        assert!(matches!(
            outcome,
            Some(LinkEvent::Disconnected {
                requested: false,
                reconnecting: true,
                ..
            })
        ));
        assert_eq!(h.requests(), vec![TransportRequest::Connect(id.clone())]);
        assert_eq!(h.machine.registry().get(&id).unwrap().link, LinkState::Connecting);
    }

    #[test]
    fn test_write_gating() {
        let mut h = Harness::new();
        let id = h.ready_obu("obu-1");

        assert!(h.machine.write(&id, obu::NUS_RX, vec![1, 0, 0, 0x7C]).unwrap());
        assert_eq!(
            h.requests(),
            vec![TransportRequest::Write {
                id: id.clone(),
                characteristic: obu::NUS_RX,
                bytes: vec![1, 0, 0, 0x7C],
                ack_required: true,
            }]
        );

        assert!(!h.machine.write(&DeviceId::from("other"), obu::NUS_RX, vec![1]).unwrap());
        assert!(!h.machine.write(&id, core_sensor::CONTROL_POINT, vec![1]).unwrap());
        assert!(h.requests().is_empty());
    }

    #[test]
    fn test_core_control_point_needs_both_subscriptions() {
        let mut h = Harness::new();
        h.machine.start_scan(Instant::now()).unwrap();
        let id = h.discover("core-1", "CORE 0042");
        h.machine.connect(&id).unwrap();
        h.machine.handle(TransportEvent::Connected(id.clone()));
        h.machine.handle(TransportEvent::ServicesDiscovered {
            id: id.clone(),
            services: vec![core_sensor::TEMPERATURE_SERVICE],
        });
        h.machine.handle(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service: core_sensor::TEMPERATURE_SERVICE,
            characteristics: vec![core_sensor::TEMPERATURE, core_sensor::CONTROL_POINT],
        });
        h.requests();

        // Control point subscribed, temperature not yet.
        assert_eq!(
            h.machine.handle(TransportEvent::NotificationStateChanged {
                id: id.clone(),
                characteristic: core_sensor::CONTROL_POINT,
                enabled: true,
            }),
            None
        );
        assert!(!h.machine.write(&id, core_sensor::CONTROL_POINT, vec![0x01]).unwrap());

        assert_eq!(
            h.machine.handle(TransportEvent::NotificationStateChanged {
                id: id.clone(),
                characteristic: core_sensor::TEMPERATURE,
                enabled: true,
            }),
            Some(LinkEvent::NotificationsReady(id.clone()))
        );
        assert!(h.machine.write(&id, core_sensor::CONTROL_POINT, vec![0x01]).unwrap());
    }

    #[test]
    fn test_disable_notifications_leaves_ready_state() {
        let mut h = Harness::new();
        let id = h.ready_obu("obu-1");

        assert!(h.machine.disable_notifications(&id).unwrap());
        assert_eq!(
            h.requests(),
            vec![TransportRequest::SetNotify {
                id: id.clone(),
                characteristic: obu::NUS_TX,
                enabled: false,
            }]
        );

        h.machine.handle(TransportEvent::NotificationStateChanged {
            id: id.clone(),
            characteristic: obu::NUS_TX,
            enabled: false,
        });
        assert_eq!(
            h.machine.registry().get(&id).unwrap().link,
            LinkState::ServicesDiscovered
        );
    }

    #[test]
    fn test_manual_notifications_when_auto_disabled() {
        let mut h = Harness::with_config(ConnectionConfig {
            auto_enable_notifications: false,
            ..ConnectionConfig::default()
        });
        h.machine.start_scan(Instant::now()).unwrap();
        let id = h.discover("obu-1", "OBU-1");
        h.machine.connect(&id).unwrap();
        h.machine.handle(TransportEvent::Connected(id.clone()));
        h.machine.handle(TransportEvent::ServicesDiscovered {
            id: id.clone(),
            services: vec![obu::NUS_SERVICE],
        });
        h.requests();
        h.machine.handle(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service: obu::NUS_SERVICE,
            characteristics: vec![obu::NUS_RX, obu::NUS_TX],
        });
        assert!(h.requests().is_empty());

        assert!(h.machine.enable_notifications(&id).unwrap());
        assert_eq!(h.requests().len(), 1);
    }

    #[test]
    fn test_notifications_from_disconnected_device_are_dropped() {
        let mut h = Harness::new();
        let id = h.ready_obu("obu-1");
        h.machine.handle(TransportEvent::Disconnected {
            id: id.clone(),
            reason: None,
        });
        while h.events.try_recv().is_ok() {}

        let outcome = h.machine.handle(TransportEvent::NotificationValue {
            id,
            characteristic: obu::NUS_TX,
            bytes: vec![0, 0, 0, 1],
        });
        assert_eq!(outcome, None);
    }
}
