use crate::domain::pages::{DeviceInfo, DeviceUuid};
use crate::domain::session::SessionSnapshot;
use crate::domain::statistics::LiveUpdate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Opaque peripheral identifier handed out by the transport.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Obu,
    Core,
    Unknown,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Obu => "OBU",
            Self::Core => "CORE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Per-device link progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Scanned,
    Connecting,
    Connected,
    ServicesDiscovered,
    NotificationsEnabled,
    Disconnected,
}

/// A single advertisement seen during a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advertisement {
    pub id: DeviceId,
    pub name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub rssi: i16,
}

/// Everything known about one peripheral.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: Option<String>,
    pub sensor_kind: SensorKind,
    pub rssi: i16,
    pub link: LinkState,
    /// service -> characteristics
    pub services: BTreeMap<Uuid, Vec<Uuid>>,
    pub notifying: BTreeSet<Uuid>,
    pub auto_reconnect: bool,
    pub disconnect_requested: bool,
    pub device_uuid: Option<DeviceUuid>,
    pub device_info: Option<DeviceInfo>,
}

impl DeviceRecord {
    pub fn scanned(advertisement: &Advertisement, sensor_kind: SensorKind) -> Self {
        Self {
            id: advertisement.id.clone(),
            name: advertisement.name.clone(),
            sensor_kind,
            rssi: advertisement.rssi,
            link: LinkState::Scanned,
            services: BTreeMap::new(),
            notifying: BTreeSet::new(),
            auto_reconnect: false,
            disconnect_requested: false,
            device_uuid: None,
            device_info: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.link,
            LinkState::Connected | LinkState::ServicesDiscovered | LinkState::NotificationsEnabled
        )
    }

    pub fn has_characteristic(&self, characteristic: Uuid) -> bool {
        self.services
            .values()
            .any(|chars| chars.contains(&characteristic))
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Events broadcast to the observer (UI, CLI) from the service loop.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum AppEvent {
    DevicesChanged(Vec<DeviceRecord>),
    ScanStateChanged(bool),
    NotificationsReady(DeviceId),
    SessionChanged(SessionSnapshot),
    /// Whole seconds on the session stopwatch.
    Elapsed(u64),
    LiveUpdate(Box<LiveUpdate>),
    /// Trace, statistics and chart buffers were cleared in one step.
    LiveReset,
    DeviceUuid(DeviceId, DeviceUuid),
    DeviceInfo(DeviceId, DeviceInfo),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
