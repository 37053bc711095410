//! Sensor Protocol Definitions
//!
//! GATT identifiers for the OBU and CORE sensors, sensor classification from
//! advertisements, and the per-kind notification plan.

use crate::domain::models::{Advertisement, SensorKind};
use uuid::Uuid;

pub mod obu {
    use uuid::Uuid;

    /// Nordic UART Service
    pub const NUS_SERVICE: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);
    /// Commands are written here
    pub const NUS_RX: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);
    /// Telemetry pages are notified here
    pub const NUS_TX: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

    pub const HRM_SERVICE: Uuid = Uuid::from_u128(0x0000180D_0000_1000_8000_00805F9B34FB);
    pub const HRM_MEASUREMENT: Uuid = Uuid::from_u128(0x00002A37_0000_1000_8000_00805F9B34FB);

    pub const NAME_PREFIX: &str = "OBU";
}

pub mod core_sensor {
    use uuid::Uuid;

    pub const TEMPERATURE_SERVICE: Uuid = Uuid::from_u128(0x00002100_5B1E_4347_B07C_97B514DAE121);
    pub const TEMPERATURE: Uuid = Uuid::from_u128(0x00002101_5B1E_4347_B07C_97B514DAE121);
    /// Refuses writes unless notifications are active on it.
    pub const CONTROL_POINT: Uuid = Uuid::from_u128(0x00002102_5B1E_4347_B07C_97B514DAE121);
    /// Health Thermometer service some CORE units advertise instead.
    pub const ALTERNATIVE_TEMPERATURE_SERVICE: Uuid =
        Uuid::from_u128(0x00001809_0000_1000_8000_00805F9B34FB);

    pub const NAME_PREFIX: &str = "CORE";
}

/// Services requested from the transport when scanning.
pub const SCAN_SERVICE_FILTERS: [Uuid; 3] = [
    obu::HRM_SERVICE,
    core_sensor::TEMPERATURE_SERVICE,
    core_sensor::ALTERNATIVE_TEMPERATURE_SERVICE,
];

/// Advertised service -> sensor kind, checked before the name prefixes.
const SERVICE_KIND_TABLE: [(Uuid, SensorKind); 2] = [
    (obu::NUS_SERVICE, SensorKind::Obu),
    (core_sensor::TEMPERATURE_SERVICE, SensorKind::Core),
];

/// Classify an advertisement: service identifiers first, then name prefix.
pub fn classify(advertisement: &Advertisement) -> SensorKind {
    for (service, kind) in SERVICE_KIND_TABLE {
        if advertisement.service_uuids.contains(&service) {
            return kind;
        }
    }

    match advertisement.name.as_deref() {
        Some(name) if name.starts_with(obu::NAME_PREFIX) => SensorKind::Obu,
        Some(name) if name.starts_with(core_sensor::NAME_PREFIX) => SensorKind::Core,
        _ => SensorKind::Unknown,
    }
}

/// Characteristics that must be notifying before the device is considered
/// streaming.
pub fn notify_characteristics(kind: SensorKind) -> &'static [Uuid] {
    match kind {
        SensorKind::Obu => &[obu::NUS_TX],
        SensorKind::Core => &[core_sensor::TEMPERATURE, core_sensor::CONTROL_POINT],
        SensorKind::Unknown => &[],
    }
}

/// Characteristics subscribed when present but not required for readiness.
pub fn optional_notify_characteristics(kind: SensorKind) -> &'static [Uuid] {
    match kind {
        SensorKind::Obu => &[obu::HRM_MEASUREMENT],
        SensorKind::Core | SensorKind::Unknown => &[],
    }
}

/// Characteristic that accepts command frames.
pub fn command_characteristic(kind: SensorKind) -> Option<Uuid> {
    match kind {
        SensorKind::Obu => Some(obu::NUS_RX),
        SensorKind::Core => Some(core_sensor::CONTROL_POINT),
        SensorKind::Unknown => None,
    }
}

/// Characteristics that only accept writes once the full notification plan
/// of the device is active.
pub fn requires_notifications_for_write(kind: SensorKind, characteristic: Uuid) -> bool {
    kind == SensorKind::Core && characteristic == core_sensor::CONTROL_POINT
}
