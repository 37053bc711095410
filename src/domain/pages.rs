//! OBU Page Types
//!
//! Decoded notification pages and the outbound command vocabulary. Byte
//! layouts live in [`crate::infrastructure::bluetooth::codec`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One decoded notification frame.
///
/// The page id selects the variant; no variant carries fields of another.
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
    SessionBasics(SessionBasics),
    Motion(Motion),
    DistanceValidity(DistanceValidity),
    BandDwell(BandDwell),
    BandCounters(BandCounters),
    Gnss(Gnss),
    DeviceUuid(DeviceUuid),
    DeviceInfo(DeviceInfo),
    RawLog(RawLog),
}

impl Page {
    pub fn page_id(&self) -> u8 {
        match self {
            Self::SessionBasics(p) => p.page_id,
            Self::Motion(p) => p.page_id,
            Self::DistanceValidity(p) => p.page_id,
            Self::BandDwell(p) => p.page_id,
            Self::BandCounters(p) => p.page_id,
            Self::Gnss(p) => p.page_id,
            Self::DeviceUuid(p) => p.page_id,
            Self::DeviceInfo(p) => p.page_id,
            Self::RawLog(p) => p.page_id,
        }
    }

    pub fn page_count(&self) -> u32 {
        match self {
            Self::SessionBasics(p) => p.page_count,
            Self::Motion(p) => p.page_count,
            Self::DistanceValidity(p) => p.page_count,
            Self::BandDwell(p) => p.page_count,
            Self::BandCounters(p) => p.page_count,
            Self::Gnss(p) => p.page_count,
            Self::DeviceUuid(p) => p.page_count,
            Self::DeviceInfo(p) => p.page_count,
            Self::RawLog(_) => 0,
        }
    }
}

/// Page 1
#[derive(Debug, Clone, PartialEq)]
pub struct SessionBasics {
    pub page_id: u8,
    pub page_count: u32,
    /// Unix seconds.
    pub session_start: u32,
    pub interval_duration: u32,
    /// Seconds since `session_start`.
    pub session_elapsed: u32,
    pub metadata: u8,
    pub period_number: u8,
    pub heart_rate: Option<u8>,
    pub respiration: Option<u8>,
}

/// Page 2
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    pub page_id: u8,
    pub page_count: u32,
    pub accel_x: i32,
    pub accel_y: i32,
    pub accel_z: i32,
    pub player_load: u32,
}

/// Page 3
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceValidity {
    pub page_id: u8,
    pub page_count: u32,
    pub hr_valid: bool,
    pub resp_valid: bool,
    pub accumulated_player_load: u16,
    pub high_speed_range: i32,
    pub explosive_distance: i32,
    pub total_distance: u32,
}

/// Pages 4-11 and 16-19
#[derive(Debug, Clone, PartialEq)]
pub struct BandDwell {
    pub page_id: u8,
    pub page_count: u32,
    pub dwell_time_a: u32,
    pub distance_a: u32,
    pub dwell_time_b: u32,
    pub distance_b: u32,
    /// Speed band of the `a` pair, [`UNKNOWN_BAND`] when the page id has no mapping.
    pub band: u8,
}

/// Band reported for page ids outside the band table.
pub const UNKNOWN_BAND: u8 = 0;

/// Pages 20, 22 and 23
#[derive(Debug, Clone, PartialEq)]
pub struct BandCounters {
    pub page_id: u8,
    pub page_count: u32,
    pub counters: [u16; 8],
}

/// Page 24
#[derive(Debug, Clone, PartialEq)]
pub struct Gnss {
    pub page_id: u8,
    pub page_count: u32,
    /// Decimal degrees.
    pub longitude: Option<f64>,
    /// Decimal degrees.
    pub latitude: Option<f64>,
    /// Meters.
    pub altitude: Option<f64>,
    /// Degrees.
    pub heading: Option<f64>,
    /// km/h, four decimals.
    pub speed: Option<f64>,
    pub satellites: u8,
    pub hdop: f64,
}

/// Page 124
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUuid {
    pub page_id: u8,
    pub page_count: u32,
    pub uuid0: u32,
    pub uuid1: u32,
    pub uuid2: u32,
}

/// Page 127
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub page_id: u8,
    pub page_count: u32,
    pub firmware_part: u32,
    pub firmware_version: u32,
    pub module_part: u32,
    pub battery_voltage: u16,
    pub battery_level: u8,
}

impl DeviceInfo {
    pub fn battery(&self) -> BatteryStatus {
        BatteryStatus {
            voltage: self.battery_voltage,
            level: self.battery_level,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub voltage: u16,
    pub level: u8,
}

/// Anything the codec did not recognise, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub page_id: u8,
    pub bytes: Vec<u8>,
}

/// Standard BLE heart rate measurement (characteristic 0x2A37).
#[derive(Debug, Clone, PartialEq)]
pub struct HeartRateMeasurement {
    pub bpm: u16,
    pub energy_expended: Option<u16>,
    /// RR intervals in milliseconds, oldest first.
    pub rr_intervals_ms: Vec<f64>,
}

/// Activity profile selected with the profile-set command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityProfile {
    #[default]
    Running,
    Cycling,
    Swimming,
    Car,
    Custom,
}

impl ActivityProfile {
    pub fn suffix(self) -> u8 {
        match self {
            Self::Running => 0x00,
            Self::Cycling => 0x01,
            Self::Swimming => 0x02,
            Self::Car => 0x03,
            Self::Custom => 0x04,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    Pause,
    Resume,
    StartWithoutGnss,
    SetTeamMode,
    SetIndividualMode,
    SetSleepMode,
}

impl SessionCommand {
    pub fn suffix(self) -> u8 {
        match self {
            Self::Start => 0x01,
            Self::Stop => 0x02,
            Self::Pause => 0x03,
            Self::Resume => 0x04,
            Self::StartWithoutGnss => 0x05,
            Self::SetTeamMode => 0x06,
            Self::SetIndividualMode => 0x07,
            Self::SetSleepMode => 0x08,
        }
    }
}

/// Operating modes that ride on the session command page without touching
/// the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    Team,
    Individual,
    Sleep,
}

impl From<OperatingMode> for SessionCommand {
    fn from(mode: OperatingMode) -> Self {
        match mode {
            OperatingMode::Team => Self::SetTeamMode,
            OperatingMode::Individual => Self::SetIndividualMode,
            OperatingMode::Sleep => Self::SetSleepMode,
        }
    }
}

/// Outbound command frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetProfile(ActivityProfile),
    RequestDeviceUuid,
    Session(SessionCommand),
    /// Local wall-clock time to program into the unit.
    SetTime(NaiveDateTime),
    RequestDeviceInfo,
}

impl Command {
    /// Page id the command addresses (byte 3 of the frame).
    pub fn page_id(&self) -> u8 {
        match self {
            Self::SetProfile(_) => 0x78,
            Self::RequestDeviceUuid => 0x7C,
            Self::Session(_) => 0x7D,
            Self::SetTime(_) => 0x7E,
            Self::RequestDeviceInfo => 0x7F,
        }
    }

    pub fn set_time_now() -> Self {
        Self::SetTime(chrono::Local::now().naive_local())
    }
}
