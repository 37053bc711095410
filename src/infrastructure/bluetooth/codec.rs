//! OBU Page Codec
//!
//! Byte layouts for the notification pages streamed by the OBU and for the
//! command frames written back to it.
//!
//! # Notification Frame Layout
//!
//! ```text
//! [0-2]   : Page count (u24 little-endian, rolling sequence)
//! [3]     : Page id
//! [4..]   : Page body, fixed offsets per page id
//! ```
//!
//! Every field read is "safe": bytes past the end of the buffer read as zero,
//! so [`decode`] accepts frames of any length and never fails.

use crate::domain::pages::{
    BandCounters, BandDwell, Command, DeviceInfo, DeviceUuid, DistanceValidity, Gnss,
    HeartRateMeasurement, Motion, Page, RawLog, SessionBasics, UNKNOWN_BAND,
};
use chrono::{Datelike, Timelike};
use tracing::trace;

/// Offset of the page id byte.
pub const PAGE_ID_OFFSET: usize = 3;

/// Common prefix of every command frame, completed by the command page id.
const COMMAND_PREFIX: [u8; 3] = [0x01, 0x00, 0x00];

/// Decode a frame received on the OBU TX characteristic.
pub fn decode(bytes: &[u8]) -> Page {
    if bytes.len() <= PAGE_ID_OFFSET {
        return Page::RawLog(RawLog {
            page_id: 0,
            bytes: bytes.to_vec(),
        });
    }

    let page_id = bytes[PAGE_ID_OFFSET];

    trace!("Page {} raw frame: {:02X?}", page_id, bytes);

    match page_id {
        1 => Page::SessionBasics(session_basics(bytes)),
        2 => Page::Motion(motion(bytes)),
        3 => Page::DistanceValidity(distance_validity(bytes)),
        4..=11 | 16..=19 => Page::BandDwell(band_dwell(bytes)),
        20 | 22 | 23 => Page::BandCounters(band_counters(bytes)),
        24 => Page::Gnss(gnss(bytes)),
        124 => Page::DeviceUuid(device_uuid(bytes)),
        127 => Page::DeviceInfo(device_info(bytes)),
        _ => Page::RawLog(RawLog {
            page_id,
            bytes: bytes.to_vec(),
        }),
    }
}

/// Frames echoed on the RX characteristic are never interpreted.
pub fn decode_rx(bytes: &[u8]) -> Page {
    Page::RawLog(RawLog {
        page_id: read_u8(bytes, PAGE_ID_OFFSET),
        bytes: bytes.to_vec(),
    })
}

/// Build the bytes for an outbound command.
pub fn encode(command: &Command) -> Vec<u8> {
    let mut frame = Vec::with_capacity(10);
    frame.extend_from_slice(&COMMAND_PREFIX);
    frame.push(command.page_id());

    match command {
        Command::SetProfile(profile) => frame.push(profile.suffix()),
        Command::Session(session) => frame.push(session.suffix()),
        Command::SetTime(time) => {
            // Each component is truncated to its low byte, year included.
            frame.extend_from_slice(&[
                time.year() as u8,
                time.month() as u8,
                time.day() as u8,
                time.hour() as u8,
                time.minute() as u8,
                time.second() as u8,
            ]);
        }
        Command::RequestDeviceUuid | Command::RequestDeviceInfo => {}
    }

    frame
}

/// Decode a standard heart rate measurement notification.
///
/// Returns `None` for an empty buffer.
pub fn decode_heart_rate_measurement(bytes: &[u8]) -> Option<HeartRateMeasurement> {
    let flags = *bytes.first()?;
    let wide_value = flags & 0x01 != 0;
    let energy_present = flags & 0x08 != 0;
    let rr_present = flags & 0x10 != 0;

    let mut offset = 1;
    let bpm = if wide_value {
        offset += 2;
        read_u16(bytes, 1)
    } else {
        offset += 1;
        u16::from(read_u8(bytes, 1))
    };

    let energy_expended = if energy_present {
        let value = read_u16(bytes, offset);
        offset += 2;
        Some(value)
    } else {
        None
    };

    let mut rr_intervals_ms = Vec::new();
    if rr_present {
        while offset + 1 < bytes.len() {
            let raw = read_u16(bytes, offset);
            rr_intervals_ms.push(f64::from(raw) * 1000.0 / 1024.0);
            offset += 2;
        }
    }

    Some(HeartRateMeasurement {
        bpm,
        energy_expended,
        rr_intervals_ms,
    })
}

/// Speed band for a band-dwell page id.
pub fn band_for_page(page_id: u8) -> Option<u8> {
    match page_id {
        4 | 8 | 16 => Some(1),
        5 | 9 | 17 => Some(3),
        6 | 10 | 18 => Some(5),
        7 | 11 | 19 => Some(7),
        _ => None,
    }
}

/// NMEA packed `dddmmmmmm` (minutes × 10 000) to signed decimal degrees.
pub fn nmea_to_degrees(coordinate: i32) -> f64 {
    let magnitude = i64::from(coordinate).abs();
    let degrees = magnitude / 1_000_000;
    let minutes = magnitude % 1_000_000;

    let result = degrees as f64 + (minutes as f64 / 10000.0 / 60.0);
    if coordinate < 0 {
        -result
    } else {
        result
    }
}

pub fn decimeters_to_meters(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

pub fn heading_to_degrees(raw: u16) -> f64 {
    f64::from(raw) / 100.0
}

pub fn hdop_to_precision(raw: u8) -> f64 {
    f64::from(raw) / 10.0
}

/// Knots × 100 to km/h, rounded to four decimals.
pub fn speed_to_kmh(raw: u16) -> f64 {
    round_to_four_decimals(f64::from(raw) * 1.852 / 100.0)
}

fn round_to_four_decimals(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

fn session_basics(bytes: &[u8]) -> SessionBasics {
    SessionBasics {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        session_start: read_u32(bytes, 4),
        interval_duration: read_u32(bytes, 8),
        session_elapsed: read_u32(bytes, 12),
        metadata: read_u8(bytes, 16),
        period_number: read_u8(bytes, 17),
        heart_rate: non_zero(read_u8(bytes, 18)),
        respiration: non_zero(read_u8(bytes, 19)),
    }
}

fn motion(bytes: &[u8]) -> Motion {
    Motion {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        accel_x: read_i32(bytes, 4),
        accel_y: read_i32(bytes, 8),
        accel_z: read_i32(bytes, 12),
        player_load: read_u32(bytes, 16),
    }
}

fn distance_validity(bytes: &[u8]) -> DistanceValidity {
    DistanceValidity {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        hr_valid: read_u8(bytes, 4) == 0,
        resp_valid: read_u8(bytes, 5) == 0,
        accumulated_player_load: read_u16(bytes, 6),
        high_speed_range: read_i32(bytes, 8),
        explosive_distance: read_i32(bytes, 12),
        total_distance: read_u32(bytes, 16),
    }
}

fn band_dwell(bytes: &[u8]) -> BandDwell {
    let page_id = read_u8(bytes, 3);
    BandDwell {
        page_id,
        page_count: read_page_count(bytes),
        dwell_time_a: read_u32(bytes, 4),
        distance_a: read_u32(bytes, 8),
        dwell_time_b: read_u32(bytes, 12),
        distance_b: read_u32(bytes, 16),
        band: band_for_page(page_id).unwrap_or(UNKNOWN_BAND),
    }
}

fn band_counters(bytes: &[u8]) -> BandCounters {
    let mut counters = [0u16; 8];
    for (index, counter) in counters.iter_mut().enumerate() {
        *counter = read_u16(bytes, 4 + index * 2);
    }

    BandCounters {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        counters,
    }
}

fn gnss(bytes: &[u8]) -> Gnss {
    let longitude = read_i32(bytes, 4);
    let latitude = read_i32(bytes, 8);
    let altitude = read_u16(bytes, 12);
    let heading = read_u16(bytes, 14);
    let speed = read_u16(bytes, 16);

    // Zero is the protocol's "no fix" marker for every component.
    Gnss {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        longitude: (longitude != 0).then(|| nmea_to_degrees(longitude)),
        latitude: (latitude != 0).then(|| nmea_to_degrees(latitude)),
        altitude: (altitude != 0).then(|| decimeters_to_meters(altitude)),
        heading: (heading != 0).then(|| heading_to_degrees(heading)),
        speed: (speed != 0).then(|| speed_to_kmh(speed)),
        satellites: read_u8(bytes, 18),
        hdop: hdop_to_precision(read_u8(bytes, 19)),
    }
}

fn device_uuid(bytes: &[u8]) -> DeviceUuid {
    DeviceUuid {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        uuid0: read_u32(bytes, 4),
        uuid1: read_u32(bytes, 8),
        uuid2: read_u32(bytes, 12),
    }
}

fn device_info(bytes: &[u8]) -> DeviceInfo {
    DeviceInfo {
        page_id: read_u8(bytes, 3),
        page_count: read_page_count(bytes),
        firmware_part: read_u32(bytes, 4),
        firmware_version: read_u32(bytes, 8),
        module_part: read_u32(bytes, 12),
        battery_voltage: read_u16(bytes, 16),
        battery_level: read_u8(bytes, 18),
    }
}

fn non_zero(value: u8) -> Option<u8> {
    (value != 0).then_some(value)
}

/// Copy `min(N, available)` bytes starting at `offset`, zero-padding the rest.
fn read_padded<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    if let Some(tail) = bytes.get(offset..) {
        let len = tail.len().min(N);
        out[..len].copy_from_slice(&tail[..len]);
    }
    out
}

fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes.get(offset).copied().unwrap_or(0)
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_padded(bytes, offset))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_padded(bytes, offset))
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(read_padded(bytes, offset))
}

fn read_page_count(bytes: &[u8]) -> u32 {
    let [b0, b1, b2] = read_padded::<3>(bytes, 0);
    u32::from_le_bytes([b0, b1, b2, 0])
}
