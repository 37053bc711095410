//! Trace Aggregation
//!
//! Folds decoded pages into the live [`Trace`] and materialises
//! [`Trackpoint`]s from it.

use crate::domain::pages::{HeartRateMeasurement, Page};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latest known value of every tracked field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trace {
    pub timestamp: Option<DateTime<Utc>>,
    pub hr_val: Option<u8>,
    pub hr_rr: Option<u32>,
    pub hr_is_valid: Option<bool>,
    pub rr_val: Option<u8>,
    pub rr_is_valid: Option<bool>,
    pub altitude: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub satellites: Option<u8>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub hdop: Option<f64>,
    pub acc_x: Option<i32>,
    pub acc_y: Option<i32>,
    pub acc_z: Option<i32>,
    pub distance: Option<f64>,
    pub explosive_distance: Option<i32>,
    pub player_load: Option<u32>,
    pub accumulated_player_load: Option<u16>,
}

/// Fold one page into a trace.
///
/// Fields the page carries are overwritten (an absent optional value clears
/// the field); everything else keeps its prior value. Pages that do not feed
/// the trace leave it unchanged.
pub fn fold(trace: &Trace, page: &Page) -> Trace {
    let mut next = trace.clone();

    match page {
        Page::SessionBasics(p) => {
            next.timestamp = DateTime::from_timestamp(
                i64::from(p.session_start) + i64::from(p.session_elapsed),
                0,
            );
            next.hr_val = p.heart_rate;
            next.rr_val = p.respiration;
        }
        Page::Motion(p) => {
            next.acc_x = Some(p.accel_x);
            next.acc_y = Some(p.accel_y);
            next.acc_z = Some(p.accel_z);
            next.player_load = Some(p.player_load);
        }
        Page::DistanceValidity(p) => {
            next.hr_is_valid = Some(p.hr_valid);
            next.rr_is_valid = Some(p.resp_valid);
            next.accumulated_player_load = Some(p.accumulated_player_load);
            next.distance = Some(f64::from(p.total_distance));
            next.explosive_distance = Some(p.explosive_distance);
        }
        Page::Gnss(p) => {
            next.latitude = p.latitude;
            next.longitude = p.longitude;
            next.altitude = p.altitude;
            next.satellites = Some(p.satellites);
            next.speed = p.speed;
            next.heading = p.heading;
            next.hdop = Some(p.hdop);
        }
        Page::BandDwell(_)
        | Page::BandCounters(_)
        | Page::DeviceUuid(_)
        | Page::DeviceInfo(_)
        | Page::RawLog(_) => {}
    }

    next
}

/// Immutable snapshot of the trace taken when a trigger page arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trackpoint {
    /// Sample time reported by the unit.
    pub timestamp: Option<DateTime<Utc>>,
    /// Wall-clock time the trigger page was ingested.
    pub received_at: Option<DateTime<Utc>>,
    pub hr_val: Option<u8>,
    pub hr_rr: Option<u32>,
    pub hr_is_valid: Option<bool>,
    pub rr_val: Option<u8>,
    pub rr_is_valid: Option<bool>,
    pub temp_skin: Option<f64>,
    pub temp_core: Option<f64>,
    pub temp_quality: Option<u8>,
    pub temp_hr_state: Option<u8>,
    pub altitude: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub satellites: Option<u8>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub hdop: Option<f64>,
    pub acc_x: Option<f64>,
    pub acc_y: Option<f64>,
    pub acc_z: Option<f64>,
    pub distance: Option<f64>,
    pub explosive_distance: Option<i32>,
    pub player_load: Option<f64>,
    pub accumulated_player_load: Option<u16>,
}

impl Trackpoint {
    /// Merge a trace over the previous trackpoint.
    ///
    /// The sample time falls back to the previous one when the trace has none;
    /// temperature fields come from other sensors and are carried over.
    pub fn updating(&self, trace: &Trace) -> Self {
        Self {
            timestamp: trace.timestamp.or(self.timestamp),
            received_at: self.received_at,
            hr_val: trace.hr_val,
            hr_rr: trace.hr_rr,
            hr_is_valid: trace.hr_is_valid,
            rr_val: trace.rr_val,
            rr_is_valid: trace.rr_is_valid,
            temp_skin: self.temp_skin,
            temp_core: self.temp_core,
            temp_quality: self.temp_quality,
            temp_hr_state: self.temp_hr_state,
            altitude: trace.altitude,
            latitude: trace.latitude,
            longitude: trace.longitude,
            satellites: trace.satellites,
            speed: trace.speed,
            heading: trace.heading,
            hdop: trace.hdop,
            acc_x: trace.acc_x.map(f64::from),
            acc_y: trace.acc_y.map(f64::from),
            acc_z: trace.acc_z.map(f64::from),
            distance: trace.distance,
            explosive_distance: trace.explosive_distance,
            player_load: trace.player_load.map(f64::from),
            accumulated_player_load: trace.accumulated_player_load,
        }
    }

    pub fn stamped(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }
}

/// Which page materialises a trackpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmitTrigger {
    /// GNSS pages (normal sessions).
    #[default]
    Gnss,
    /// Session clock pages (sessions started without GNSS).
    SessionClock,
}

impl EmitTrigger {
    fn fires_on(self, page: &Page) -> bool {
        match self {
            Self::Gnss => matches!(page, Page::Gnss(_)),
            Self::SessionClock => matches!(page, Page::SessionBasics(_)),
        }
    }
}

/// Owns the live trace and the last emitted trackpoint.
#[derive(Debug, Default)]
pub struct TraceAggregator {
    trace: Trace,
    last: Trackpoint,
    trigger: EmitTrigger,
}

impl TraceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_trigger(&mut self, trigger: EmitTrigger) {
        self.trigger = trigger;
    }

    pub fn trigger(&self) -> EmitTrigger {
        self.trigger
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// Fold a page and return a trackpoint when the page is the trigger.
    pub fn ingest(&mut self, page: &Page, received_at: DateTime<Utc>) -> Option<Trackpoint> {
        self.trace = fold(&self.trace, page);

        if !self.trigger.fires_on(page) {
            return None;
        }

        let trackpoint = self.last.updating(&self.trace).stamped(received_at);
        self.last = trackpoint.clone();
        Some(trackpoint)
    }

    /// RR intervals from the standard heart rate characteristic.
    pub fn ingest_heart_rate(&mut self, measurement: &HeartRateMeasurement) {
        if let Some(rr) = measurement.rr_intervals_ms.last() {
            self.trace.hr_rr = Some(rr.round() as u32);
        }
    }

    /// Drop the trace and the last trackpoint; the trigger returns to GNSS.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
