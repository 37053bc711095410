//! Trackpoint Publishing
//!
//! Completed trackpoints are handed to a [`TrackpointSink`] twice: as a full
//! [`PublishRecord`] and as a reduced [`LiveMonitoringPayload`]. Delivery is
//! best-effort and at most once; a failed publish is logged and forgotten.

use crate::domain::trace::Trackpoint;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::io::Write;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Microsecond UTC timestamp, e.g. `2024-05-01T12:00:00.000000+0000`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f+0000";

pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match timestamp {
        Some(ts) => serializer.serialize_str(&format_timestamp(ts)),
        None => serializer.serialize_none(),
    }
}

/// One trackpoint as published, keyed by user and session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRecord {
    pub user_id: String,
    pub session_id: Uuid,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub hr_value: Option<u8>,
    pub hr_rr: Option<u32>,
    pub hr_valid: Option<bool>,
    pub rr_value: Option<u8>,
    pub rr_valid: Option<bool>,
    pub temp_skin: Option<f64>,
    pub temp_core: Option<f64>,
    pub temp_quality: Option<u8>,
    pub temp_hr_state: Option<u8>,
    pub altitude: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub satellite_count: Option<u8>,
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

impl PublishRecord {
    /// Sample time is used when known, otherwise the ingest time.
    pub fn new(user_id: &str, session_id: Uuid, tp: &Trackpoint) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id,
            timestamp: tp.timestamp.or(tp.received_at),
            hr_value: tp.hr_val,
            hr_rr: tp.hr_rr,
            hr_valid: tp.hr_is_valid,
            rr_value: tp.rr_val,
            rr_valid: tp.rr_is_valid,
            temp_skin: tp.temp_skin,
            temp_core: tp.temp_core,
            temp_quality: tp.temp_quality,
            temp_hr_state: tp.temp_hr_state,
            altitude: tp.altitude,
            latitude: tp.latitude,
            longitude: tp.longitude,
            satellite_count: tp.satellites,
            speed: tp.speed,
            heading: tp.heading,
            hdop: tp.hdop,
            acc_x: tp.acc_x,
            acc_y: tp.acc_y,
            acc_z: tp.acc_z,
            distance: tp.distance,
            explosive_distance: tp.explosive_distance,
            player_load: tp.player_load,
            accumulated_player_load: tp.accumulated_player_load,
        }
    }
}

/// Reduced record for live monitoring dashboards, stamped with ingest time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveMonitoringPayload {
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    pub hr_value: Option<u8>,
    pub hr_rr: Option<u32>,
    pub hr_valid: Option<bool>,
    pub rr_value: Option<u8>,
    pub rr_valid: Option<bool>,
    pub temp_core: Option<f64>,
    pub temp_skin: Option<f64>,
}

impl From<&Trackpoint> for LiveMonitoringPayload {
    fn from(tp: &Trackpoint) -> Self {
        Self {
            timestamp: tp.received_at.or(tp.timestamp),
            hr_value: tp.hr_val,
            hr_rr: tp.hr_rr,
            hr_valid: tp.hr_is_valid,
            rr_value: tp.rr_val,
            rr_valid: tp.rr_is_valid,
            temp_core: tp.temp_core,
            temp_skin: tp.temp_skin,
        }
    }
}

/// Destination for published records.
pub trait TrackpointSink: Send {
    fn publish(&mut self, topic: &str, record: &PublishRecord) -> Result<()>;

    fn publish_live(&mut self, topic: &str, payload: &LiveMonitoringPayload) -> Result<()>;
}

/// Drops every record.
#[derive(Debug, Default)]
pub struct DiscardSink;

impl TrackpointSink for DiscardSink {
    fn publish(&mut self, _topic: &str, _record: &PublishRecord) -> Result<()> {
        Ok(())
    }

    fn publish_live(&mut self, _topic: &str, _payload: &LiveMonitoringPayload) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    topic: &'a str,
    record: &'a T,
}

/// Writes one JSON object per line: `{"topic": ..., "record": {...}}`.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    fn write_line<T: Serialize>(&mut self, topic: &str, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &Envelope { topic, record })?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> TrackpointSink for JsonLinesSink<W> {
    fn publish(&mut self, topic: &str, record: &PublishRecord) -> Result<()> {
        self.write_line(topic, record)
    }

    fn publish_live(&mut self, topic: &str, payload: &LiveMonitoringPayload) -> Result<()> {
        self.write_line(topic, payload)
    }
}

/// What a [`ChannelSink`] forwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Published {
    Record(PublishRecord),
    Live(LiveMonitoringPayload),
}

/// Forwards records to an in-process receiver.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<(String, Published)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Published)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, topic: &str, published: Published) -> Result<()> {
        self.sender
            .send((topic.to_string(), published))
            .map_err(|_| anyhow::anyhow!("receiver dropped"))
    }
}

impl TrackpointSink for ChannelSink {
    fn publish(&mut self, topic: &str, record: &PublishRecord) -> Result<()> {
        self.forward(topic, Published::Record(record.clone()))
    }

    fn publish_live(&mut self, topic: &str, payload: &LiveMonitoringPayload) -> Result<()> {
        self.forward(topic, Published::Live(payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trackpoint() -> Trackpoint {
        Trackpoint {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap()),
            hr_val: Some(72),
            hr_is_valid: Some(true),
            satellites: Some(9),
            latitude: Some(45.2056),
            acc_x: Some(-12.0),
            ..Trackpoint::default()
        }
    }

    #[test]
    fn test_timestamp_format() {
        let ts = Utc.timestamp_opt(1_714_566_605, 123_456_789).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-05-01T12:30:05.123456+0000");
    }

    #[test]
    fn test_record_keys() {
        let session = Uuid::nil();
        let record = PublishRecord::new("user-1", session, &trackpoint());
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["session_id"], session.to_string());
        assert_eq!(json["timestamp"], "2024-05-01T12:30:05.000000+0000");
        assert_eq!(json["hr_value"], 72);
        assert_eq!(json["hr_valid"], true);
        assert_eq!(json["satellite_count"], 9);
        assert_eq!(json["acc_x"], -12.0);
        assert!(json["temp_core"].is_null());
        assert_eq!(json.as_object().unwrap().len(), 26);
    }

    #[test]
    fn test_record_falls_back_to_received_at() {
        let received = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let tp = Trackpoint::default().stamped(received);
        let record = PublishRecord::new("u", Uuid::nil(), &tp);
        assert_eq!(record.timestamp, Some(received));
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let record = PublishRecord::new("u", Uuid::nil(), &trackpoint());
        sink.publish("mobile/c/tp", &record).unwrap();
        sink.publish("mobile/c/tp", &record).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["topic"], "mobile/c/tp");
        assert_eq!(value["record"]["hr_value"], 72);
    }

    #[test]
    fn test_live_monitoring_payload() {
        let received = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 6).unwrap();
        let tp = Trackpoint {
            hr_rr: Some(845),
            ..trackpoint()
        }
        .stamped(received);

        let payload = LiveMonitoringPayload::from(&tp);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["timestamp"], "2024-05-01T12:30:06.000000+0000");
        assert_eq!(json["hr_value"], 72);
        assert_eq!(json["hr_rr"], 845);
        assert!(json["rr_value"].is_null());
        assert_eq!(json.as_object().unwrap().len(), 8);
    }

    #[test]
    fn test_json_lines_sink_writes_live_payload() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let payload = LiveMonitoringPayload::from(&trackpoint());
        sink.publish_live("mobile/c/live", &payload).unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let value: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(value["topic"], "mobile/c/live");
        assert_eq!(value["record"]["hr_valid"], true);
    }
}
