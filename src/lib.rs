//! Telemetry ingest for OBU and CORE sensors: page codec, device and session
//! state machines, trace aggregation and live statistics.

pub mod domain;
pub mod infrastructure;
