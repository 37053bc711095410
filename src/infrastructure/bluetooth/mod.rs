//! Bluetooth Module
//!
//! Talks to OBU and CORE sensors over BLE and turns their notifications into
//! trackpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (single owner of devices, session, trace and stats)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │ Connection│  │  Registry  │  │  Codec   │
//! │           │  │            │  │          │
//! │ - scan    │  │ - records  │  │ - pages  │
//! │ - link    │  │ - services │  │ - command│
//! │   states  │  │            │  │   frames │
//! └─────┬─────┘  └────────────┘  └──────────┘
//!       │
//!       ▼
//! ┌───────────┐
//! │ Transport │  (dedicated worker, one request at a time)
//! └───────────┘
//! ```
//!
//! ## Modules
//!
//! - [`codec`] - Page decoding, command encoding and unit conversions
//! - [`protocol`] - Service/characteristic UUIDs and sensor classification
//! - [`transport`] - Radio driver interface and its worker thread
//! - [`registry`] - Known peripherals and their GATT maps
//! - [`scanner`] - Scan window and timeout
//! - [`connection`] - Per-device link state machine
//! - [`service`] - Main service loop

pub mod codec;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use service::{BluetoothService, ServiceCommand, ServiceHandle};
