//! ble-tracker - BLE beacon scanner bridging advertisements to MQTT.
//!
//! The library holds all the logic that can be tested on the host (no
//! embedded hardware required): the advertisement decoder, the scan, GATT
//! client, WiFi and MQTT state machines, the telemetry formatter and the
//! dispatcher that ties them together.
//!
//! Usage: `cargo test`
//!
//! The embedded binary (`src/main.rs`, `--features embedded`) links this
//! library and implements the adapter traits on top of esp-radio.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod ble;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fota;
pub mod net;
pub mod telemetry;
pub mod tracker;

pub use connectivity::{Connectivity, ConnectivityFlags};
pub use error::{BleError, Error, Status};
pub use tracker::{Event, Tracker};
