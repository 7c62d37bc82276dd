//! Bluetooth Low Energy subsystem.
//!
//! The controller runs in **Central** role with two jobs:
//!
//! 1. **Scanner** - periodic passive scan windows; every advertisement is
//!    decoded into a [`adv_parser::BeaconRecord`] and published as telemetry.
//! 2. **GATT client** - one application profile that connects to a peer,
//!    discovers its firmware-update service and subscribes to notifications.
//!
//! Everything here is pure logic. The radio is reached through the
//! [`BleController`] trait; the firmware binary implements it on top of the
//! host stack and the tests implement it with recorders.

pub mod adv_parser;
pub mod gatt_client;
pub mod scanner;

use heapless::Vec;

use crate::config::{ADV_MAX_LEN, SCAN_INTERVAL, SCAN_WINDOW};
use crate::error::{BleError, Status};

pub use gatt_client::AttributeCache;

/// 48-bit device address, as reported by the controller.
pub type BdAddr = [u8; 6];

/// Parse `AA:BB:CC:DD:EE:FF` (most significant byte first).
pub fn parse_bd_addr(s: &str) -> Option<BdAddr> {
    let mut addr = [0u8; 6];
    let mut parts = s.split(':');
    for byte in addr.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(addr)
}

/// Attribute UUID in any of the three Bluetooth widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    Uuid16(u16),
    Uuid32(u32),
    Uuid128([u8; 16]),
}

/// GATT client interface handle assigned on app registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GattIf(pub u8);

impl GattIf {
    /// Not bound to any profile; events tagged with it go to every profile.
    pub const NONE: GattIf = GattIf(0xFF);
}

/// Inclusive attribute handle range of a discovered service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanType {
    Passive,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OwnAddrType {
    Public,
    Random,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanFilterPolicy {
    AllowAll,
    OnlyWhitelist,
}

/// Scan parameters pushed to the controller once the profile registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanParams {
    pub scan_type: ScanType,
    pub own_addr_type: OwnAddrType,
    pub filter_policy: ScanFilterPolicy,
    /// 0.625 ms units.
    pub interval: u16,
    /// 0.625 ms units.
    pub window: u16,
}

/// Passive, public address, no filtering.
pub const TRACKER_SCAN_PARAMS: ScanParams = ScanParams {
    scan_type: ScanType::Passive,
    own_addr_type: OwnAddrType::Public,
    filter_policy: ScanFilterPolicy::AllowAll,
    interval: SCAN_INTERVAL,
    window: SCAN_WINDOW,
};

/// One advertisement reported during a scan window.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanReport {
    pub bda: BdAddr,
    /// BR/EDR, BLE or dual mode, as the controller reports it.
    pub dev_type: u8,
    pub rssi: i8,
    /// Length the controller declared for the advertisement data.
    pub adv_data_len: u8,
    /// Advertisement data followed by any scan response bytes.
    pub adv: Vec<u8, ADV_MAX_LEN>,
}

/// GAP events consumed by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GapEvent {
    ScanParamSetComplete { status: Status },
    ScanStartComplete { status: Status },
    ScanResult(ScanReport),
    /// The scan window elapsed.
    ScanWindowComplete,
    ScanStopComplete { status: Status },
    AdvStopComplete { status: Status },
    ConnParamsUpdated {
        status: Status,
        min_interval: u16,
        max_interval: u16,
        interval: u16,
        latency: u16,
        timeout: u16,
    },
}

/// Requests the dispatcher issues to the BLE controller.
///
/// Each call only issues the request; completions come back as
/// [`GapEvent`]s and [`gatt_client::GattcEvent`]s. The synchronous
/// attribute-cache queries live on the [`AttributeCache`] supertrait.
pub trait BleController: AttributeCache {
    fn register_app(&mut self, app_id: u16) -> Result<(), BleError>;

    fn set_local_mtu(&mut self, mtu: u16) -> Result<(), BleError>;

    fn set_scan_params(&mut self, params: &ScanParams) -> Result<(), BleError>;

    fn start_scan(&mut self, duration_secs: u32) -> Result<(), BleError>;

    fn send_mtu_request(&mut self, gattc_if: GattIf, conn_id: u16) -> Result<(), BleError>;

    fn search_service(&mut self, gattc_if: GattIf, conn_id: u16, filter: Uuid)
        -> Result<(), BleError>;

    fn register_for_notify(
        &mut self,
        gattc_if: GattIf,
        remote: BdAddr,
        char_handle: u16,
    ) -> Result<(), BleError>;

    fn write_descriptor(
        &mut self,
        gattc_if: GattIf,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), BleError>;

    fn write_characteristic(
        &mut self,
        gattc_if: GattIf,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), BleError>;
}
