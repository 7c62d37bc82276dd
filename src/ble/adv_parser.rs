//! Advertisement decoder - raw advertisement bytes to a [`BeaconRecord`].
//!
//! Radio input is untrusted: every read is bounded by both the buffer and
//! the length the controller declared, and malformed input degrades to an
//! empty name and no beacon frame instead of an error.

use core::ffi::CStr;

use crate::ble::{BdAddr, ScanReport};
use crate::config::{ALT_LAYOUT_ADV_LEN, ALT_LAYOUT_SHIFT, NAME_MAX_LEN};

/// AD type: Complete Local Name.
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Bytes read for the beacon frame: AD length, AD type, manufacturer id (2),
/// subtype, sub-length, proximity UUID (16), major (2), minor (2).
pub const BEACON_WINDOW_LEN: usize = 26;

/// Smallest declared advertisement length that can carry a beacon frame.
pub const BEACON_MIN_ADV_LEN: usize = 30;

/// Advertised local name, at most [`NAME_MAX_LEN`] bytes, kept
/// NUL-terminated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalName {
    buf: [u8; NAME_MAX_LEN + 1],
    len: u8,
}

impl LocalName {
    pub const fn empty() -> Self {
        Self {
            buf: [0; NAME_MAX_LEN + 1],
            len: 0,
        }
    }

    /// Copy `bytes`, truncating to [`NAME_MAX_LEN`].
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut name = Self::empty();
        let n = bytes.len().min(NAME_MAX_LEN);
        name.buf[..n].copy_from_slice(&bytes[..n]);
        name.len = n as u8;
        name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len as usize]
    }

    /// C view of the name. Stops at the first NUL, so an interior NUL
    /// shortens it.
    pub fn as_c_str(&self) -> &CStr {
        // The buffer always ends in a zero byte past `len`.
        CStr::from_bytes_until_nul(&self.buf).unwrap_or_default()
    }

    /// Longest valid UTF-8 prefix of the name.
    pub fn as_str_lossy(&self) -> &str {
        let bytes = self.as_bytes();
        match core::str::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for LocalName {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for LocalName {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str_lossy())
    }
}

/// iBeacon-style manufacturer data. Multi-byte fields are kept in radio
/// byte order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BeaconFrame {
    pub length: u8,
    pub ad_type: u8,
    pub manufacturer_id: [u8; 2],
    pub subtype: u8,
    pub sub_length: u8,
    pub proximity_uuid: [u8; 16],
    pub major: [u8; 2],
    pub minor: [u8; 2],
}

impl BeaconFrame {
    fn from_window(w: &[u8; BEACON_WINDOW_LEN]) -> Self {
        let mut proximity_uuid = [0u8; 16];
        proximity_uuid.copy_from_slice(&w[6..22]);
        Self {
            length: w[0],
            ad_type: w[1],
            manufacturer_id: [w[2], w[3]],
            subtype: w[4],
            sub_length: w[5],
            proximity_uuid,
            major: [w[22], w[23]],
            minor: [w[24], w[25]],
        }
    }
}

/// Decoded advertisement, built once per scan result.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BeaconRecord {
    pub bda: BdAddr,
    pub name: LocalName,
    pub rssi: i8,
    pub adv_data_len: u8,
    pub dev_type: u8,
    /// `None` unless the advertisement is long enough for a beacon frame.
    pub beacon: Option<BeaconFrame>,
}

impl BeaconRecord {
    /// Beacon frame, or all-zero fields when absent.
    pub fn beacon_or_zeroed(&self) -> BeaconFrame {
        self.beacon.unwrap_or_default()
    }
}

/// Decode one advertisement.
///
/// Never fails. Reads are limited to `min(raw.len(), total_length)`.
pub fn decode(raw: &[u8], total_length: u8, bda: BdAddr, rssi: i8) -> BeaconRecord {
    let data = &raw[..raw.len().min(total_length as usize)];
    BeaconRecord {
        bda,
        name: extract_complete_name(data).map(LocalName::from_bytes).unwrap_or_default(),
        rssi,
        adv_data_len: total_length,
        dev_type: 0,
        beacon: extract_beacon(data, total_length),
    }
}

/// Decode a scan report, carrying its device type along.
pub fn decode_report(report: &ScanReport) -> BeaconRecord {
    BeaconRecord {
        dev_type: report.dev_type,
        ..decode(&report.adv, report.adv_data_len, report.bda, report.rssi)
    }
}

/// Offset of the beacon window for a declared advertisement length.
///
/// Advertisements of exactly [`ALT_LAYOUT_ADV_LEN`] bytes carry three bytes
/// of vendor padding ahead of the manufacturer data.
pub const fn beacon_offset(total_length: u8) -> usize {
    if total_length == ALT_LAYOUT_ADV_LEN {
        ALT_LAYOUT_SHIFT
    } else {
        0
    }
}

fn extract_beacon(data: &[u8], total_length: u8) -> Option<BeaconFrame> {
    if (total_length as usize) < BEACON_MIN_ADV_LEN {
        return None;
    }
    let start = beacon_offset(total_length);
    let window = data.get(start..start + BEACON_WINDOW_LEN)?;
    let window: &[u8; BEACON_WINDOW_LEN] = window.try_into().ok()?;
    Some(BeaconFrame::from_window(window))
}

/// Walk the AD structures and return the Complete Local Name, if any.
pub fn extract_complete_name(data: &[u8]) -> Option<&[u8]> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        let ad_type = data[i + 1];
        if ad_type == AD_TYPE_COMPLETE_LOCAL_NAME {
            return Some(&data[i + 2..i + 1 + len]);
        }
        i += len + 1;
    }
    None
}
