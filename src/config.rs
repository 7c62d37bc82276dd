//! Application-wide constants and compile-time configuration.
//!
//! Protocol identifiers, timing parameters and buffer bounds live here so
//! they can be tuned in one place. Site settings (WiFi credentials, broker
//! address, device name) are baked in from the build environment through
//! [`Settings::from_env`].

use crate::ble::Uuid;

// BLE scanning

/// Period between scan windows (ms).
pub const SCAN_PERIOD_MS: u64 = 30_000;

/// Length of one scan window (seconds).
pub const SCAN_DURATION_SECS: u32 = 3;

/// Scan interval in 0.625 ms units. 0x50 = 50 ms.
pub const SCAN_INTERVAL: u16 = 0x50;

/// Scan window in 0.625 ms units. 0x30 = 30 ms.
pub const SCAN_WINDOW: u16 = 0x30;

/// How long the scan task waits on the connectivity flags before
/// re-checking (ms).
pub const CONNECTIVITY_WAIT_MS: u64 = 5_000;

/// Max raw advertisement bytes delivered per scan result
/// (31 bytes advertising data + 31 bytes scan response).
pub const ADV_MAX_LEN: usize = 62;

/// Max bytes kept from a Complete Local Name.
pub const NAME_MAX_LEN: usize = 31;

/// Advertisement length that marks the shifted beacon layout.
pub const ALT_LAYOUT_ADV_LEN: u8 = 30;

/// Offset applied to the beacon window for the shifted layout.
pub const ALT_LAYOUT_SHIFT: usize = 3;

// GATT client

/// Number of GATT client application profiles.
pub const PROFILE_NUM: usize = 1;

/// Application id of the single firmware-update profile.
pub const PROFILE_APP_ID: u16 = 0;

/// Service carrying the firmware-update characteristic.
pub const REMOTE_SERVICE_UUID: Uuid = Uuid::Uuid16(0x00FF);

/// Notify characteristic inside [`REMOTE_SERVICE_UUID`].
pub const REMOTE_NOTIFY_CHAR_UUID: Uuid = Uuid::Uuid16(0xFF01);

/// Client Characteristic Configuration descriptor.
pub const CCCD_UUID: Uuid = Uuid::Uuid16(0x2902);

/// CCCD value that enables notifications.
pub const CCCD_NOTIFY_ENABLE: [u8; 2] = [0x01, 0x00];

/// Length of the test payload written once notifications are enabled.
pub const PROBE_PAYLOAD_LEN: usize = 35;

/// Local ATT MTU requested from the controller.
pub const LOCAL_MTU: u16 = 500;

/// Upper bound on attribute lookup results held at once.
pub const MAX_ATTR_RESULTS: usize = 8;

/// Max notification value carried in a GATT client event.
pub const NOTIFY_MAX_LEN: usize = 512;

// WiFi

/// Max bytes of the MQTT client identifier (base name + decimal octet).
pub const CLIENT_ID_MAX_LEN: usize = 32;

// MQTT

/// Default broker port when `MQTT_PORT` is unset.
pub const MQTT_DEFAULT_PORT: u16 = 1883;

/// Keepalive interval (seconds).
pub const MQTT_KEEPALIVE_SECS: u16 = 120;

/// Resume the previous broker session on reconnect.
pub const MQTT_CLEAN_SESSION: bool = false;

/// Last-will topic and message.
pub const LWT_TOPIC: &str = "/lwt";
pub const LWT_MESSAGE: &[u8] = b"offline";

/// Control topic carrying firmware-update payloads.
pub const FOTA_TOPIC: &str = "/fota/firmware";

/// Topic receiving beacon telemetry.
pub const TELEMETRY_TOPIC: &str = "/test";

/// Max topic length accepted from the broker.
pub const MAX_TOPIC_LEN: usize = 64;

/// Max control payload accepted from the broker (excluding the terminator).
pub const MAX_CONTROL_PAYLOAD_LEN: usize = 256;

/// Max inbound chunk the transport forwards to the dispatcher.
pub const MAX_INBOUND_LEN: usize = 512;

/// Keys, punctuation and fixed-width values of one telemetry message.
pub const TELEMETRY_FIXED_LEN: usize = 272;

/// Longest JSON escape of one byte (`\u00XX`).
pub const JSON_ESCAPE_MAX: usize = 6;

/// Telemetry JSON buffer: the fixed part plus a client id and a local name
/// made entirely of control characters.
pub const TELEMETRY_MAX_LEN: usize =
    TELEMETRY_FIXED_LEN + (CLIENT_ID_MAX_LEN + NAME_MAX_LEN) * JSON_ESCAPE_MAX;

/// Site settings baked in at build time.
///
/// Every field falls back to a harmless default so host builds and tests
/// never need the environment populated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    pub wifi_ssid: &'static str,
    pub wifi_password: &'static str,
    pub mqtt_host: &'static str,
    pub mqtt_port: u16,
    pub mqtt_username: &'static str,
    pub mqtt_password: &'static str,
    /// Base device name, also the prefix of the MQTT client id.
    pub esp_name: &'static str,
    /// `AA:BB:CC:DD:EE:FF` address of the firmware-update peer. Empty
    /// leaves the GATT client idle.
    pub gatt_peer: &'static str,
}

impl Settings {
    pub const fn from_env() -> Self {
        Self {
            wifi_ssid: env_or(option_env!("WIFI_SSID"), ""),
            wifi_password: env_or(option_env!("WIFI_PASSWORD"), ""),
            mqtt_host: env_or(option_env!("MQTT_HOST"), "192.168.1.10"),
            mqtt_port: match option_env!("MQTT_PORT") {
                Some(port) => parse_port(port),
                None => MQTT_DEFAULT_PORT,
            },
            mqtt_username: env_or(option_env!("MQTT_USERNAME"), ""),
            mqtt_password: env_or(option_env!("MQTT_PASSWORD"), ""),
            esp_name: env_or(option_env!("ESP_NAME"), "esp32-tracker"),
            gatt_peer: env_or(option_env!("GATT_PEER"), ""),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

const fn env_or(value: Option<&'static str>, fallback: &'static str) -> &'static str {
    match value {
        Some(v) => v,
        None => fallback,
    }
}

/// Parse a decimal port at compile time; anything malformed yields the
/// default port.
const fn parse_port(s: &str) -> u16 {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return MQTT_DEFAULT_PORT;
    }
    let mut value: u32 = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            return MQTT_DEFAULT_PORT;
        }
        value = value * 10 + (b - b'0') as u32;
        if value > u16::MAX as u32 {
            return MQTT_DEFAULT_PORT;
        }
        i += 1;
    }
    value as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("1883"), 1883);
        assert_eq!(parse_port("8883"), 8883);
        assert_eq!(parse_port("65535"), 65535);
        assert_eq!(parse_port("65536"), MQTT_DEFAULT_PORT);
        assert_eq!(parse_port(""), MQTT_DEFAULT_PORT);
        assert_eq!(parse_port("18x3"), MQTT_DEFAULT_PORT);
    }

    #[test]
    fn test_scan_window_fits_interval() {
        assert!(SCAN_WINDOW <= SCAN_INTERVAL);
        assert!((SCAN_DURATION_SECS as u64) * 1000 < SCAN_PERIOD_MS);
    }

    #[test]
    fn test_settings_defaults_are_usable() {
        let s = Settings::default();
        assert!(!s.esp_name.is_empty());
        assert!(s.esp_name.len() < CLIENT_ID_MAX_LEN);
        assert!(s.mqtt_port > 0);
    }

    #[test]
    fn test_telemetry_bound_covers_worst_case() {
        assert_eq!(TELEMETRY_MAX_LEN, 650);
        assert!(TELEMETRY_MAX_LEN + MAX_TOPIC_LEN < 1024);
    }
}
