//! Telemetry wire message - one JSON object per decoded advertisement.
//!
//! Every value is a string. Counts and lengths are decimal, beacon bytes
//! are upper-case hex, the proximity UUID uses 8-4-4-4-12 grouping and the
//! device address is 12 hex digits without separators.

use core::fmt::Write;

use heapless::String;
use serde::Serialize;

use crate::ble::adv_parser::BeaconRecord;
use crate::config::TELEMETRY_MAX_LEN;
use crate::error::Error;

pub type TelemetryPayload = String<TELEMETRY_MAX_LEN>;

#[derive(Serialize)]
struct WireMessage<'a> {
    #[serde(rename = "EspName")]
    esp_name: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "NameLen")]
    name_len: &'a str,
    #[serde(rename = "RSSI")]
    rssi: &'a str,
    #[serde(rename = "Length")]
    length: &'a str,
    #[serde(rename = "Type")]
    ad_type: &'a str,
    #[serde(rename = "ManufacturerID")]
    manufacturer_id: &'a str,
    #[serde(rename = "Subtype")]
    subtype: &'a str,
    #[serde(rename = "SubLength")]
    sub_length: &'a str,
    #[serde(rename = "UUID")]
    uuid: &'a str,
    #[serde(rename = "Major")]
    major: &'a str,
    #[serde(rename = "Minor")]
    minor: &'a str,
    bda: &'a str,
    #[serde(rename = "DeviceType")]
    device_type: &'a str,
    #[serde(rename = "AdvDataLen")]
    adv_data_len: &'a str,
}

/// Render `record` as the wire message, tagged with this device's name.
pub fn format(esp_name: &str, record: &BeaconRecord) -> Result<TelemetryPayload, Error> {
    let frame = record.beacon_or_zeroed();

    let name_len = decimal(record.name.len())?;
    let rssi = decimal(record.rssi)?;
    let length = decimal(frame.length)?;
    let ad_type = hex::<2>(&[frame.ad_type])?;
    let manufacturer_id = hex::<4>(&frame.manufacturer_id)?;
    let subtype = hex::<2>(&[frame.subtype])?;
    let sub_length = hex::<2>(&[frame.sub_length])?;
    let uuid = uuid_string(&frame.proximity_uuid)?;
    let major = hex::<4>(&frame.major)?;
    let minor = hex::<4>(&frame.minor)?;
    let bda = hex::<12>(&record.bda)?;
    let device_type = decimal(record.dev_type)?;
    let adv_data_len = decimal(record.adv_data_len)?;

    let msg = WireMessage {
        esp_name,
        name: record.name.as_str_lossy(),
        name_len: &name_len,
        rssi: &rssi,
        length: &length,
        ad_type: &ad_type,
        manufacturer_id: &manufacturer_id,
        subtype: &subtype,
        sub_length: &sub_length,
        uuid: &uuid,
        major: &major,
        minor: &minor,
        bda: &bda,
        device_type: &device_type,
        adv_data_len: &adv_data_len,
    };
    serde_json_core::to_string(&msg).map_err(|_| Error::BufferOverflow)
}

fn decimal(value: impl core::fmt::Display) -> Result<String<8>, Error> {
    let mut s = String::new();
    write!(s, "{}", value).map_err(|_| Error::BufferOverflow)?;
    Ok(s)
}

fn hex<const N: usize>(bytes: &[u8]) -> Result<String<N>, Error> {
    let mut s = String::new();
    for b in bytes {
        write!(s, "{:02X}", b).map_err(|_| Error::BufferOverflow)?;
    }
    Ok(s)
}

fn uuid_string(bytes: &[u8; 16]) -> Result<String<36>, Error> {
    let mut s = String::new();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            s.push('-').map_err(|_| Error::BufferOverflow)?;
        }
        write!(s, "{:02X}", b).map_err(|_| Error::BufferOverflow)?;
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adv_parser::{decode, BeaconFrame, LocalName};

    fn ibeacon_record() -> BeaconRecord {
        BeaconRecord {
            bda: [0xAC, 0x23, 0x3F, 0x0A, 0x0B, 0x0C],
            name: LocalName::from_bytes(b"Tag1"),
            rssi: -67,
            adv_data_len: 30,
            dev_type: 1,
            beacon: Some(BeaconFrame {
                length: 0x1A,
                ad_type: 0xFF,
                manufacturer_id: [0x4C, 0x00],
                subtype: 0x02,
                sub_length: 0x15,
                proximity_uuid: [
                    0xE2, 0xC5, 0x6D, 0xB5, 0xDF, 0xFB, 0x48, 0xD2, 0xB0, 0x60, 0xD0, 0xF5, 0xA7,
                    0x10, 0x96, 0xE0,
                ],
                major: [0x00, 0x01],
                minor: [0x00, 0x2A],
            }),
        }
    }

    #[test]
    fn test_full_message() {
        let out = format("tracker42", &ibeacon_record()).unwrap();
        assert_eq!(
            out.as_str(),
            concat!(
                r#"{"EspName":"tracker42","Name":"Tag1","NameLen":"4","RSSI":"-67","#,
                r#""Length":"26","Type":"FF","ManufacturerID":"4C00","Subtype":"02","#,
                r#""SubLength":"15","UUID":"E2C56DB5-DFFB-48D2-B060-D0F5A71096E0","#,
                r#""Major":"0001","Minor":"002A","bda":"AC233F0A0B0C","#,
                r#""DeviceType":"1","AdvDataLen":"30"}"#
            )
        );
    }

    #[test]
    fn test_absent_beacon_renders_zeros() {
        let rec = decode(&[0x02, 0x01, 0x06], 3, [0; 6], -90);
        let out = format("t", &rec).unwrap();
        assert!(out.contains(r#""Name":"""#));
        assert!(out.contains(r#""NameLen":"0""#));
        assert!(out.contains(r#""Length":"0""#));
        assert!(out.contains(r#""UUID":"00000000-0000-0000-0000-000000000000""#));
        assert!(out.contains(r#""Major":"0000""#));
        assert!(out.contains(r#""AdvDataLen":"3""#));
    }

    #[test]
    fn test_name_is_escaped() {
        let mut rec = ibeacon_record();
        rec.name = LocalName::from_bytes(b"a\"b\\c");
        let out = format("t", &rec).unwrap();
        assert!(out.contains(r#""Name":"a\"b\\c""#));
    }

    #[test]
    fn test_worst_case_fits() {
        let mut rec = ibeacon_record();
        rec.rssi = -128;
        rec.adv_data_len = 255;
        rec.dev_type = 255;
        rec.name = LocalName::from_bytes(&[0x01; 31]);
        let esp_name = "abcdefghijklmnopqrstuvwxyz012345";
        assert!(format(esp_name, &rec).is_ok());
    }

    #[test]
    fn test_escaped_device_name_fits() {
        let mut rec = ibeacon_record();
        rec.rssi = -128;
        rec.name = LocalName::from_bytes(&[0x01; 31]);
        let esp_name = core::str::from_utf8(&[0x02; 32]).unwrap();
        let out = format(esp_name, &rec).unwrap();
        assert!(out.len() > 512);
        assert!(out.starts_with(r#"{"EspName":"\u0002\u0002"#));
    }

    #[test]
    fn test_uuid_grouping() {
        let bytes: [u8; 16] = core::array::from_fn(|i| i as u8);
        assert_eq!(
            uuid_string(&bytes).unwrap().as_str(),
            "00010203-0405-0607-0809-0A0B0C0D0E0F"
        );
    }
}
