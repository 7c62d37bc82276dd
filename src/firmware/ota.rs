//! Firmware-update hand-off.
//!
//! Control payloads are copied out of the dispatcher and resolved to an
//! image location on a task of their own. Fetching and flashing the image
//! belongs to the bootloader's OTA partition support.

use core::ffi::CStr;

use defmt::{error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use ble_tracker::config::MAX_CONTROL_PAYLOAD_LEN;
use ble_tracker::fota::{FirmwareUpdate, ImageSource};

/// NUL-terminated copy of one control payload.
type Payload = Vec<u8, { MAX_CONTROL_PAYLOAD_LEN + 1 }>;

static UPDATES: Channel<CriticalSectionRawMutex, Payload, 1> = Channel::new();

/// [`FirmwareUpdate`] handed to the tracker.
pub struct OtaHandoff;

impl FirmwareUpdate for OtaHandoff {
    fn apply(&mut self, payload: &CStr) {
        let Ok(copy) = Payload::from_slice(payload.to_bytes_with_nul()) else {
            error!("ota: payload of {} bytes too large", payload.count_bytes());
            return;
        };
        if UPDATES.try_send(copy).is_err() {
            warn!("ota: update already pending, payload dropped");
        }
    }
}

#[embassy_executor::task]
pub async fn ota_task() -> ! {
    loop {
        let payload = UPDATES.receive().await;
        let Ok(payload) = CStr::from_bytes_with_nul(&payload) else {
            continue;
        };
        match ImageSource::parse(payload) {
            Ok(source) => info!(
                "ota: image at host {} port {} path {}",
                source.host, source.port, source.path
            ),
            Err(e) => error!("ota: unusable payload {}", e),
        }
    }
}
