//! Unified error type for ble-tracker.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Derives `defmt::Format` for on-target logging when the `defmt` feature
//! is enabled.

/// Controller status code attached to GAP/GATT completion events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(pub u8);

impl Status {
    pub const SUCCESS: Status = Status(0x00);
    /// Generic failure reported by the controller.
    pub const ERROR: Status = Status(0x85);

    pub const fn is_ok(self) -> bool {
        self.0 == Self::SUCCESS.0
    }
}

/// Top-level error type used across the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE
    /// The BLE controller or host stack rejected a request.
    Ble(BleError),

    // Network
    /// The WiFi driver rejected a request.
    Wifi,

    /// The MQTT client failed to start, subscribe or publish.
    Mqtt,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,

    /// Operation timed out.
    Timeout,

    /// An inbound payload was malformed (interior NUL, over its bound).
    InvalidPayload,
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// Raw status returned by the controller.
    Status(Status),
    /// A lookup needed more result slots than we hold.
    NoResources,
    /// Scan could not be configured or started.
    ScanFailed,
    /// No connection exists for the request.
    NotConnected,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}

impl From<Status> for BleError {
    fn from(s: Status) -> Self {
        BleError::Status(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        assert!(Status::SUCCESS.is_ok());
        assert!(!Status::ERROR.is_ok());
        assert!(!Status(0x01).is_ok());
    }

    #[test]
    fn test_ble_error_conversion() {
        let e: Error = BleError::Status(Status(0x0A)).into();
        assert_eq!(e, Error::Ble(BleError::Status(Status(0x0A))));
        let b: BleError = Status::ERROR.into();
        assert_eq!(b, BleError::Status(Status::ERROR));
    }
}
