//! Network side: WiFi association and the MQTT session.
//!
//! Both managers are pure state machines returning commands. The firmware
//! binary carries them out through [`NetworkAdapter`] and
//! [`MessagingTransport`].

pub mod mqtt;
pub mod wifi;

use crate::error::Error;

pub use mqtt::{QoS, SessionConfig, SessionManager};
pub use wifi::{ClientId, WifiManager};

/// Station control.
pub trait NetworkAdapter {
    fn connect(&mut self) -> Result<(), Error>;

    fn disconnect(&mut self) -> Result<(), Error>;
}

/// Reconnecting MQTT client. Every call only queues the request.
pub trait MessagingTransport {
    fn start(&mut self, config: &SessionConfig) -> Result<(), Error>;

    fn stop(&mut self) -> Result<(), Error>;

    fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Error>;

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), Error>;
}
