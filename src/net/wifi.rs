//! WiFi association manager.
//!
//! The station does not re-associate on its own, so every disconnect is
//! answered with a fresh connect request. Acquiring an address raises the
//! link flag and starts the MQTT session under a client id derived from
//! the address.

use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use heapless::{String, Vec};

use crate::config::CLIENT_ID_MAX_LEN;
use crate::connectivity::Connectivity;

pub type ClientId = String<CLIENT_ID_MAX_LEN>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiState {
    Disconnected,
    Associating,
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiEvent {
    StaStart,
    /// IPv4 address in network byte order.
    GotIp { ip: [u8; 4] },
    StaDisconnected { reason: u8 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiCommand {
    /// Ask the station to (re)associate.
    Connect,
    StartSession { client_id: ClientId },
    StopSession,
}

/// Client id for this device: `base` followed by the decimal last octet.
///
/// Always derived from the untouched base name, so repeated address grants
/// never stack suffixes. The base is cut short if the suffix would not fit.
pub fn derive_client_id(base: &str, last_octet: u8) -> ClientId {
    let mut suffix: String<3> = String::new();
    // Three digits always fit.
    let _ = write!(suffix, "{}", last_octet);

    let room = CLIENT_ID_MAX_LEN - suffix.len();
    let mut cut = base.len().min(room);
    while !base.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut id = ClientId::new();
    let _ = id.push_str(&base[..cut]);
    let _ = id.push_str(&suffix);
    id
}

pub struct WifiManager {
    state: WifiState,
    base_name: &'static str,
    client_id: Option<ClientId>,
    reconnects: u32,
}

impl WifiManager {
    pub const fn new(base_name: &'static str) -> Self {
        Self {
            state: WifiState::Disconnected,
            base_name,
            client_id: None,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> WifiState {
        self.state
    }

    pub fn base_name(&self) -> &'static str {
        self.base_name
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Connect requests issued after a disconnect.
    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn handle<M: RawMutex>(
        &mut self,
        event: WifiEvent,
        connectivity: &Connectivity<M>,
    ) -> Vec<WifiCommand, 2> {
        let mut out = Vec::new();
        match event {
            WifiEvent::StaStart => {
                warn!("wifi: station started");
                self.state = WifiState::Associating;
                let _ = out.push(WifiCommand::Connect);
            }
            WifiEvent::GotIp { ip } => {
                warn!("wifi: connected, ip .{}", ip[3]);
                connectivity.set_link_up();
                let client_id = derive_client_id(self.base_name, ip[3]);
                self.client_id = Some(client_id.clone());
                self.state = WifiState::Connected;
                let _ = out.push(WifiCommand::StartSession { client_id });
            }
            WifiEvent::StaDisconnected { reason } => {
                warn!("wifi: disconnected, reason {}", reason);
                connectivity.clear_all();
                self.state = WifiState::Associating;
                self.reconnects = self.reconnects.wrapping_add(1);
                let _ = out.push(WifiCommand::StopSession);
                let _ = out.push(WifiCommand::Connect);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    #[test]
    fn test_client_id_appends_octet() {
        assert_eq!(derive_client_id("tracker", 42).as_str(), "tracker42");
        assert_eq!(derive_client_id("tracker", 0).as_str(), "tracker0");
        assert_eq!(derive_client_id("tracker", 255).as_str(), "tracker255");
    }

    #[test]
    fn test_client_id_truncates_long_base() {
        let base = "a-very-long-device-name-that-keeps-going";
        let id = derive_client_id(base, 200);
        assert_eq!(id.len(), CLIENT_ID_MAX_LEN);
        assert!(id.ends_with("200"));
        assert!(base.starts_with(&id[..CLIENT_ID_MAX_LEN - 3]));
    }

    #[test]
    fn test_client_id_respects_char_boundary() {
        let base = "ééééééééééééééééé"; // 34 bytes
        let id = derive_client_id(base, 7);
        assert!(id.len() <= CLIENT_ID_MAX_LEN);
        assert!(id.ends_with('7'));
    }

    #[test]
    fn test_start_connects() {
        let c = Connectivity::<CriticalSectionRawMutex>::new();
        let mut w = WifiManager::new("tracker");
        let out = w.handle(WifiEvent::StaStart, &c);
        assert_eq!(out.as_slice(), &[WifiCommand::Connect]);
        assert_eq!(w.state(), WifiState::Associating);
    }

    #[test]
    fn test_got_ip_sets_link_and_starts_session() {
        let c = Connectivity::<CriticalSectionRawMutex>::new();
        let mut w = WifiManager::new("tracker");
        w.handle(WifiEvent::StaStart, &c);
        let out = w.handle(WifiEvent::GotIp { ip: [192, 168, 1, 37] }, &c);
        assert!(c.flags().link_up());
        assert!(!c.flags().session_up());
        assert_eq!(w.state(), WifiState::Connected);
        assert_eq!(w.client_id(), Some("tracker37"));
        assert_eq!(
            out.as_slice(),
            &[WifiCommand::StartSession { client_id: derive_client_id("tracker", 37) }]
        );
    }

    #[test]
    fn test_repeated_ip_grants_do_not_stack() {
        let c = Connectivity::<CriticalSectionRawMutex>::new();
        let mut w = WifiManager::new("tracker");
        w.handle(WifiEvent::GotIp { ip: [10, 0, 0, 5] }, &c);
        w.handle(WifiEvent::StaDisconnected { reason: 8 }, &c);
        w.handle(WifiEvent::GotIp { ip: [10, 0, 0, 6] }, &c);
        assert_eq!(w.client_id(), Some("tracker6"));
    }

    #[test]
    fn test_disconnect_clears_flags_and_reconnects() {
        let c = Connectivity::<CriticalSectionRawMutex>::new();
        let mut w = WifiManager::new("tracker");
        w.handle(WifiEvent::GotIp { ip: [10, 0, 0, 5] }, &c);
        c.set_session_up();
        assert!(c.flags().is_ready());

        let out = w.handle(WifiEvent::StaDisconnected { reason: 201 }, &c);
        assert!(!c.flags().link_up());
        assert!(!c.flags().session_up());
        assert_eq!(w.state(), WifiState::Associating);
        assert_eq!(out.as_slice(), &[WifiCommand::StopSession, WifiCommand::Connect]);
        assert_eq!(w.reconnects(), 1);
    }
}
