//! GATT client - connection, service discovery and notification subscription
//! for the firmware-update peer.
//!
//! Each registered application profile is a [`PeerProfile`] state machine:
//!
//! ```text
//! Unregistered -> Registered -> Connecting -> MtuNegotiating -> Discovering
//!   -> CharacteristicLookup -> DescriptorLookup -> SubscribingNotify -> Ready
//! ```
//!
//! A disconnect from any connected state drops back to `Registered` and
//! clears everything tied to that connection. Events are routed to the
//! profiles by [`ProfileTable::dispatch`]; requests that complete later come
//! back as [`GattCommand`]s for the dispatcher to issue, while the attribute
//! cache lookups run synchronously through [`AttributeCache`].

use heapless::Vec;

use crate::ble::{BdAddr, GattIf, HandleRange, Uuid};
use crate::config::{
    CCCD_NOTIFY_ENABLE, CCCD_UUID, MAX_ATTR_RESULTS, NOTIFY_MAX_LEN, PROBE_PAYLOAD_LEN,
    REMOTE_NOTIFY_CHAR_UUID, REMOTE_SERVICE_UUID,
};
use crate::error::{BleError, Status};

/// Handle value meaning "no characteristic" in attribute-count queries.
pub const INVALID_HANDLE: u16 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttrKind {
    Characteristic,
    Descriptor,
}

/// Characteristic property bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharProperties(pub u8);

impl CharProperties {
    pub const READ: u8 = 0x02;
    pub const WRITE_NO_RSP: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;

    pub const fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharElement {
    pub handle: u16,
    pub uuid: Uuid,
    pub properties: CharProperties,
}

impl CharElement {
    pub const EMPTY: CharElement = CharElement {
        handle: INVALID_HANDLE,
        uuid: Uuid::Uuid16(0),
        properties: CharProperties(0),
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DescrElement {
    pub handle: u16,
    pub uuid: Uuid,
}

impl DescrElement {
    pub const EMPTY: DescrElement = DescrElement {
        handle: INVALID_HANDLE,
        uuid: Uuid::Uuid16(0),
    };
}

/// Synchronous queries against the host stack's attribute cache of a
/// connected peer.
pub trait AttributeCache {
    /// Number of attributes of `kind` in `range` (characteristics) or under
    /// `char_handle` (descriptors).
    fn attribute_count(
        &mut self,
        gattc_if: GattIf,
        conn_id: u16,
        kind: AttrKind,
        range: HandleRange,
        char_handle: u16,
    ) -> Result<u16, BleError>;

    /// Fill `out` with characteristics matching `uuid`; returns how many.
    fn characteristics_by_uuid(
        &mut self,
        gattc_if: GattIf,
        conn_id: u16,
        range: HandleRange,
        uuid: Uuid,
        out: &mut [CharElement],
    ) -> Result<usize, BleError>;

    /// Fill `out` with descriptors of `char_handle` matching `uuid`.
    fn descriptors_by_char_handle(
        &mut self,
        gattc_if: GattIf,
        conn_id: u16,
        char_handle: u16,
        uuid: Uuid,
        out: &mut [DescrElement],
    ) -> Result<usize, BleError>;
}

/// GATT client events, tagged on delivery with the interface they belong to.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattcEvent {
    Register {
        status: Status,
        app_id: u16,
    },
    Open {
        status: Status,
        conn_id: u16,
        remote: BdAddr,
        mtu: u16,
    },
    Connect {
        conn_id: u16,
        remote: BdAddr,
    },
    ConfigMtu {
        status: Status,
        conn_id: u16,
        mtu: u16,
    },
    SearchResult {
        conn_id: u16,
        uuid: Uuid,
        range: HandleRange,
    },
    SearchComplete {
        status: Status,
        conn_id: u16,
    },
    RegisterForNotify {
        status: Status,
        handle: u16,
    },
    Notify {
        conn_id: u16,
        remote: BdAddr,
        handle: u16,
        is_notify: bool,
        value: Vec<u8, NOTIFY_MAX_LEN>,
    },
    WriteDescriptor {
        status: Status,
        conn_id: u16,
        handle: u16,
    },
    WriteCharacteristic {
        status: Status,
        conn_id: u16,
        handle: u16,
    },
    ServiceChanged {
        remote: BdAddr,
    },
    Disconnect {
        conn_id: u16,
        remote: BdAddr,
        reason: u16,
    },
}

/// Requests a profile asks the dispatcher to issue.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattCommand {
    SetScanParams,
    SendMtuRequest {
        conn_id: u16,
    },
    SearchService {
        conn_id: u16,
        filter: Uuid,
    },
    RegisterForNotify {
        remote: BdAddr,
        char_handle: u16,
    },
    WriteDescriptor {
        conn_id: u16,
        handle: u16,
        value: [u8; 2],
    },
    WriteCharacteristic {
        conn_id: u16,
        handle: u16,
        value: [u8; PROBE_PAYLOAD_LEN],
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GattState {
    Unregistered,
    Registered,
    Connecting,
    MtuNegotiating,
    Discovering,
    /// Notify characteristic found, register-for-notify in flight.
    CharacteristicLookup,
    DescriptorLookup,
    /// CCCD write in flight.
    SubscribingNotify,
    Ready,
}

/// Test payload written to the notify characteristic once subscribed.
pub fn probe_payload() -> [u8; PROBE_PAYLOAD_LEN] {
    core::array::from_fn(|i| (i % 256) as u8)
}

/// One GATT client application profile.
pub struct PeerProfile {
    app_id: u16,
    gattc_if: GattIf,
    state: GattState,
    conn_id: Option<u16>,
    /// Kept after a disconnect; only meaningful while connected.
    remote_bda: Option<BdAddr>,
    server_found: bool,
    service_range: Option<HandleRange>,
    char_handle: Option<u16>,
    mtu: u16,
    notifications: u32,
}

impl PeerProfile {
    pub const fn new(app_id: u16) -> Self {
        Self {
            app_id,
            gattc_if: GattIf::NONE,
            state: GattState::Unregistered,
            conn_id: None,
            remote_bda: None,
            server_found: false,
            service_range: None,
            char_handle: None,
            mtu: 23,
            notifications: 0,
        }
    }

    pub fn app_id(&self) -> u16 {
        self.app_id
    }

    pub fn gattc_if(&self) -> GattIf {
        self.gattc_if
    }

    pub fn state(&self) -> GattState {
        self.state
    }

    pub fn conn_id(&self) -> Option<u16> {
        self.conn_id
    }

    pub fn remote_bda(&self) -> Option<BdAddr> {
        self.remote_bda
    }

    pub fn server_found(&self) -> bool {
        self.server_found
    }

    pub fn service_range(&self) -> Option<HandleRange> {
        self.service_range
    }

    pub fn char_handle(&self) -> Option<u16> {
        self.char_handle
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn notifications(&self) -> u32 {
        self.notifications
    }

    /// Advance on one event. At most one follow-up request per event.
    pub fn handle<C: AttributeCache>(
        &mut self,
        event: &GattcEvent,
        cache: &mut C,
    ) -> Option<GattCommand> {
        if self.state == GattState::Unregistered && !matches!(event, GattcEvent::Register { .. }) {
            return None;
        }

        match event {
            GattcEvent::Register { .. } => {
                info!("gattc: profile {} registered, if {}", self.app_id, self.gattc_if.0);
                self.state = GattState::Registered;
                Some(GattCommand::SetScanParams)
            }
            GattcEvent::Open { status, conn_id, mtu, .. } => {
                if !status.is_ok() {
                    error!("gattc: open failed, status {}", status.0);
                    return None;
                }
                info!("gattc: open conn {} mtu {}", conn_id, mtu);
                if self.state == GattState::Registered {
                    self.state = GattState::Connecting;
                }
                None
            }
            GattcEvent::Connect { conn_id, remote } => {
                info!("gattc: connected conn {} to {:x}", conn_id, remote);
                self.reset_connection();
                self.conn_id = Some(*conn_id);
                self.remote_bda = Some(*remote);
                self.state = GattState::MtuNegotiating;
                Some(GattCommand::SendMtuRequest { conn_id: *conn_id })
            }
            GattcEvent::ConfigMtu { status, conn_id, mtu } => self.on_config_mtu(*status, *conn_id, *mtu),
            GattcEvent::SearchResult { conn_id, uuid, range } => {
                if self.state == GattState::Discovering
                    && self.is_current(*conn_id)
                    && *uuid == REMOTE_SERVICE_UUID
                {
                    info!("gattc: service found, handles {}..{}", range.start, range.end);
                    self.server_found = true;
                    self.service_range = Some(*range);
                }
                None
            }
            GattcEvent::SearchComplete { status, conn_id } => {
                if self.state != GattState::Discovering || !self.is_current(*conn_id) {
                    return None;
                }
                if !status.is_ok() {
                    error!("gattc: service search failed, status {}", status.0);
                    return None;
                }
                if !self.server_found {
                    warn!("gattc: firmware-update service not found");
                    return None;
                }
                self.lookup_characteristic(cache)
            }
            GattcEvent::RegisterForNotify { status, handle } => {
                if self.state != GattState::CharacteristicLookup {
                    return None;
                }
                if !status.is_ok() {
                    error!("gattc: register for notify failed, status {}", status.0);
                    return None;
                }
                if self.char_handle != Some(*handle) {
                    warn!("gattc: notify registration for unknown handle {}", handle);
                    return None;
                }
                self.state = GattState::DescriptorLookup;
                self.lookup_cccd(cache)
            }
            GattcEvent::WriteDescriptor { status, conn_id, .. } => {
                if self.state != GattState::SubscribingNotify || !self.is_current(*conn_id) {
                    return None;
                }
                if !status.is_ok() {
                    error!("gattc: descriptor write failed, status {}", status.0);
                    return None;
                }
                let handle = self.char_handle?;
                info!("gattc: notifications enabled");
                self.state = GattState::Ready;
                Some(GattCommand::WriteCharacteristic {
                    conn_id: *conn_id,
                    handle,
                    value: probe_payload(),
                })
            }
            GattcEvent::WriteCharacteristic { status, .. } => {
                if status.is_ok() {
                    info!("gattc: characteristic write done");
                } else {
                    error!("gattc: characteristic write failed, status {}", status.0);
                }
                None
            }
            GattcEvent::Notify { handle, is_notify, value, .. } => {
                self.notifications = self.notifications.wrapping_add(1);
                if *is_notify {
                    info!("gattc: notification on {}, {} bytes", handle, value.len());
                } else {
                    info!("gattc: indication on {}, {} bytes", handle, value.len());
                }
                debug!("gattc: value {:x}", value);
                None
            }
            GattcEvent::ServiceChanged { remote } => {
                info!("gattc: service changed on {:x}", remote);
                None
            }
            GattcEvent::Disconnect { conn_id, reason, .. } => {
                if self.conn_id.is_some_and(|current| current != *conn_id) {
                    warn!("gattc: disconnect for stale conn {} ignored", conn_id);
                    return None;
                }
                info!("gattc: disconnected conn {}, reason {:x}", conn_id, reason);
                self.reset_connection();
                self.state = GattState::Registered;
                None
            }
        }
    }

    fn on_config_mtu(&mut self, status: Status, conn_id: u16, mtu: u16) -> Option<GattCommand> {
        if !self.is_current(conn_id) {
            return None;
        }
        if status.is_ok() {
            self.mtu = mtu;
            info!("gattc: mtu {}", mtu);
        } else {
            error!("gattc: config mtu failed, status {}", status.0);
        }
        if self.state != GattState::MtuNegotiating {
            return None;
        }
        // Discovery still runs on the default MTU.
        self.server_found = false;
        self.service_range = None;
        self.char_handle = None;
        self.state = GattState::Discovering;
        Some(GattCommand::SearchService {
            conn_id,
            filter: REMOTE_SERVICE_UUID,
        })
    }

    fn lookup_characteristic<C: AttributeCache>(&mut self, cache: &mut C) -> Option<GattCommand> {
        let conn_id = self.conn_id?;
        let range = self.service_range?;
        let remote = self.remote_bda?;

        let count = match cache.attribute_count(
            self.gattc_if,
            conn_id,
            AttrKind::Characteristic,
            range,
            INVALID_HANDLE,
        ) {
            Ok(count) => count as usize,
            Err(e) => {
                error!("gattc: characteristic count failed {}", e);
                return None;
            }
        };
        if count == 0 {
            error!("gattc: no characteristic found");
            return None;
        }
        if count > MAX_ATTR_RESULTS {
            error!("gattc: {} characteristics exceed result buffer", count);
            return None;
        }

        let mut found = [CharElement::EMPTY; MAX_ATTR_RESULTS];
        let n = match cache.characteristics_by_uuid(
            self.gattc_if,
            conn_id,
            range,
            REMOTE_NOTIFY_CHAR_UUID,
            &mut found[..count],
        ) {
            Ok(n) => n.min(count),
            Err(e) => {
                error!("gattc: characteristic lookup failed {}", e);
                return None;
            }
        };

        // Only the first match is used.
        let Some(ch) = found[..n].first().copied() else {
            warn!("gattc: notify characteristic not found");
            return None;
        };
        if !ch.properties.contains(CharProperties::NOTIFY) {
            warn!("gattc: characteristic {} cannot notify", ch.handle);
            return None;
        }

        self.char_handle = Some(ch.handle);
        self.state = GattState::CharacteristicLookup;
        Some(GattCommand::RegisterForNotify {
            remote,
            char_handle: ch.handle,
        })
    }

    fn lookup_cccd<C: AttributeCache>(&mut self, cache: &mut C) -> Option<GattCommand> {
        let conn_id = self.conn_id?;
        let range = self.service_range?;
        let char_handle = self.char_handle?;

        let count = match cache.attribute_count(
            self.gattc_if,
            conn_id,
            AttrKind::Descriptor,
            range,
            char_handle,
        ) {
            Ok(count) => count as usize,
            Err(e) => {
                error!("gattc: descriptor count failed {}", e);
                return None;
            }
        };
        if count == 0 {
            error!("gattc: no descriptor found");
            return None;
        }
        if count > MAX_ATTR_RESULTS {
            error!("gattc: {} descriptors exceed result buffer", count);
            return None;
        }

        let mut found = [DescrElement::EMPTY; MAX_ATTR_RESULTS];
        let n = match cache.descriptors_by_char_handle(
            self.gattc_if,
            conn_id,
            char_handle,
            CCCD_UUID,
            &mut found[..count],
        ) {
            Ok(n) => n.min(count),
            Err(e) => {
                error!("gattc: descriptor lookup failed {}", e);
                return None;
            }
        };

        let Some(descr) = found[..n].first().copied() else {
            warn!("gattc: CCCD not found");
            return None;
        };
        if descr.uuid != CCCD_UUID {
            warn!("gattc: descriptor {} is not a CCCD", descr.handle);
            return None;
        }

        self.state = GattState::SubscribingNotify;
        Some(GattCommand::WriteDescriptor {
            conn_id,
            handle: descr.handle,
            value: CCCD_NOTIFY_ENABLE,
        })
    }

    fn is_current(&self, conn_id: u16) -> bool {
        self.conn_id == Some(conn_id)
    }

    fn reset_connection(&mut self) {
        self.conn_id = None;
        self.server_found = false;
        self.service_range = None;
        self.char_handle = None;
    }
}

/// Registered GATT client profiles, indexed by application id.
pub struct ProfileTable<const N: usize> {
    profiles: [PeerProfile; N],
}

impl<const N: usize> ProfileTable<N> {
    pub fn new() -> Self {
        Self {
            profiles: core::array::from_fn(|i| PeerProfile::new(i as u16)),
        }
    }

    pub fn profile(&self, app_id: u16) -> Option<&PeerProfile> {
        self.profiles.get(app_id as usize)
    }

    /// Route one event.
    ///
    /// A successful registration binds `gattc_if` to the profile with the
    /// matching app id; a failed one is logged and goes nowhere. Every other
    /// event reaches each profile bound to `gattc_if`, or every profile when
    /// it is [`GattIf::NONE`].
    pub fn dispatch<C: AttributeCache>(
        &mut self,
        gattc_if: GattIf,
        event: &GattcEvent,
        cache: &mut C,
    ) -> Vec<(GattIf, GattCommand), N> {
        let mut out = Vec::new();

        if let GattcEvent::Register { status, app_id } = event {
            if !status.is_ok() {
                error!("gattc: app {} registration failed, status {}", app_id, status.0);
                return out;
            }
            match self.profiles.get_mut(*app_id as usize) {
                Some(profile) => profile.gattc_if = gattc_if,
                None => {
                    warn!("gattc: registration for unknown app {}", app_id);
                    return out;
                }
            }
        }

        for profile in self.profiles.iter_mut() {
            if gattc_if != GattIf::NONE && gattc_if != profile.gattc_if {
                continue;
            }
            if let Some(cmd) = profile.handle(event, cache) {
                // At most one command per profile, and `out` holds N.
                let _ = out.push((profile.gattc_if, cmd));
            }
        }
        out
    }
}

impl<const N: usize> Default for ProfileTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IF0: GattIf = GattIf(3);
    const PEER: BdAddr = [0x24, 0x0A, 0xC4, 0x00, 0x00, 0x01];
    const CONN: u16 = 0;
    const RANGE: HandleRange = HandleRange { start: 0x28, end: 0x30 };
    const CHAR_HANDLE: u16 = 0x2A;
    const CCCD_HANDLE: u16 = 0x2B;

    static FW_CHARS: [CharElement; 1] = [CharElement {
        handle: CHAR_HANDLE,
        uuid: REMOTE_NOTIFY_CHAR_UUID,
        properties: CharProperties(CharProperties::NOTIFY | CharProperties::WRITE),
    }];
    static READ_ONLY_CHARS: [CharElement; 1] = [CharElement {
        handle: CHAR_HANDLE,
        uuid: REMOTE_NOTIFY_CHAR_UUID,
        properties: CharProperties(CharProperties::READ),
    }];
    static FW_DESCRS: [DescrElement; 1] = [DescrElement {
        handle: CCCD_HANDLE,
        uuid: CCCD_UUID,
    }];

    struct FakeCache {
        char_count: Result<u16, BleError>,
        chars: &'static [CharElement],
        descr_count: u16,
        descrs: &'static [DescrElement],
        lookups: usize,
    }

    impl FakeCache {
        fn firmware_peer() -> Self {
            Self {
                char_count: Ok(1),
                chars: &FW_CHARS,
                descr_count: 1,
                descrs: &FW_DESCRS,
                lookups: 0,
            }
        }
    }

    impl AttributeCache for FakeCache {
        fn attribute_count(
            &mut self,
            _gattc_if: GattIf,
            _conn_id: u16,
            kind: AttrKind,
            _range: HandleRange,
            _char_handle: u16,
        ) -> Result<u16, BleError> {
            match kind {
                AttrKind::Characteristic => self.char_count,
                AttrKind::Descriptor => Ok(self.descr_count),
            }
        }

        fn characteristics_by_uuid(
            &mut self,
            _gattc_if: GattIf,
            _conn_id: u16,
            _range: HandleRange,
            _uuid: Uuid,
            out: &mut [CharElement],
        ) -> Result<usize, BleError> {
            self.lookups += 1;
            let n = self.chars.len().min(out.len());
            out[..n].copy_from_slice(&self.chars[..n]);
            Ok(n)
        }

        fn descriptors_by_char_handle(
            &mut self,
            _gattc_if: GattIf,
            _conn_id: u16,
            _char_handle: u16,
            _uuid: Uuid,
            out: &mut [DescrElement],
        ) -> Result<usize, BleError> {
            self.lookups += 1;
            let n = self.descrs.len().min(out.len());
            out[..n].copy_from_slice(&self.descrs[..n]);
            Ok(n)
        }
    }

    fn ok() -> Status {
        Status::SUCCESS
    }

    /// Drive a profile up to `Discovering` with the service found.
    fn discovered(cache: &mut FakeCache) -> PeerProfile {
        let mut p = PeerProfile::new(0);
        p.gattc_if = IF0;
        p.handle(&GattcEvent::Register { status: ok(), app_id: 0 }, cache);
        p.handle(&GattcEvent::Connect { conn_id: CONN, remote: PEER }, cache);
        p.handle(&GattcEvent::ConfigMtu { status: ok(), conn_id: CONN, mtu: 500 }, cache);
        p.handle(
            &GattcEvent::SearchResult { conn_id: CONN, uuid: REMOTE_SERVICE_UUID, range: RANGE },
            cache,
        );
        p
    }

    #[test]
    fn test_probe_payload() {
        let p = probe_payload();
        assert_eq!(p.len(), 35);
        assert_eq!(p[0], 0);
        assert_eq!(p[34], 34);
    }

    #[test]
    fn test_register_sets_scan_params() {
        let mut cache = FakeCache::firmware_peer();
        let mut table: ProfileTable<1> = ProfileTable::new();
        let out = table.dispatch(IF0, &GattcEvent::Register { status: ok(), app_id: 0 }, &mut cache);
        assert_eq!(out.as_slice(), &[(IF0, GattCommand::SetScanParams)]);
        let p = table.profile(0).unwrap();
        assert_eq!(p.gattc_if(), IF0);
        assert_eq!(p.state(), GattState::Registered);
    }

    #[test]
    fn test_failed_registration_is_dropped() {
        let mut cache = FakeCache::firmware_peer();
        let mut table: ProfileTable<1> = ProfileTable::new();
        let out = table.dispatch(
            IF0,
            &GattcEvent::Register { status: Status::ERROR, app_id: 0 },
            &mut cache,
        );
        assert!(out.is_empty());
        let p = table.profile(0).unwrap();
        assert_eq!(p.gattc_if(), GattIf::NONE);
        assert_eq!(p.state(), GattState::Unregistered);
    }

    #[test]
    fn test_event_for_other_interface_is_ignored() {
        let mut cache = FakeCache::firmware_peer();
        let mut table: ProfileTable<1> = ProfileTable::new();
        table.dispatch(IF0, &GattcEvent::Register { status: ok(), app_id: 0 }, &mut cache);
        let out = table.dispatch(
            GattIf(7),
            &GattcEvent::Connect { conn_id: CONN, remote: PEER },
            &mut cache,
        );
        assert!(out.is_empty());
        assert_eq!(table.profile(0).unwrap().state(), GattState::Registered);

        let out = table.dispatch(
            GattIf::NONE,
            &GattcEvent::Connect { conn_id: CONN, remote: PEER },
            &mut cache,
        );
        assert_eq!(out.as_slice(), &[(IF0, GattCommand::SendMtuRequest { conn_id: CONN })]);
    }

    #[test]
    fn test_open_moves_to_connecting() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = PeerProfile::new(0);
        p.handle(&GattcEvent::Register { status: ok(), app_id: 0 }, &mut cache);
        let open = GattcEvent::Open { status: ok(), conn_id: CONN, remote: PEER, mtu: 23 };
        assert_eq!(p.handle(&open, &mut cache), None);
        assert_eq!(p.state(), GattState::Connecting);
    }

    #[test]
    fn test_mtu_failure_still_searches() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = PeerProfile::new(0);
        p.handle(&GattcEvent::Register { status: ok(), app_id: 0 }, &mut cache);
        p.handle(&GattcEvent::Connect { conn_id: CONN, remote: PEER }, &mut cache);
        let cmd = p.handle(
            &GattcEvent::ConfigMtu { status: Status::ERROR, conn_id: CONN, mtu: 0 },
            &mut cache,
        );
        assert_eq!(
            cmd,
            Some(GattCommand::SearchService { conn_id: CONN, filter: REMOTE_SERVICE_UUID })
        );
        assert_eq!(p.mtu(), 23);
        assert_eq!(p.state(), GattState::Discovering);
    }

    #[test]
    fn test_full_subscription_sequence() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = discovered(&mut cache);
        assert!(p.server_found());
        assert_eq!(p.service_range(), Some(RANGE));

        let cmd = p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        assert_eq!(
            cmd,
            Some(GattCommand::RegisterForNotify { remote: PEER, char_handle: CHAR_HANDLE })
        );
        assert_eq!(p.state(), GattState::CharacteristicLookup);

        let cmd = p.handle(
            &GattcEvent::RegisterForNotify { status: ok(), handle: CHAR_HANDLE },
            &mut cache,
        );
        assert_eq!(
            cmd,
            Some(GattCommand::WriteDescriptor {
                conn_id: CONN,
                handle: CCCD_HANDLE,
                value: [0x01, 0x00],
            })
        );
        assert_eq!(p.state(), GattState::SubscribingNotify);

        let cmd = p.handle(
            &GattcEvent::WriteDescriptor { status: ok(), conn_id: CONN, handle: CCCD_HANDLE },
            &mut cache,
        );
        assert_eq!(
            cmd,
            Some(GattCommand::WriteCharacteristic {
                conn_id: CONN,
                handle: CHAR_HANDLE,
                value: probe_payload(),
            })
        );
        assert_eq!(p.state(), GattState::Ready);
    }

    #[test]
    fn test_other_service_not_recorded() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = PeerProfile::new(0);
        p.handle(&GattcEvent::Register { status: ok(), app_id: 0 }, &mut cache);
        p.handle(&GattcEvent::Connect { conn_id: CONN, remote: PEER }, &mut cache);
        p.handle(&GattcEvent::ConfigMtu { status: ok(), conn_id: CONN, mtu: 500 }, &mut cache);
        p.handle(
            &GattcEvent::SearchResult { conn_id: CONN, uuid: Uuid::Uuid16(0x180F), range: RANGE },
            &mut cache,
        );
        assert!(!p.server_found());
        let cmd = p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        assert_eq!(cmd, None);
        assert_eq!(cache.lookups, 0);
    }

    #[test]
    fn test_too_many_characteristics_abandons_step() {
        let mut cache = FakeCache::firmware_peer();
        cache.char_count = Ok(MAX_ATTR_RESULTS as u16 + 1);
        let mut p = discovered(&mut cache);
        let cmd = p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        assert_eq!(cmd, None);
        assert_eq!(cache.lookups, 0);
        assert_eq!(p.state(), GattState::Discovering);
    }

    #[test]
    fn test_count_error_abandons_step() {
        let mut cache = FakeCache::firmware_peer();
        cache.char_count = Err(BleError::Status(Status::ERROR));
        let mut p = discovered(&mut cache);
        let cmd = p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        assert_eq!(cmd, None);
        assert_eq!(p.char_handle(), None);
    }

    #[test]
    fn test_characteristic_without_notify_is_skipped() {
        let mut cache = FakeCache::firmware_peer();
        cache.chars = &READ_ONLY_CHARS;
        let mut p = discovered(&mut cache);
        let cmd = p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        assert_eq!(cmd, None);
        assert_eq!(p.char_handle(), None);
    }

    #[test]
    fn test_missing_cccd_parks_in_descriptor_lookup() {
        let mut cache = FakeCache::firmware_peer();
        cache.descr_count = 0;
        let mut p = discovered(&mut cache);
        p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        let cmd = p.handle(
            &GattcEvent::RegisterForNotify { status: ok(), handle: CHAR_HANDLE },
            &mut cache,
        );
        assert_eq!(cmd, None);
        assert_eq!(p.state(), GattState::DescriptorLookup);
    }

    #[test]
    fn test_failed_descriptor_write_stays_subscribing() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = discovered(&mut cache);
        p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        p.handle(&GattcEvent::RegisterForNotify { status: ok(), handle: CHAR_HANDLE }, &mut cache);
        let cmd = p.handle(
            &GattcEvent::WriteDescriptor { status: Status::ERROR, conn_id: CONN, handle: CCCD_HANDLE },
            &mut cache,
        );
        assert_eq!(cmd, None);
        assert_eq!(p.state(), GattState::SubscribingNotify);
    }

    #[test]
    fn test_disconnect_clears_connection_state() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = discovered(&mut cache);
        p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        p.handle(
            &GattcEvent::Disconnect { conn_id: CONN, remote: PEER, reason: 0x13 },
            &mut cache,
        );
        assert_eq!(p.state(), GattState::Registered);
        assert_eq!(p.conn_id(), None);
        assert!(!p.server_found());
        assert_eq!(p.service_range(), None);
        assert_eq!(p.char_handle(), None);
        assert_eq!(p.remote_bda(), Some(PEER));
    }

    #[test]
    fn test_disconnect_of_older_link_keeps_current() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = discovered(&mut cache);
        p.handle(
            &GattcEvent::Disconnect { conn_id: CONN + 1, remote: PEER, reason: 0x08 },
            &mut cache,
        );
        assert_eq!(p.state(), GattState::Discovering);
        assert_eq!(p.conn_id(), Some(CONN));
        assert_eq!(p.service_range(), Some(RANGE));
    }

    #[test]
    fn test_disconnect_before_connect_resets() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = PeerProfile::new(0);
        p.gattc_if = IF0;
        p.handle(&GattcEvent::Register { status: ok(), app_id: 0 }, &mut cache);
        p.handle(
            &GattcEvent::Open { status: ok(), conn_id: CONN, remote: PEER, mtu: 23 },
            &mut cache,
        );
        assert_eq!(p.state(), GattState::Connecting);
        p.handle(
            &GattcEvent::Disconnect { conn_id: CONN, remote: PEER, reason: 0x3E },
            &mut cache,
        );
        assert_eq!(p.state(), GattState::Registered);
    }

    #[test]
    fn test_stale_events_after_disconnect_ignored() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = discovered(&mut cache);
        p.handle(
            &GattcEvent::Disconnect { conn_id: CONN, remote: PEER, reason: 0x08 },
            &mut cache,
        );
        let cmd = p.handle(&GattcEvent::SearchComplete { status: ok(), conn_id: CONN }, &mut cache);
        assert_eq!(cmd, None);
        let cmd = p.handle(&GattcEvent::RegisterForNotify { status: ok(), handle: CHAR_HANDLE }, &mut cache);
        assert_eq!(cmd, None);
        assert_eq!(cache.lookups, 0);
    }

    #[test]
    fn test_notifications_counted() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = discovered(&mut cache);
        let mut value = Vec::new();
        value.extend_from_slice(&[1, 2, 3]).unwrap();
        p.handle(
            &GattcEvent::Notify { conn_id: CONN, remote: PEER, handle: CHAR_HANDLE, is_notify: true, value },
            &mut cache,
        );
        assert_eq!(p.notifications(), 1);
    }

    #[test]
    fn test_unregistered_profile_ignores_events() {
        let mut cache = FakeCache::firmware_peer();
        let mut p = PeerProfile::new(0);
        let cmd = p.handle(&GattcEvent::Connect { conn_id: CONN, remote: PEER }, &mut cache);
        assert_eq!(cmd, None);
        assert_eq!(p.state(), GattState::Unregistered);
    }
}
