//! BLE host on the esp-radio HCI connector.
//!
//! trouble-host runs the central role: passive scan windows on request and
//! one GATT client link to the configured firmware-update peer. Its async
//! API is folded back into the request/completion shape the GATT client
//! state machine expects, so every request is answered by exactly one
//! `GattcEvent` or `GapEvent`.
//!
//! trouble-host keeps no attribute cache. Service search therefore resolves
//! the notify characteristic and its CCCD up front and records them in
//! [`ATTRIBUTES`], which backs the synchronous [`AttributeCache`] queries.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use bt_hci::controller::ExternalController;
use bt_hci::param::{AddrKind, BdAddr as HciAddr, LeAdvReportsIter};
use defmt::{debug, info, warn};
use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_time::{with_timeout, Duration, Timer};
use esp_hal::peripherals::BT;
use esp_radio::ble::controller::BleConnector;
use heapless::Vec;
use static_cell::StaticCell;
use trouble_host::prelude::{
    Central, Characteristic, ConnectConfig, Connection, ConnectionEvent, DefaultPacketPool,
    EventHandler, GattClient, Host, HostResources, Runner, ScanConfig, Scanner, Stack,
    Uuid as HostUuid,
};

use ble_tracker::ble::gatt_client::{
    AttrKind, AttributeCache, CharElement, CharProperties, DescrElement, GattcEvent,
    INVALID_HANDLE,
};
use ble_tracker::ble::{
    parse_bd_addr, BdAddr, BleController, GapEvent, GattIf, HandleRange, ScanParams, ScanReport,
    ScanType, Uuid, TRACKER_SCAN_PARAMS,
};
use ble_tracker::config::{
    Settings, ADV_MAX_LEN, CCCD_NOTIFY_ENABLE, CCCD_UUID, NOTIFY_MAX_LEN, PROBE_PAYLOAD_LEN,
    REMOTE_NOTIFY_CHAR_UUID,
};
use ble_tracker::{BleError, Event, Status};

use super::{post, EVENTS};

/// Interface id reported for the single registered profile.
pub const APP_GATT_IF: GattIf = GattIf(3);

const CONNECTIONS_MAX: usize = 1;
/// Signalling + ATT.
const L2CAP_CHANNELS_MAX: usize = 2;
const HCI_SLOTS: usize = 20;
const MAX_SERVICES: usize = 4;

/// Device type reported for every advertiser (BLE only).
const DEVICE_TYPE_BLE: u8 = 0x02;

/// Time between connection attempts while the peer is absent.
const CONNECT_RETRY_MS: u64 = 10_000;
const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Disconnect reason used when the link vanishes without one.
const REASON_CONNECTION_TIMEOUT: u16 = 0x08;

pub type Controller = ExternalController<BleConnector<'static>, HCI_SLOTS>;
pub type BleStack = Stack<'static, Controller, DefaultPacketPool>;
type Link = Connection<'static, DefaultPacketPool>;
type LinkClient<'a> = GattClient<'a, Controller, DefaultPacketPool, MAX_SERVICES>;
type LinkChannel = Channel<NoopRawMutex, Link, 1>;

#[derive(Clone, Copy, defmt::Format)]
enum CentralRequest {
    RegisterApp { app_id: u16 },
    SetScanParams(ScanParams),
    StartScan { duration_secs: u32 },
}

#[derive(Clone, defmt::Format)]
enum GattRequest {
    ExchangeMtu {
        conn_id: u16,
    },
    SearchService {
        conn_id: u16,
        filter: Uuid,
    },
    RegisterForNotify {
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
        value: Vec<u8, PROBE_PAYLOAD_LEN>,
    },
}

/// What resolving one GATT request left for the link loop to do.
enum Step {
    Done,
    EnableNotify { conn_id: u16, handle: u16 },
    DisableNotify { conn_id: u16, handle: u16 },
}

/// Attributes of the connected peer resolved by the last service search.
#[derive(Clone, Copy)]
struct AttributeTable {
    conn_id: Option<u16>,
    characteristic: CharElement,
    cccd: DescrElement,
}

impl AttributeTable {
    const EMPTY: AttributeTable = AttributeTable {
        conn_id: None,
        characteristic: CharElement::EMPTY,
        cccd: DescrElement::EMPTY,
    };
}

static CENTRAL_REQUESTS: Channel<CriticalSectionRawMutex, CentralRequest, 4> = Channel::new();
static GATT_REQUESTS: Channel<CriticalSectionRawMutex, GattRequest, 4> = Channel::new();
static ATTRIBUTES: Mutex<CriticalSectionRawMutex, RefCell<AttributeTable>> =
    Mutex::new(RefCell::new(AttributeTable::EMPTY));
static SCANNING: AtomicBool = AtomicBool::new(false);
static LINKED: AtomicBool = AtomicBool::new(false);

static RESOURCES: StaticCell<HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX>> =
    StaticCell::new();
static STACK: StaticCell<BleStack> = StaticCell::new();
static LINKS: StaticCell<LinkChannel> = StaticCell::new();
static FORWARDER: ReportForwarder = ReportForwarder;

pub struct BleHost {
    pub stack: &'static BleStack,
    pub central: Central<'static, Controller, DefaultPacketPool>,
    pub runner: Runner<'static, Controller, DefaultPacketPool>,
    pub peer: Option<BdAddr>,
    pub links: &'static LinkChannel,
}

pub fn init(radio: &'static esp_radio::Controller<'static>, bt: BT<'static>, settings: Settings) -> BleHost {
    let connector = BleConnector::new(radio, bt, Default::default()).expect("BLE init failed");
    let controller: Controller = ExternalController::new(connector);
    let stack: &'static BleStack =
        STACK.init(trouble_host::new(controller, RESOURCES.init(HostResources::new())));
    let Host { central, runner, .. } = stack.build();

    let peer = parse_bd_addr(settings.gatt_peer);
    match peer {
        Some(addr) => info!("ble: firmware-update peer {:x}", addr),
        None => info!("ble: no firmware-update peer configured"),
    }

    BleHost {
        stack,
        central,
        runner,
        peer,
        links: LINKS.init(Channel::new()),
    }
}

/// Controller byte order is little-endian; events carry the address
/// most significant byte first.
fn to_event_order(addr: &HciAddr) -> BdAddr {
    let mut out = [0u8; 6];
    out.copy_from_slice(addr.raw());
    out.reverse();
    out
}

fn to_hci_order(addr: BdAddr) -> HciAddr {
    let mut raw = addr;
    raw.reverse();
    HciAddr::new(raw)
}

fn to_host_uuid(uuid: Uuid) -> Option<HostUuid> {
    match uuid {
        Uuid::Uuid16(v) => Some(HostUuid::new_short(v)),
        Uuid::Uuid128(bytes) => Some(HostUuid::new_long(bytes)),
        Uuid::Uuid32(_) => None,
    }
}

fn gattc(event: GattcEvent) -> Event {
    Event::Gattc {
        gattc_if: APP_GATT_IF,
        event,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Adapter
// ═══════════════════════════════════════════════════════════════════════════

/// [`BleController`] handed to the tracker.
pub struct RadioBle;

impl RadioBle {
    fn central(request: CentralRequest) -> Result<(), BleError> {
        CENTRAL_REQUESTS
            .try_send(request)
            .map_err(|_| BleError::NoResources)
    }

    fn gatt(request: GattRequest) -> Result<(), BleError> {
        if !LINKED.load(Ordering::Relaxed) {
            return Err(BleError::NotConnected);
        }
        GATT_REQUESTS.try_send(request).map_err(|_| BleError::NoResources)
    }

    fn table(conn_id: u16) -> Result<AttributeTable, BleError> {
        let table = ATTRIBUTES.lock(|t| *t.borrow());
        if table.conn_id != Some(conn_id) {
            return Err(BleError::NotConnected);
        }
        Ok(table)
    }
}

impl BleController for RadioBle {
    fn register_app(&mut self, app_id: u16) -> Result<(), BleError> {
        Self::central(CentralRequest::RegisterApp { app_id })
    }

    fn set_local_mtu(&mut self, mtu: u16) -> Result<(), BleError> {
        // The ATT MTU follows the host packet pool; the exchange happens per link.
        debug!("ble: local MTU {} requested", mtu);
        Ok(())
    }

    fn set_scan_params(&mut self, params: &ScanParams) -> Result<(), BleError> {
        Self::central(CentralRequest::SetScanParams(*params))
    }

    fn start_scan(&mut self, duration_secs: u32) -> Result<(), BleError> {
        Self::central(CentralRequest::StartScan { duration_secs })
    }

    fn send_mtu_request(&mut self, _gattc_if: GattIf, conn_id: u16) -> Result<(), BleError> {
        Self::gatt(GattRequest::ExchangeMtu { conn_id })
    }

    fn search_service(&mut self, _gattc_if: GattIf, conn_id: u16, filter: Uuid) -> Result<(), BleError> {
        Self::gatt(GattRequest::SearchService { conn_id, filter })
    }

    fn register_for_notify(
        &mut self,
        _gattc_if: GattIf,
        _remote: BdAddr,
        char_handle: u16,
    ) -> Result<(), BleError> {
        Self::gatt(GattRequest::RegisterForNotify { char_handle })
    }

    fn write_descriptor(
        &mut self,
        _gattc_if: GattIf,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), BleError> {
        let value: [u8; 2] = value.try_into().map_err(|_| BleError::NoResources)?;
        Self::gatt(GattRequest::WriteDescriptor { conn_id, handle, value })
    }

    fn write_characteristic(
        &mut self,
        _gattc_if: GattIf,
        conn_id: u16,
        handle: u16,
        value: &[u8],
    ) -> Result<(), BleError> {
        let value = Vec::from_slice(value).map_err(|_| BleError::NoResources)?;
        Self::gatt(GattRequest::WriteCharacteristic { conn_id, handle, value })
    }
}

impl AttributeCache for RadioBle {
    fn attribute_count(
        &mut self,
        _gattc_if: GattIf,
        conn_id: u16,
        kind: AttrKind,
        range: HandleRange,
        char_handle: u16,
    ) -> Result<u16, BleError> {
        let table = Self::table(conn_id)?;
        let found = match kind {
            AttrKind::Characteristic => {
                let h = table.characteristic.handle;
                h != INVALID_HANDLE && (range.start..=range.end).contains(&h)
            }
            AttrKind::Descriptor => {
                table.cccd.handle != INVALID_HANDLE && table.characteristic.handle == char_handle
            }
        };
        Ok(found as u16)
    }

    fn characteristics_by_uuid(
        &mut self,
        _gattc_if: GattIf,
        conn_id: u16,
        range: HandleRange,
        uuid: Uuid,
        out: &mut [CharElement],
    ) -> Result<usize, BleError> {
        let table = Self::table(conn_id)?;
        let c = table.characteristic;
        if c.handle == INVALID_HANDLE || c.uuid != uuid || !(range.start..=range.end).contains(&c.handle) {
            return Ok(0);
        }
        let slot = out.first_mut().ok_or(BleError::NoResources)?;
        *slot = c;
        Ok(1)
    }

    fn descriptors_by_char_handle(
        &mut self,
        _gattc_if: GattIf,
        conn_id: u16,
        char_handle: u16,
        uuid: Uuid,
        out: &mut [DescrElement],
    ) -> Result<usize, BleError> {
        let table = Self::table(conn_id)?;
        let d = table.cccd;
        if d.handle == INVALID_HANDLE || d.uuid != uuid || table.characteristic.handle != char_handle {
            return Ok(0);
        }
        let slot = out.first_mut().ok_or(BleError::NoResources)?;
        *slot = d;
        Ok(1)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Host runner and scanning
// ═══════════════════════════════════════════════════════════════════════════

struct ReportForwarder;

impl EventHandler for ReportForwarder {
    fn on_adv_reports(&self, mut reports: LeAdvReportsIter<'_>) {
        if !SCANNING.load(Ordering::Relaxed) {
            return;
        }
        while let Some(Ok(report)) = reports.next() {
            let data = &report.data[..report.data.len().min(ADV_MAX_LEN)];
            let Ok(adv) = Vec::from_slice(data) else {
                continue;
            };
            post(Event::Gap(GapEvent::ScanResult(ScanReport {
                bda: to_event_order(&report.addr),
                dev_type: DEVICE_TYPE_BLE,
                rssi: report.rssi,
                adv_data_len: data.len() as u8,
                adv,
            })));
        }
    }
}

#[embassy_executor::task]
pub async fn runner_task(mut runner: Runner<'static, Controller, DefaultPacketPool>) -> ! {
    loop {
        if let Err(e) = runner.run_with_handler(&FORWARDER).await {
            warn!("ble: host runner stopped {:?}", defmt::Debug2Format(&e));
        }
        Timer::after(Duration::from_millis(100)).await;
    }
}

#[embassy_executor::task]
pub async fn central_task(
    mut central: Central<'static, Controller, DefaultPacketPool>,
    peer: Option<BdAddr>,
    links: &'static LinkChannel,
) -> ! {
    let mut params = TRACKER_SCAN_PARAMS;
    loop {
        let request = select(
            CENTRAL_REQUESTS.receive(),
            Timer::after(Duration::from_millis(CONNECT_RETRY_MS)),
        )
        .await;
        match request {
            Either::First(CentralRequest::RegisterApp { app_id }) => {
                info!("ble: GATT client app {} registered", app_id);
                EVENTS
                    .send(gattc(GattcEvent::Register {
                        status: Status::SUCCESS,
                        app_id,
                    }))
                    .await;
            }
            Either::First(CentralRequest::SetScanParams(p)) => {
                params = p;
                EVENTS
                    .send(Event::Gap(GapEvent::ScanParamSetComplete {
                        status: Status::SUCCESS,
                    }))
                    .await;
            }
            Either::First(CentralRequest::StartScan { duration_secs }) => {
                central = scan_window(central, &params, duration_secs).await;
            }
            Either::Second(()) => {}
        }

        if let Some(peer) = peer {
            if !LINKED.load(Ordering::Relaxed) {
                connect(&mut central, peer, links).await;
            }
        }
    }
}

async fn scan_window(
    central: Central<'static, Controller, DefaultPacketPool>,
    params: &ScanParams,
    duration_secs: u32,
) -> Central<'static, Controller, DefaultPacketPool> {
    let mut scanner = Scanner::new(central);
    let config = ScanConfig {
        active: params.scan_type == ScanType::Active,
        interval: Duration::from_micros(params.interval as u64 * 625),
        window: Duration::from_micros(params.window as u64 * 625),
        ..Default::default()
    };

    match scanner.scan(&config).await {
        Ok(session) => {
            EVENTS
                .send(Event::Gap(GapEvent::ScanStartComplete {
                    status: Status::SUCCESS,
                }))
                .await;
            SCANNING.store(true, Ordering::Relaxed);
            Timer::after(Duration::from_secs(duration_secs as u64)).await;
            SCANNING.store(false, Ordering::Relaxed);
            drop(session);
            EVENTS.send(Event::Gap(GapEvent::ScanWindowComplete)).await;
        }
        Err(e) => {
            warn!("ble: scan start failed {:?}", defmt::Debug2Format(&e));
            EVENTS
                .send(Event::Gap(GapEvent::ScanStartComplete {
                    status: Status::ERROR,
                }))
                .await;
        }
    }
    scanner.into_inner()
}

async fn connect(
    central: &mut Central<'static, Controller, DefaultPacketPool>,
    peer: BdAddr,
    links: &'static LinkChannel,
) {
    let addr = to_hci_order(peer);
    let filter = [(AddrKind::PUBLIC, &addr)];
    let config = ConnectConfig {
        scan_config: ScanConfig {
            filter_accept_list: &filter,
            ..Default::default()
        },
        connect_params: Default::default(),
    };
    match with_timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), central.connect(&config)).await {
        Ok(Ok(link)) => {
            LINKED.store(true, Ordering::Relaxed);
            links.send(link).await;
        }
        Ok(Err(e)) => warn!("ble: connect to {:x} failed {:?}", peer, defmt::Debug2Format(&e)),
        Err(_) => debug!("ble: peer {:x} not in range", peer),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// GATT client link
// ═══════════════════════════════════════════════════════════════════════════

#[embassy_executor::task]
pub async fn gatt_task(stack: &'static BleStack, links: &'static LinkChannel) -> ! {
    loop {
        let link = links.receive().await;
        let conn_id = link.handle().raw();
        let remote = to_event_order(&link.peer_address());
        info!("ble: link {} to {:x} up", conn_id, remote);

        let reason = run_link(stack, &link, conn_id, remote).await;

        ATTRIBUTES.lock(|t| t.replace(AttributeTable::EMPTY));
        while GATT_REQUESTS.try_receive().is_ok() {}
        LINKED.store(false, Ordering::Relaxed);
        EVENTS
            .send(gattc(GattcEvent::Disconnect {
                conn_id,
                remote,
                reason,
            }))
            .await;
    }
}

async fn wait_disconnect(link: &Link) -> u16 {
    loop {
        if let ConnectionEvent::Disconnected { reason } = link.next().await {
            return reason.into_inner() as u16;
        }
    }
}

async fn run_link(stack: &'static BleStack, link: &Link, conn_id: u16, remote: BdAddr) -> u16 {
    EVENTS
        .send(gattc(GattcEvent::Open {
            status: Status::SUCCESS,
            conn_id,
            remote,
            mtu: link.att_mtu(),
        }))
        .await;
    EVENTS.send(gattc(GattcEvent::Connect { conn_id, remote })).await;

    let client = match LinkClient::new(stack, link).await {
        Ok(client) => client,
        Err(e) => {
            warn!("ble: GATT client setup failed {:?}", defmt::Debug2Format(&e));
            link.disconnect();
            return wait_disconnect(link).await;
        }
    };

    match select3(client.task(), serve(&client, link, remote), wait_disconnect(link)).await {
        Either3::First(_) => REASON_CONNECTION_TIMEOUT,
        Either3::Second(never) => never,
        Either3::Third(reason) => reason,
    }
}

/// Answer GATT requests for one link, forwarding notifications once they
/// are enabled.
async fn serve(client: &LinkClient<'_>, link: &Link, remote: BdAddr) -> ! {
    let mut target: Option<Characteristic<u8>> = None;
    loop {
        let (conn_id, handle) = loop {
            let request = GATT_REQUESTS.receive().await;
            match resolve(client, link, &mut target, request).await {
                Step::Done => {}
                Step::EnableNotify { conn_id, handle } => break (conn_id, handle),
                Step::DisableNotify { conn_id, handle } => {
                    post_descriptor_write(Status::SUCCESS, conn_id, handle).await
                }
            }
        };

        let Some(characteristic) = target.clone() else {
            post_descriptor_write(Status::ERROR, conn_id, handle).await;
            continue;
        };
        let mut listener = match client.subscribe(&characteristic, false).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("ble: subscribe failed {:?}", defmt::Debug2Format(&e));
                post_descriptor_write(Status::ERROR, conn_id, handle).await;
                continue;
            }
        };
        let notify_handle = characteristic.handle;
        post_descriptor_write(Status::SUCCESS, conn_id, handle).await;

        loop {
            match select(GATT_REQUESTS.receive(), listener.next()).await {
                Either::First(request) => match resolve(client, link, &mut target, request).await {
                    Step::Done => {}
                    Step::EnableNotify { conn_id, handle } => {
                        post_descriptor_write(Status::SUCCESS, conn_id, handle).await
                    }
                    Step::DisableNotify { conn_id, handle } => {
                        post_descriptor_write(Status::SUCCESS, conn_id, handle).await;
                        break;
                    }
                },
                Either::Second(notification) => {
                    let data = notification.as_ref();
                    let value = Vec::from_slice(&data[..data.len().min(NOTIFY_MAX_LEN)])
                        .unwrap_or_default();
                    EVENTS
                        .send(gattc(GattcEvent::Notify {
                            conn_id: link.handle().raw(),
                            remote,
                            handle: notify_handle,
                            is_notify: true,
                            value,
                        }))
                        .await;
                }
            }
        }
    }
}

async fn post_descriptor_write(status: Status, conn_id: u16, handle: u16) {
    EVENTS
        .send(gattc(GattcEvent::WriteDescriptor {
            status,
            conn_id,
            handle,
        }))
        .await;
}

/// Carry out one request. `target` is the characteristic found by the last
/// search.
async fn resolve(
    client: &LinkClient<'_>,
    link: &Link,
    target: &mut Option<Characteristic<u8>>,
    request: GattRequest,
) -> Step {
    match request {
        GattRequest::ExchangeMtu { conn_id } => {
            EVENTS
                .send(gattc(GattcEvent::ConfigMtu {
                    status: Status::SUCCESS,
                    conn_id,
                    mtu: link.att_mtu(),
                }))
                .await;
        }
        GattRequest::SearchService { conn_id, filter } => {
            let status = match search(client, conn_id, filter).await {
                Some((found, range)) => {
                    *target = found;
                    EVENTS
                        .send(gattc(GattcEvent::SearchResult {
                            conn_id,
                            uuid: filter,
                            range,
                        }))
                        .await;
                    Status::SUCCESS
                }
                None => Status::ERROR,
            };
            EVENTS
                .send(gattc(GattcEvent::SearchComplete { status, conn_id }))
                .await;
        }
        GattRequest::RegisterForNotify { char_handle } => {
            let registered = ATTRIBUTES.lock(|t| t.borrow().characteristic.handle) == char_handle;
            let status = if registered { Status::SUCCESS } else { Status::ERROR };
            EVENTS
                .send(gattc(GattcEvent::RegisterForNotify {
                    status,
                    handle: char_handle,
                }))
                .await;
        }
        GattRequest::WriteDescriptor {
            conn_id,
            handle,
            value,
        } => {
            if value == CCCD_NOTIFY_ENABLE {
                return Step::EnableNotify { conn_id, handle };
            }
            if value == [0, 0] {
                return Step::DisableNotify { conn_id, handle };
            }
            post_descriptor_write(Status::ERROR, conn_id, handle).await;
        }
        GattRequest::WriteCharacteristic {
            conn_id,
            handle,
            value,
        } => {
            let status = match target.as_ref().filter(|c| c.handle == handle) {
                Some(c) => match client.write_characteristic(c, &value).await {
                    Ok(()) => Status::SUCCESS,
                    Err(e) => {
                        warn!("ble: write to {} failed {:?}", handle, defmt::Debug2Format(&e));
                        Status::ERROR
                    }
                },
                None => Status::ERROR,
            };
            EVENTS
                .send(gattc(GattcEvent::WriteCharacteristic {
                    status,
                    conn_id,
                    handle,
                }))
                .await;
        }
    }
    Step::Done
}

/// Find the service and resolve the notify characteristic inside it.
///
/// Returns `None` when the service is absent. A service without the
/// characteristic is still reported, with an empty handle range.
async fn search(
    client: &LinkClient<'_>,
    conn_id: u16,
    filter: Uuid,
) -> Option<(Option<Characteristic<u8>>, HandleRange)> {
    let uuid = to_host_uuid(filter)?;
    let services = match client.services_by_uuid(&uuid).await {
        Ok(services) => services,
        Err(e) => {
            warn!("ble: service search failed {:?}", defmt::Debug2Format(&e));
            return None;
        }
    };
    let service = services.first()?;

    let char_uuid = to_host_uuid(REMOTE_NOTIFY_CHAR_UUID)?;
    let characteristic: Characteristic<u8> =
        match client.characteristic_by_uuid(service, &char_uuid).await {
            Ok(c) => c,
            Err(e) => {
                warn!("ble: notify characteristic missing {:?}", defmt::Debug2Format(&e));
                let empty = HandleRange {
                    start: INVALID_HANDLE,
                    end: INVALID_HANDLE,
                };
                return Some((None, empty));
            }
        };

    let cccd = characteristic.cccd_handle.unwrap_or(INVALID_HANDLE);
    // Only the CCCD is exposed, so notify support is read off it.
    let mut properties = CharProperties::WRITE;
    if cccd != INVALID_HANDLE {
        properties |= CharProperties::NOTIFY;
    }
    let range = HandleRange {
        start: characteristic.handle.saturating_sub(1),
        end: cccd.max(characteristic.handle),
    };
    let table = AttributeTable {
        conn_id: Some(conn_id),
        characteristic: CharElement {
            handle: characteristic.handle,
            uuid: REMOTE_NOTIFY_CHAR_UUID,
            properties: CharProperties(properties),
        },
        cccd: DescrElement {
            handle: cccd,
            uuid: CCCD_UUID,
        },
    };
    ATTRIBUTES.lock(|t| t.replace(table));
    Some((Some(characteristic), range))
}
