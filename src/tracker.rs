//! Event dispatcher - the owned context every state machine lives in.
//!
//! Driver tasks turn radio and network callbacks into [`Event`]s; the
//! dispatcher task feeds them to [`Tracker::dispatch`] one at a time, so
//! the state machines never see two events at once. Commands they return
//! are issued here through the adapter traits, and a failed issue is
//! logged where it happens.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::ble::adv_parser;
use crate::ble::gatt_client::{GattCommand, GattcEvent, PeerProfile, ProfileTable};
use crate::ble::scanner::{ScanCommand, ScanScheduler};
use crate::ble::{BleController, GapEvent, GattIf, TRACKER_SCAN_PARAMS};
use crate::config::{Settings, LOCAL_MTU, PROFILE_APP_ID, PROFILE_NUM};
use crate::connectivity::Connectivity;
use crate::error::Error;
use crate::fota::FirmwareUpdate;
use crate::net::mqtt::MqttEvent;
use crate::net::wifi::{WifiCommand, WifiEvent};
use crate::net::{MessagingTransport, NetworkAdapter, SessionManager, WifiManager};
use crate::telemetry;

/// Everything the dispatcher consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Gap(GapEvent),
    Gattc { gattc_if: GattIf, event: GattcEvent },
    Wifi(WifiEvent),
    Mqtt(MqttEvent),
    /// Periodic scan tick.
    ScanTick,
}

/// Dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TrackerStats {
    pub adv_seen: u32,
    pub telemetry_failed: u32,
}

pub struct Tracker<'c, M, B, N, T, F>
where
    M: RawMutex,
    B: BleController,
    N: NetworkAdapter,
    T: MessagingTransport,
    F: FirmwareUpdate,
{
    connectivity: &'c Connectivity<M>,
    profiles: ProfileTable<PROFILE_NUM>,
    scanner: ScanScheduler,
    wifi: WifiManager,
    session: SessionManager,
    ble: B,
    network: N,
    transport: T,
    fota: F,
    stats: TrackerStats,
}

impl<'c, M, B, N, T, F> Tracker<'c, M, B, N, T, F>
where
    M: RawMutex,
    B: BleController,
    N: NetworkAdapter,
    T: MessagingTransport,
    F: FirmwareUpdate,
{
    pub fn new(
        settings: Settings,
        connectivity: &'c Connectivity<M>,
        ble: B,
        network: N,
        transport: T,
        fota: F,
    ) -> Self {
        Self {
            connectivity,
            profiles: ProfileTable::new(),
            scanner: ScanScheduler::new(),
            wifi: WifiManager::new(settings.esp_name),
            session: SessionManager::new(settings),
            ble,
            network,
            transport,
            fota,
            stats: TrackerStats::default(),
        }
    }

    /// Register the GATT client profile and set the local MTU.
    ///
    /// Startup failures are the only ones that abort setup.
    pub fn start(&mut self) -> Result<(), Error> {
        info!("tracker: registering GATT client app {}", PROFILE_APP_ID);
        self.ble.register_app(PROFILE_APP_ID)?;
        if let Err(e) = self.ble.set_local_mtu(LOCAL_MTU) {
            // Discovery still works on the default MTU.
            error!("tracker: set local MTU failed {}", e);
        }
        Ok(())
    }

    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::Gap(e) => self.on_gap(e),
            Event::Gattc { gattc_if, event } => self.on_gattc(gattc_if, &event),
            Event::Wifi(e) => self.on_wifi(e),
            Event::Mqtt(e) => {
                self.session
                    .on_event(&e, self.connectivity, &mut self.transport, &mut self.fota)
            }
            Event::ScanTick => self.on_scan_tick(),
        }
    }

    pub fn profile(&self) -> Option<&PeerProfile> {
        self.profiles.profile(PROFILE_APP_ID)
    }

    pub fn scanner(&self) -> &ScanScheduler {
        &self.scanner
    }

    pub fn wifi(&self) -> &WifiManager {
        &self.wifi
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }

    pub fn ble(&self) -> &B {
        &self.ble
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn fota(&self) -> &F {
        &self.fota
    }

    // GAP

    fn on_gap(&mut self, event: GapEvent) {
        match event {
            GapEvent::ScanParamSetComplete { status } => {
                if status.is_ok() {
                    self.scanner.arm();
                } else {
                    error!("tracker: scan params rejected, status {}", status.0);
                }
            }
            GapEvent::ScanStartComplete { status } => self.scanner.on_scan_started(status),
            GapEvent::ScanResult(report) => self.on_scan_result(&report),
            GapEvent::ScanWindowComplete => self.scanner.on_window_complete(),
            GapEvent::ScanStopComplete { status } => {
                if !status.is_ok() {
                    error!("tracker: scan stop failed, status {}", status.0);
                }
            }
            GapEvent::AdvStopComplete { status } => {
                if !status.is_ok() {
                    error!("tracker: adv stop failed, status {}", status.0);
                }
            }
            GapEvent::ConnParamsUpdated {
                status,
                min_interval,
                max_interval,
                interval,
                latency,
                timeout,
            } => {
                info!(
                    "tracker: conn params status {} min {} max {} int {} latency {} timeout {}",
                    status.0,
                    min_interval,
                    max_interval,
                    interval,
                    latency,
                    timeout
                );
            }
        }
    }

    fn on_scan_result(&mut self, report: &crate::ble::ScanReport) {
        self.stats.adv_seen = self.stats.adv_seen.wrapping_add(1);
        let record = adv_parser::decode_report(report);
        debug!("tracker: adv {:x} rssi {}", record.bda, record.rssi);

        let esp_name = self.wifi.client_id().unwrap_or(self.wifi.base_name());
        match telemetry::format(esp_name, &record) {
            Ok(payload) => {
                self.session
                    .publish(payload.as_bytes(), self.connectivity, &mut self.transport)
            }
            Err(e) => {
                self.stats.telemetry_failed = self.stats.telemetry_failed.wrapping_add(1);
                error!("tracker: telemetry format failed {}", e);
            }
        }
    }

    fn on_scan_tick(&mut self) {
        let Some(ScanCommand::Start { duration_secs }) = self.scanner.on_tick(self.connectivity.flags())
        else {
            return;
        };
        if let Err(e) = self.ble.start_scan(duration_secs) {
            error!("tracker: scan start failed {}", e);
            self.scanner.on_start_rejected();
        }
    }

    // GATT client

    fn on_gattc(&mut self, gattc_if: GattIf, event: &GattcEvent) {
        let commands = self.profiles.dispatch(gattc_if, event, &mut self.ble);
        for (gattc_if, cmd) in commands {
            self.issue(gattc_if, cmd);
        }
    }

    fn issue(&mut self, gattc_if: GattIf, cmd: GattCommand) {
        let res = match &cmd {
            GattCommand::SetScanParams => self.ble.set_scan_params(&TRACKER_SCAN_PARAMS),
            GattCommand::SendMtuRequest { conn_id } => self.ble.send_mtu_request(gattc_if, *conn_id),
            GattCommand::SearchService { conn_id, filter } => {
                self.ble.search_service(gattc_if, *conn_id, *filter)
            }
            GattCommand::RegisterForNotify { remote, char_handle } => {
                self.ble.register_for_notify(gattc_if, *remote, *char_handle)
            }
            GattCommand::WriteDescriptor { conn_id, handle, value } => {
                self.ble.write_descriptor(gattc_if, *conn_id, *handle, value)
            }
            GattCommand::WriteCharacteristic { conn_id, handle, value } => {
                self.ble.write_characteristic(gattc_if, *conn_id, *handle, value)
            }
        };
        if let Err(e) = res {
            error!("tracker: {} failed {}", cmd, e);
        }
    }

    // WiFi

    fn on_wifi(&mut self, event: WifiEvent) {
        for cmd in self.wifi.handle(event, self.connectivity) {
            match cmd {
                WifiCommand::Connect => {
                    if let Err(e) = self.network.connect() {
                        error!("tracker: wifi connect failed {}", e);
                    }
                }
                WifiCommand::StartSession { client_id } => {
                    self.session.start(client_id, &mut self.transport)
                }
                WifiCommand::StopSession => self.session.stop(&mut self.transport),
            }
        }
    }
}
