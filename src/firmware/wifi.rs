//! WiFi station driver and embassy-net stack.
//!
//! The station task only acts on requests from the association manager:
//! it never re-associates on its own. Association, address acquisition and
//! loss are reported back as `WifiEvent`s.

use core::sync::atomic::{AtomicU8, Ordering};

use alloc::string::String;
use defmt::{error, info, warn};
use embassy_futures::select::{select, Either};
use embassy_net::{Config as NetConfig, Runner, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use esp_hal::peripherals::WIFI;
use esp_hal::rng::Rng;
use esp_radio::wifi::event::{self, EventExt};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent as RadioEvent};
use static_cell::StaticCell;

use ble_tracker::config::Settings;
use ble_tracker::net::wifi::WifiEvent;
use ble_tracker::net::NetworkAdapter;
use ble_tracker::{Error, Event};

use super::EVENTS;

/// Pause after a failed association before reporting it.
const RETRY_DELAY_MS: u64 = 1_000;

/// Reason reported when the driver gives none.
const REASON_UNSPECIFIED: u8 = 1;

#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
enum StationRequest {
    Connect,
    Disconnect,
}

static REQUESTS: Channel<CriticalSectionRawMutex, StationRequest, 2> = Channel::new();
static LAST_REASON: AtomicU8 = AtomicU8::new(REASON_UNSPECIFIED);
static NET_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

/// [`NetworkAdapter`] handed to the tracker.
pub struct Station;

impl NetworkAdapter for Station {
    fn connect(&mut self) -> Result<(), Error> {
        REQUESTS.try_send(StationRequest::Connect).map_err(|_| Error::Wifi)
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        REQUESTS.try_send(StationRequest::Disconnect).map_err(|_| Error::Wifi)
    }
}

/// Create the station controller and the DHCP network stack.
pub fn init(
    radio: &'static esp_radio::Controller<'static>,
    wifi: WIFI<'static>,
    settings: Settings,
) -> (WifiController<'static>, Stack<'static>, Runner<'static, WifiDevice<'static>>) {
    let (mut controller, interfaces) =
        esp_radio::wifi::new(radio, wifi, Default::default()).expect("wifi init failed");

    let client = ClientConfig::default()
        .with_ssid(String::from(settings.wifi_ssid))
        .with_password(String::from(settings.wifi_password));
    if let Err(e) = controller.set_config(&ModeConfig::Client(client)) {
        error!("wifi: station config rejected {:?}", defmt::Debug2Format(&e));
    }

    event::StaDisconnected::update_handler(|ev| {
        LAST_REASON.store(ev.reason(), Ordering::Relaxed);
    });

    let rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        NetConfig::dhcpv4(Default::default()),
        NET_RESOURCES.init(StackResources::new()),
        seed,
    );
    (controller, stack, runner)
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}

#[embassy_executor::task]
pub async fn station_task(mut controller: WifiController<'static>, stack: Stack<'static>) -> ! {
    if let Err(e) = controller.start_async().await {
        error!("wifi: start failed {:?}", defmt::Debug2Format(&e));
    } else {
        info!("wifi: station started");
        EVENTS.send(Event::Wifi(WifiEvent::StaStart)).await;
    }

    loop {
        match REQUESTS.receive().await {
            StationRequest::Connect => {
                let reason = associate(&mut controller, stack).await;
                EVENTS
                    .send(Event::Wifi(WifiEvent::StaDisconnected { reason }))
                    .await;
            }
            StationRequest::Disconnect => {
                if let Err(e) = controller.disconnect_async().await {
                    warn!("wifi: disconnect failed {:?}", defmt::Debug2Format(&e));
                }
            }
        }
    }
}

/// Associate, report the address once DHCP binds and hold until the link
/// drops. Returns the disconnect reason.
async fn associate(controller: &mut WifiController<'static>, stack: Stack<'static>) -> u8 {
    LAST_REASON.store(REASON_UNSPECIFIED, Ordering::Relaxed);
    if let Err(e) = controller.connect_async().await {
        warn!("wifi: association failed {:?}", defmt::Debug2Format(&e));
        Timer::after(Duration::from_millis(RETRY_DELAY_MS)).await;
        return LAST_REASON.load(Ordering::Relaxed);
    }
    info!("wifi: associated, waiting for DHCP");

    let bound = select(
        stack.wait_config_up(),
        controller.wait_for_event(RadioEvent::StaDisconnected),
    )
    .await;
    if let Either::First(()) = bound {
        match stack.config_v4() {
            Some(cfg) => {
                let ip = cfg.address.address().octets();
                EVENTS.send(Event::Wifi(WifiEvent::GotIp { ip })).await;
            }
            None => warn!("wifi: link up without an IPv4 address"),
        }
        controller.wait_for_event(RadioEvent::StaDisconnected).await;
    }
    LAST_REASON.load(Ordering::Relaxed)
}
