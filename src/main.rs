//! ble-tracker firmware - ESP32 entry point.
//!
//! Task layout:
//!   - `net_task`        embassy-net stack runner
//!   - `station_task`    WiFi station, acts on association requests
//!   - `session_task`    MQTT session over TCP, reconnects after loss
//!   - `runner_task`     trouble-host HCI runner, forwards advertising reports
//!   - `central_task`    scan windows and the outbound GATT connection
//!   - `gatt_task`       GATT client requests on the open link
//!   - `ota_task`        resolves firmware-update payloads
//!   - `dispatcher_task` owns the `Tracker` and every state machine
//!
//! `main` itself becomes the scan scheduler: it waits for WiFi and MQTT to
//! be up, then posts a scan tick at most once per period.

#![no_std]
#![no_main]

extern crate alloc;

mod firmware;

use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use static_cell::StaticCell;

use esp_backtrace as _;
use esp_println as _;

use ble_tracker::ble::scanner::TickPacer;
use ble_tracker::config::{Settings, CONNECTIVITY_WAIT_MS, SCAN_PERIOD_MS};
use ble_tracker::{Event, Tracker};

use firmware::ble_host::{self, RadioBle};
use firmware::mqtt::{self, BrokerLink};
use firmware::ota::{self, OtaHandoff};
use firmware::wifi::{self, Station};
use firmware::{CONNECTIVITY, EVENTS};

esp_bootloader_esp_idf::esp_app_desc!();

const SETTINGS: Settings = Settings::from_env();

/// Heap for the radio drivers.
const HEAP_SIZE: usize = 72 * 1024;

type FirmwareTracker =
    Tracker<'static, CriticalSectionRawMutex, RadioBle, Station, BrokerLink, OtaHandoff>;

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(#[unsafe(link_section = ".dram2_uninit")] size: HEAP_SIZE);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    info!("ble-tracker starting as {}", SETTINGS.esp_name);

    let radio: &'static esp_radio::Controller<'static> =
        RADIO.init(esp_radio::init().expect("radio init failed"));

    let (controller, stack, runner) = wifi::init(radio, peripherals.WIFI, SETTINGS);
    spawner.must_spawn(wifi::net_task(runner));
    spawner.must_spawn(wifi::station_task(controller, stack));
    spawner.must_spawn(mqtt::session_task(stack));

    let ble = ble_host::init(radio, peripherals.BT, SETTINGS);
    spawner.must_spawn(ble_host::runner_task(ble.runner));
    spawner.must_spawn(ble_host::central_task(ble.central, ble.peer, ble.links));
    spawner.must_spawn(ble_host::gatt_task(ble.stack, ble.links));

    spawner.must_spawn(ota::ota_task());
    spawner.must_spawn(dispatcher_task());

    let mut pacer = TickPacer::new(SCAN_PERIOD_MS);
    loop {
        while CONNECTIVITY
            .wait_ready(Timer::after(Duration::from_millis(CONNECTIVITY_WAIT_MS)))
            .await
            .is_err()
        {}
        let now = Instant::now().as_millis();
        if pacer.try_tick(now) {
            EVENTS.send(Event::ScanTick).await;
        }
        Timer::at(Instant::from_millis(pacer.next_due_ms(now))).await;
    }
}

#[embassy_executor::task]
async fn dispatcher_task() -> ! {
    let mut tracker: FirmwareTracker =
        Tracker::new(SETTINGS, &CONNECTIVITY, RadioBle, Station, BrokerLink, OtaHandoff);
    if let Err(e) = tracker.start() {
        error!("tracker: start failed {}", e);
    }
    loop {
        let event = EVENTS.receive().await;
        tracker.dispatch(event);
    }
}
