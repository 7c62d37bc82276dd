//! Target-side drivers and the adapters that connect them to the core.
//!
//! Every driver task turns its callbacks into [`Event`]s on [`EVENTS`]; the
//! dispatcher task is the only consumer. Adapters handed to the `Tracker`
//! never block: each call queues a request for the owning driver task.

pub mod ble_host;
pub mod mqtt;
pub mod ota;
pub mod wifi;

use defmt::warn;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use ble_tracker::{Connectivity, Event};

/// Depth of the dispatcher queue.
pub const EVENT_QUEUE_DEPTH: usize = 12;

pub static EVENTS: Channel<CriticalSectionRawMutex, Event, EVENT_QUEUE_DEPTH> = Channel::new();

pub static CONNECTIVITY: Connectivity<CriticalSectionRawMutex> = Connectivity::new();

/// Queue an event from a context that cannot wait (radio callbacks).
///
/// A full queue drops the event; scan results are the usual casualty.
pub fn post(event: Event) {
    if EVENTS.try_send(event).is_err() {
        warn!("events: queue full, event dropped");
    }
}
