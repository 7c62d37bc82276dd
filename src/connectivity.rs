//! Connectivity flags shared by the WiFi, MQTT and scan tasks.
//!
//! Two bits: link up (IP acquired) and session up (broker connected).
//! Writers flip bits and raise a [`Signal`]; the scan task blocks in
//! [`Connectivity::wait_ready`] until both are set or its timeout fires.

use core::cell::Cell;
use core::future::Future;
use core::pin::pin;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::error::Error;

/// Snapshot of the connectivity bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectivityFlags(u8);

impl ConnectivityFlags {
    pub const LINK_UP: u8 = 1 << 0;
    pub const SESSION_UP: u8 = 1 << 1;

    pub const fn new(link_up: bool, session_up: bool) -> Self {
        let mut bits = 0;
        if link_up {
            bits |= Self::LINK_UP;
        }
        if session_up {
            bits |= Self::SESSION_UP;
        }
        Self(bits)
    }

    pub const fn link_up(self) -> bool {
        self.0 & Self::LINK_UP != 0
    }

    pub const fn session_up(self) -> bool {
        self.0 & Self::SESSION_UP != 0
    }

    /// Both bits set: telemetry can flow.
    pub const fn is_ready(self) -> bool {
        self.link_up() && self.session_up()
    }
}

pub struct Connectivity<M: RawMutex> {
    flags: Mutex<M, Cell<ConnectivityFlags>>,
    changed: Signal<M, ()>,
}

impl<M: RawMutex> Connectivity<M> {
    pub const fn new() -> Self {
        Self {
            flags: Mutex::new(Cell::new(ConnectivityFlags(0))),
            changed: Signal::new(),
        }
    }

    pub fn flags(&self) -> ConnectivityFlags {
        self.flags.lock(|f| f.get())
    }

    pub fn set_link_up(&self) {
        self.update(|bits| bits | ConnectivityFlags::LINK_UP);
    }

    /// Link lost: the session cannot outlive it, so both bits drop.
    pub fn clear_all(&self) {
        self.update(|_| 0);
    }

    /// Set the session bit. Refused (returns `false`) while the link is
    /// down, so a stale broker callback cannot mark the session up.
    pub fn set_session_up(&self) -> bool {
        let accepted = self.flags.lock(|f| {
            let cur = f.get();
            if !cur.link_up() {
                return false;
            }
            f.set(ConnectivityFlags(cur.0 | ConnectivityFlags::SESSION_UP));
            true
        });
        if accepted {
            self.changed.signal(());
        } else {
            warn!("connectivity: session up ignored, link is down");
        }
        accepted
    }

    pub fn clear_session_up(&self) {
        self.update(|bits| bits & !ConnectivityFlags::SESSION_UP);
    }

    /// Wait until both bits are set, or until `timeout` completes.
    ///
    /// A single attempt: callers loop on [`Error::Timeout`].
    pub async fn wait_ready<F>(&self, timeout: F) -> Result<ConnectivityFlags, Error>
    where
        F: Future<Output = ()>,
    {
        let mut timeout = pin!(timeout);
        loop {
            let flags = self.flags();
            if flags.is_ready() {
                return Ok(flags);
            }
            // Any write after the check above leaves the signal raised,
            // so this wait returns at once instead of missing it.
            match select(self.changed.wait(), timeout.as_mut()).await {
                Either::First(()) => continue,
                Either::Second(()) => return Err(Error::Timeout),
            }
        }
    }

    fn update(&self, f: impl FnOnce(u8) -> u8) {
        self.flags.lock(|cell| {
            let cur = cell.get();
            cell.set(ConnectivityFlags(f(cur.0)));
        });
        self.changed.signal(());
    }
}

impl<M: RawMutex> Default for Connectivity<M> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::future::{pending, ready};
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Flags = Connectivity<CriticalSectionRawMutex>;

    #[test]
    fn test_flags_start_clear() {
        let c = Flags::new();
        assert_eq!(c.flags(), ConnectivityFlags::default());
        assert!(!c.flags().is_ready());
    }

    #[test]
    fn test_session_requires_link() {
        let c = Flags::new();
        assert!(!c.set_session_up());
        assert!(!c.flags().session_up());

        c.set_link_up();
        assert!(c.set_session_up());
        assert!(c.flags().is_ready());
    }

    #[test]
    fn test_clear_all_drops_both() {
        let c = Flags::new();
        c.set_link_up();
        c.set_session_up();
        c.clear_all();
        assert!(!c.flags().link_up());
        assert!(!c.flags().session_up());
    }

    #[test]
    fn test_clear_session_keeps_link() {
        let c = Flags::new();
        c.set_link_up();
        c.set_session_up();
        c.clear_session_up();
        assert!(c.flags().link_up());
        assert!(!c.flags().session_up());
    }

    #[test]
    fn test_wait_ready_returns_when_set() {
        let c = Flags::new();
        c.set_link_up();
        c.set_session_up();
        let flags = block_on(c.wait_ready(pending::<()>())).unwrap();
        assert!(flags.is_ready());
    }

    #[test]
    fn test_wait_ready_times_out() {
        let c = Flags::new();
        c.set_link_up();
        assert_eq!(block_on(c.wait_ready(ready(()))), Err(Error::Timeout));
    }

    #[test]
    fn test_stale_signal_does_not_report_ready() {
        let c = Flags::new();
        // Raises the signal without making the flags ready.
        c.set_link_up();
        assert_eq!(block_on(c.wait_ready(ready(()))), Err(Error::Timeout));
    }

    #[test]
    fn test_flags_constructor() {
        let f = ConnectivityFlags::new(false, true);
        assert!(!f.link_up());
        assert!(f.session_up());
        assert!(!f.is_ready());
        assert!(ConnectivityFlags::new(true, true).is_ready());
    }
}
