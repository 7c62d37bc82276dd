//! BLE scan scheduler - periodic passive scan windows.
//!
//! Pure state machine. The firmware's scan task waits for connectivity,
//! then feeds a tick every [`SCAN_PERIOD_MS`](crate::config::SCAN_PERIOD_MS);
//! the scheduler answers with a start command when a window may open.
//! The controller stops each window on its own after the duration.

use crate::config::SCAN_DURATION_SECS;
use crate::connectivity::ConnectivityFlags;
use crate::error::Status;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanState {
    /// Scan parameters not yet accepted by the controller.
    Idle,
    WaitingForConnectivity,
    Scanning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanCommand {
    Start { duration_secs: u32 },
}

pub struct ScanScheduler {
    state: ScanState,
    window_open: bool,
    windows_started: u32,
}

impl ScanScheduler {
    pub const fn new() -> Self {
        Self {
            state: ScanState::Idle,
            window_open: false,
            windows_started: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn window_open(&self) -> bool {
        self.window_open
    }

    /// Number of start commands issued so far.
    pub fn windows_started(&self) -> u32 {
        self.windows_started
    }

    /// Scan parameters accepted: start waiting for connectivity.
    pub fn arm(&mut self) {
        if self.state == ScanState::Idle {
            info!("scan: armed, waiting for connectivity");
            self.state = ScanState::WaitingForConnectivity;
        }
    }

    /// Periodic tick. Returns a start command only when armed, both
    /// connectivity bits are set and no window is open.
    pub fn on_tick(&mut self, flags: ConnectivityFlags) -> Option<ScanCommand> {
        if self.state == ScanState::Idle {
            debug!("scan: tick before scan params set");
            return None;
        }
        if !flags.is_ready() {
            debug!("scan: waiting for connectivity {}", flags);
            self.state = ScanState::WaitingForConnectivity;
            return None;
        }
        if self.window_open {
            // A lost window-complete event must not stall scanning for good.
            warn!("scan: previous window still open, skipping tick");
            self.window_open = false;
            return None;
        }
        self.state = ScanState::Scanning;
        self.window_open = true;
        self.windows_started = self.windows_started.wrapping_add(1);
        Some(ScanCommand::Start {
            duration_secs: SCAN_DURATION_SECS,
        })
    }

    /// The controller refused the start request outright.
    pub fn on_start_rejected(&mut self) {
        error!("scan: start request rejected, retrying next period");
        self.window_open = false;
    }

    pub fn on_scan_started(&mut self, status: Status) {
        if status.is_ok() {
            info!("scan: window open ({} s)", SCAN_DURATION_SECS);
        } else {
            error!("scan: start failed, status {}", status.0);
            self.window_open = false;
        }
    }

    pub fn on_window_complete(&mut self) {
        debug!("scan: window closed");
        self.window_open = false;
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadlines for the periodic scan tick.
///
/// Ticks are at least one period apart. A connectivity wait that overruns
/// the deadline moves the schedule to when the wait ended, so the missed
/// periods are dropped instead of replayed back to back.
pub struct TickPacer {
    period_ms: u64,
    last_ms: Option<u64>,
}

impl TickPacer {
    pub const fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_ms: None,
        }
    }

    /// Whether a tick may go out at `now_ms`; records it if so.
    pub fn try_tick(&mut self, now_ms: u64) -> bool {
        match self.last_ms {
            Some(last) if now_ms < last.saturating_add(self.period_ms) => false,
            _ => {
                self.last_ms = Some(now_ms);
                true
            }
        }
    }

    /// When the next tick is due, in the same clock as [`try_tick`](Self::try_tick).
    pub fn next_due_ms(&self, now_ms: u64) -> u64 {
        match self.last_ms {
            Some(last) => last.saturating_add(self.period_ms),
            None => now_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: ConnectivityFlags = ConnectivityFlags::new(true, true);

    #[test]
    fn test_idle_never_scans() {
        let mut s = ScanScheduler::new();
        assert_eq!(s.on_tick(READY), None);
        assert_eq!(s.state(), ScanState::Idle);
    }

    #[test]
    fn test_no_scan_without_both_flags() {
        let mut s = ScanScheduler::new();
        s.arm();
        for flags in [
            ConnectivityFlags::new(false, false),
            ConnectivityFlags::new(true, false),
            ConnectivityFlags::new(false, true),
        ] {
            assert_eq!(s.on_tick(flags), None);
            assert_eq!(s.state(), ScanState::WaitingForConnectivity);
        }
        assert_eq!(s.windows_started(), 0);
    }

    #[test]
    fn test_ready_tick_starts_window() {
        let mut s = ScanScheduler::new();
        s.arm();
        assert_eq!(
            s.on_tick(READY),
            Some(ScanCommand::Start { duration_secs: 3 })
        );
        assert_eq!(s.state(), ScanState::Scanning);
        assert!(s.window_open());
        s.on_scan_started(Status::SUCCESS);
        assert!(s.window_open());
        s.on_window_complete();
        assert!(!s.window_open());
        assert!(s.on_tick(READY).is_some());
        assert_eq!(s.windows_started(), 2);
    }

    #[test]
    fn test_failed_start_retries_next_period() {
        let mut s = ScanScheduler::new();
        s.arm();
        assert!(s.on_tick(READY).is_some());
        s.on_scan_started(Status::ERROR);
        assert!(!s.window_open());
        assert!(s.on_tick(READY).is_some());
    }

    #[test]
    fn test_rejected_start_retries_next_period() {
        let mut s = ScanScheduler::new();
        s.arm();
        assert!(s.on_tick(READY).is_some());
        s.on_start_rejected();
        assert!(s.on_tick(READY).is_some());
    }

    #[test]
    fn test_open_window_skips_one_tick() {
        let mut s = ScanScheduler::new();
        s.arm();
        assert!(s.on_tick(READY).is_some());
        // Window-complete never arrived.
        assert_eq!(s.on_tick(READY), None);
        assert!(s.on_tick(READY).is_some());
    }

    #[test]
    fn test_connectivity_loss_returns_to_waiting() {
        let mut s = ScanScheduler::new();
        s.arm();
        assert!(s.on_tick(READY).is_some());
        s.on_window_complete();
        assert_eq!(s.on_tick(ConnectivityFlags::new(true, false)), None);
        assert_eq!(s.state(), ScanState::WaitingForConnectivity);
    }

    #[test]
    fn test_arm_is_idempotent() {
        let mut s = ScanScheduler::new();
        s.arm();
        assert!(s.on_tick(READY).is_some());
        s.arm();
        assert_eq!(s.state(), ScanState::Scanning);
    }

    const PERIOD: u64 = 30_000;

    /// The scan task's loop: wait for connectivity (`stall` ms past the
    /// deadline on the given rounds), tick if due, sleep until the next due
    /// time. Returns the times at which ticks went out.
    fn run_ticks(rounds: usize, stalls: &[(usize, u64)]) -> std::vec::Vec<u64> {
        let mut pacer = TickPacer::new(PERIOD);
        let mut now = 0u64;
        let mut ticks = std::vec::Vec::new();
        for round in 0..rounds {
            if let Some((_, stall)) = stalls.iter().find(|(r, _)| *r == round) {
                now += stall;
            }
            if pacer.try_tick(now) {
                ticks.push(now);
            }
            now = now.max(pacer.next_due_ms(now));
        }
        ticks
    }

    #[test]
    fn test_pacer_ticks_once_per_period() {
        let ticks = run_ticks(5, &[]);
        assert_eq!(ticks, [0, 30_000, 60_000, 90_000, 120_000]);
    }

    #[test]
    fn test_pacer_drops_missed_periods_after_stall() {
        // Connectivity lost for ten periods during the second round.
        let ticks = run_ticks(6, &[(1, 10 * PERIOD + 7)]);
        for pair in ticks.windows(2) {
            assert!(pair[1] - pair[0] >= PERIOD, "ticks {:?}", ticks);
        }
        assert_eq!(ticks[1], 30_000 + 10 * PERIOD + 7);
    }

    #[test]
    fn test_stall_yields_one_start_per_period() {
        let mut pacer = TickPacer::new(PERIOD);
        let mut s = ScanScheduler::new();
        s.arm();
        assert!(pacer.try_tick(0));
        assert!(s.on_tick(READY).is_some());
        s.on_window_complete();

        // Connectivity returns long after the deadline; the loop may wake
        // several times in quick succession but only one tick is due.
        let back = 12 * PERIOD;
        let mut starts = 0;
        for now in [back, back + 1, back + 5, back + 20] {
            if pacer.try_tick(now) && s.on_tick(READY).is_some() {
                starts += 1;
            }
        }
        assert_eq!(starts, 1);
        assert_eq!(pacer.next_due_ms(back + 20), back + PERIOD);
    }
}
