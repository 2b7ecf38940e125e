#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared link and acquisition counters.
//!
//! Lightweight atomics let the USB, link and acquisition tasks account for
//! traffic without sharing mutable state; the `status` line reads a
//! [`CounterSnapshot`].

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Point-in-time copy of [`LinkCounters`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct CounterSnapshot {
    pub reports_sent: u32,
    pub reports_dropped: u32,
    pub commands_rejected: u32,
    pub host_attached: bool,
}

pub struct LinkCounters {
    reports_sent: AtomicU32,
    reports_dropped: AtomicU32,
    commands_rejected: AtomicU32,
    host_attached: AtomicBool,
}

impl LinkCounters {
    pub const fn new() -> Self {
        Self {
            reports_sent: AtomicU32::new(0),
            reports_dropped: AtomicU32::new(0),
            commands_rejected: AtomicU32::new(0),
            host_attached: AtomicBool::new(false),
        }
    }

    /// Counts a report line queued towards the host.
    pub fn record_report_sent(&self) {
        self.reports_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a report lost because the outbound queue was full or the host
    /// was detached.
    pub fn record_report_dropped(&self) {
        self.reports_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the cached host attachment flag (DTR asserted).
    pub fn set_host_attached(&self, attached: bool) {
        self.host_attached.store(attached, Ordering::Relaxed);
    }

    pub fn host_attached(&self) -> bool {
        self.host_attached.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            reports_sent: self.reports_sent.load(Ordering::Relaxed),
            reports_dropped: self.reports_dropped.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            host_attached: self.host_attached(),
        }
    }
}

impl Default for LinkCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_traffic() {
        let counters = LinkCounters::new();
        counters.record_report_sent();
        counters.record_report_sent();
        counters.record_report_dropped();
        counters.set_host_attached(true);

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                reports_sent: 2,
                reports_dropped: 1,
                commands_rejected: 0,
                host_attached: true,
            }
        );
    }
}
