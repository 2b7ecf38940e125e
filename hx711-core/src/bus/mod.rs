//! Virtual-time arbitration for devices sharing one clock/data bus.
//!
//! Step functions run inside timer callbacks and can never block, so the
//! shared bus is not protected by a lock. Instead every contender reserves a
//! worst-case conversion window in the future: the first arrival acquires
//! the bus at once, later arrivals are parked at the end of the last
//! reserved window and extend it by their own window. Arrival order is the
//! service order.

use crate::clock::{Tick, Ticks};

/// A device's relationship with the bus reservation queue.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusClaim {
    /// Not holding or waiting for the bus.
    #[default]
    Idle,
    /// Holds a reserved slot that has not started yet.
    Queued,
    /// Owns the bus for the current conversion.
    Held,
}

impl BusClaim {
    /// Returns `true` while the claim counts towards [`BusArbiter::pending`].
    #[must_use]
    pub const fn is_outstanding(self) -> bool {
        matches!(self, BusClaim::Queued | BusClaim::Held)
    }
}

/// Result of asking the arbiter for the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Admission {
    /// The caller already owned the bus.
    AlreadyHeld,
    /// The caller owns the bus starting now.
    Acquired,
    /// The bus is contended; the caller must sleep until `slot` and ask again.
    Queued { slot: Tick },
}

/// Process-wide reservation state for one physical bus.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusArbiter {
    reserved_until: Tick,
    pending: u32,
}

impl BusArbiter {
    /// Creates an uncontended arbiter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reserved_until: Tick::ZERO,
            pending: 0,
        }
    }

    /// End of the last reserved conversion window.
    #[must_use]
    pub const fn reserved_until(&self) -> Tick {
        self.reserved_until
    }

    /// Number of devices holding or waiting for a reservation.
    #[must_use]
    pub const fn pending(&self) -> u32 {
        self.pending
    }

    /// Returns `true` when another device holds or waits for the bus.
    #[must_use]
    pub const fn is_contended(&self) -> bool {
        self.pending > 0
    }

    /// Acquires the bus or joins the reservation queue.
    ///
    /// `window` is the caller's worst-case conversion duration. A queued
    /// caller that wakes at its slot converts its reservation into the held
    /// lock without being counted a second time.
    pub fn request_or_acquire(&mut self, claim: &mut BusClaim, now: Tick, window: Ticks) -> Admission {
        match *claim {
            BusClaim::Held => Admission::AlreadyHeld,
            BusClaim::Queued => {
                *claim = BusClaim::Held;
                Admission::Acquired
            }
            BusClaim::Idle if self.pending == 0 => {
                self.pending = 1;
                self.reserved_until = now + window;
                *claim = BusClaim::Held;
                Admission::Acquired
            }
            BusClaim::Idle => {
                let slot = self.reserved_until;
                self.pending = self.pending.saturating_add(1);
                self.reserved_until = slot + window;
                *claim = BusClaim::Queued;
                Admission::Queued { slot }
            }
        }
    }

    /// Gives up a held or queued reservation.
    ///
    /// Returns `true` when the claim was outstanding and has been released.
    pub fn release(&mut self, claim: &mut BusClaim) -> bool {
        if !claim.is_outstanding() {
            return false;
        }
        *claim = BusClaim::Idle;
        self.pending = self.pending.saturating_sub(1);
        true
    }
}
