//! Absolute-tick timer queue standing in for the MCU timer subsystem.
//!
//! Each handle has at most one pending registration. Registrations fire in
//! tick order; ties fire in the order they were registered.

use core::fmt;

use heapless::Vec;

use crate::clock::Tick;

/// Errors reported by [`TimerQueue`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    /// Every timer slot is in use.
    QueueFull,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::QueueFull => f.write_str("timer queue full"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Registration<H> {
    handle: H,
    wake: Tick,
    sequence: u32,
}

/// Pending wakes ordered by tick, then registration order.
#[derive(Clone, Debug)]
pub struct TimerQueue<H, const CAPACITY: usize> {
    entries: Vec<Registration<H>, CAPACITY>,
    next_sequence: u32,
}

impl<H, const CAPACITY: usize> TimerQueue<H, CAPACITY>
where
    H: Copy + Eq,
{
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Registers `handle` to fire at `wake`, replacing any earlier registration.
    pub fn schedule(&mut self, handle: H, wake: Tick) -> Result<(), TimerError> {
        self.cancel(handle);
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.entries
            .push(Registration {
                handle,
                wake,
                sequence,
            })
            .map_err(|_| TimerError::QueueFull)
    }

    /// Removes the pending registration for `handle`. Returns `true` if one existed.
    pub fn cancel(&mut self, handle: H) -> bool {
        match self.entries.iter().position(|entry| entry.handle == handle) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Returns the wake tick registered for `handle`.
    #[must_use]
    pub fn pending(&self, handle: H) -> Option<Tick> {
        self.entries
            .iter()
            .find(|entry| entry.handle == handle)
            .map(|entry| entry.wake)
    }

    /// Earliest pending registration, if any.
    #[must_use]
    pub fn next_wake(&self) -> Option<Tick> {
        self.earliest().map(|index| self.entries[index].wake)
    }

    /// Removes and returns the earliest registration due at or before `now`.
    pub fn pop_due(&mut self, now: Tick) -> Option<(H, Tick)> {
        let index = self.earliest()?;
        let entry = self.entries[index];
        if now.is_before(entry.wake) {
            return None;
        }
        self.entries.swap_remove(index);
        Some((entry.handle, entry.wake))
    }

    /// Number of pending registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn earliest(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            best = match best {
                Some(current) if !fires_before(entry, &self.entries[current]) => Some(current),
                _ => Some(index),
            };
        }
        best
    }
}

impl<H, const CAPACITY: usize> Default for TimerQueue<H, CAPACITY>
where
    H: Copy + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}

fn fires_before<H>(candidate: &Registration<H>, current: &Registration<H>) -> bool {
    if candidate.wake == current.wake {
        candidate
            .sequence
            .wrapping_sub(current.sequence)
            .cast_signed()
            < 0
    } else {
        candidate.wake.is_before(current.wake)
    }
}
