//! Tick arithmetic and host-parameter conversion.
//!
//! The MCU timer is a free-running 32-bit counter, so every absolute time in
//! the driver is a wrapping [`Tick`]. Ordering is only meaningful between
//! ticks less than half the counter range apart, which holds for every delay
//! the driver ever schedules.

use core::fmt;
use core::ops::{Add, Sub};

/// Relative tick count.
pub type Ticks = u32;

/// Absolute timer value on the 32-bit wrapping MCU clock.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tick(u32);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Wraps a raw timer reading.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw timer value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` when `self` falls strictly before `other` on the wrapping clock.
    #[must_use]
    pub const fn is_before(self, other: Tick) -> bool {
        self.0.wrapping_sub(other.0).cast_signed() < 0
    }

    /// Returns the later of the two ticks.
    #[must_use]
    pub const fn latest(self, other: Tick) -> Tick {
        if self.is_before(other) { other } else { self }
    }

    /// Ticks elapsed from `earlier` to `self`, or zero when `earlier` is in the future.
    #[must_use]
    pub const fn saturating_since(self, earlier: Tick) -> Ticks {
        if self.is_before(earlier) {
            0
        } else {
            self.0.wrapping_sub(earlier.0)
        }
    }
}

impl Add<Ticks> for Tick {
    type Output = Tick;

    fn add(self, rhs: Ticks) -> Self::Output {
        Tick(self.0.wrapping_add(rhs))
    }
}

impl Sub<Tick> for Tick {
    type Output = Ticks;

    fn sub(self, rhs: Tick) -> Self::Output {
        self.0.wrapping_sub(rhs.0)
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of timer edges in one HX711 data frame (two per data bit).
pub const DATA_EDGES: u32 = 48;

/// Extra edges reserved on top of a frame to cover the ready check overhead.
pub const RESERVATION_SLACK_EDGES: u32 = 3;

/// Total step count for a frame with the given number of gain pulses.
#[must_use]
pub const fn frame_edges(gain_pulses: u8) -> u32 {
    DATA_EDGES + 2 * gain_pulses as u32
}

/// Worst-case bus occupancy of one conversion, used for bus reservations.
#[must_use]
pub const fn conversion_window(bit_delay: Ticks, gain_pulses: u8) -> Ticks {
    bit_delay.saturating_mul(frame_edges(gain_pulses) + RESERVATION_SLACK_EDGES)
}

/// Errors raised while converting host parameters into ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockError {
    /// A divisor parameter was zero.
    ZeroDivisor(&'static str),
    /// The parameter converted to zero ticks, which would stall the step loop.
    ZeroDelay(&'static str),
}

impl fmt::Display for ClockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockError::ZeroDivisor(name) => write!(f, "{name} must be non-zero"),
            ClockError::ZeroDelay(name) => write!(f, "{name} rounds to zero ticks"),
        }
    }
}

/// Timer frequency used to translate host parameters into ticks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    frequency_hz: u32,
}

impl ClockConfig {
    /// Creates a clock description for a timer running at `frequency_hz`.
    #[must_use]
    pub const fn new(frequency_hz: u32) -> Self {
        Self { frequency_hz }
    }

    /// Returns the timer frequency.
    #[must_use]
    pub const fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// Converts a microsecond delay into ticks.
    #[must_use]
    pub fn ticks_from_us(&self, micros: u32) -> Ticks {
        let ticks = u64::from(micros) * u64::from(self.frequency_hz) / 1_000_000;
        Ticks::try_from(ticks).unwrap_or(Ticks::MAX)
    }

    /// Period in ticks for a rate expressed as "events per second".
    pub fn period_from_rate(&self, name: &'static str, per_second: u32) -> Result<Ticks, ClockError> {
        if per_second == 0 {
            return Err(ClockError::ZeroDivisor(name));
        }
        Ok(self.frequency_hz / per_second)
    }

    /// Inter-edge delay in ticks; zero is rejected so each step advances time.
    pub fn bit_delay(&self, name: &'static str, micros: u32) -> Result<Ticks, ClockError> {
        match self.ticks_from_us(micros) {
            0 => Err(ClockError::ZeroDelay(name)),
            ticks => Ok(ticks),
        }
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_HZ)
    }
}

/// Timer frequency assumed when the target does not provide one.
pub const DEFAULT_CLOCK_HZ: u32 = 1_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_survives_wraparound() {
        let before = Tick::new(u32::MAX - 5);
        let after = before + 10;
        assert_eq!(after.raw(), 4);
        assert!(before.is_before(after));
        assert!(!after.is_before(before));
        assert_eq!(after - before, 10);
        assert_eq!(after.saturating_since(before), 10);
        assert_eq!(before.saturating_since(after), 0);
    }

    #[test]
    fn conversion_window_covers_frame_and_slack() {
        assert_eq!(frame_edges(1), 50);
        assert_eq!(frame_edges(3), 54);
        assert_eq!(conversion_window(10, 1), 530);
        assert_eq!(conversion_window(u32::MAX, 3), u32::MAX);
    }

    #[test]
    fn host_parameters_convert_to_ticks() {
        let clock = ClockConfig::new(48_000_000);
        assert_eq!(clock.ticks_from_us(1), 48);
        assert_eq!(clock.period_from_rate("sps", 10), Ok(4_800_000));
        assert_eq!(
            clock.period_from_rate("sps", 0),
            Err(ClockError::ZeroDivisor("sps"))
        );
        assert_eq!(clock.bit_delay("comm_delay", 2), Ok(96));
    }

    #[test]
    fn sub_microsecond_clock_rejects_zero_delay() {
        let clock = ClockConfig::new(100_000);
        assert_eq!(
            clock.bit_delay("comm_delay", 1),
            Err(ClockError::ZeroDelay("comm_delay"))
        );
    }
}
