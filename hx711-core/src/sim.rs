//! Behavioural model of the HX711 used by tests and the emulator.
//!
//! The model follows the datasheet timing at the granularity the driver can
//! observe: DOUT stays high while a conversion is running and drops low once
//! a result is ready. Each rising PD_SCK edge shifts the next of 24 bits onto
//! DOUT, most significant first. Pulses beyond the 24th select the gain for
//! the following conversion, which starts when the clock idles low again.

use core::fmt;

use heapless::{Deque, Vec};

use crate::clock::{Tick, Ticks};
use crate::device::Sample;
use crate::gpio::{Gpio, GpioError, PinId};

/// Conversion results queued ahead of time.
pub const SAMPLE_QUEUE_DEPTH: usize = 16;

const DATA_PULSES: u8 = 24;
const RAW_MASK: u32 = 0x00FF_FFFF;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ChipState {
    Converting { ready_at: Tick },
    Ready,
    Shifting { pulses: u8 },
}

/// One simulated converter.
#[derive(Clone, Debug)]
pub struct SimulatedHx711 {
    state: ChipState,
    clock_level: bool,
    last_falling_edge: Tick,
    conversion_ticks: Ticks,
    latched: u32,
    queued: Deque<Sample, SAMPLE_QUEUE_DEPTH>,
    last_value: Sample,
    stalled: bool,
    gain_pulses: u8,
    frames: u32,
}

impl SimulatedHx711 {
    /// Creates a chip whose first conversion completes at `now + conversion_ticks`.
    #[must_use]
    pub fn new(now: Tick, conversion_ticks: Ticks) -> Self {
        Self {
            state: ChipState::Converting {
                ready_at: now + conversion_ticks,
            },
            clock_level: false,
            last_falling_edge: now,
            conversion_ticks,
            latched: 0,
            queued: Deque::new(),
            last_value: 0,
            stalled: false,
            gain_pulses: 1,
            frames: 0,
        }
    }

    /// Queues the result of a future conversion.
    ///
    /// Once the queue is drained the chip keeps repeating the last value.
    pub fn push_value(&mut self, value: Sample) -> Result<(), Sample> {
        self.queued.push_back(value)
    }

    /// Holds DOUT high forever, as a disconnected or unpowered chip would.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    #[must_use]
    pub const fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Gain pulses latched at the end of the most recent frame.
    #[must_use]
    pub const fn gain_pulses(&self) -> u8 {
        self.gain_pulses
    }

    /// Last level applied to PD_SCK.
    #[must_use]
    pub const fn clock_level(&self) -> bool {
        self.clock_level
    }

    /// Number of frames clocked out completely.
    #[must_use]
    pub const fn frames(&self) -> u32 {
        self.frames
    }

    /// Level currently presented on DOUT.
    pub fn data_level(&mut self, now: Tick) -> bool {
        if self.stalled {
            return true;
        }
        self.settle(now);
        match self.state {
            ChipState::Converting { .. } => true,
            ChipState::Ready => false,
            ChipState::Shifting { pulses } if (1..=DATA_PULSES).contains(&pulses) => {
                (self.latched >> (DATA_PULSES - pulses)) & 1 == 1
            }
            ChipState::Shifting { .. } => true,
        }
    }

    /// Applies a PD_SCK level.
    pub fn drive_clock(&mut self, level: bool, now: Tick) {
        let rising = level && !self.clock_level;
        let falling = !level && self.clock_level;
        self.clock_level = level;

        if falling {
            self.last_falling_edge = now;
        }
        if !rising || self.stalled {
            return;
        }
        self.state = match self.state {
            ChipState::Ready => ChipState::Shifting { pulses: 1 },
            ChipState::Shifting { pulses } => ChipState::Shifting {
                pulses: pulses.saturating_add(1),
            },
            converting @ ChipState::Converting { .. } => converting,
        };
    }

    fn settle(&mut self, now: Tick) {
        if let ChipState::Shifting { pulses } = self.state
            && pulses > DATA_PULSES
            && !self.clock_level
        {
            self.gain_pulses = pulses - DATA_PULSES;
            self.frames = self.frames.wrapping_add(1);
            self.state = ChipState::Converting {
                ready_at: self.last_falling_edge + self.conversion_ticks,
            };
        }

        if let ChipState::Converting { ready_at } = self.state
            && !now.is_before(ready_at)
        {
            if let Some(value) = self.queued.pop_front() {
                self.last_value = value;
            }
            self.latched = self.last_value.cast_unsigned() & RAW_MASK;
            self.state = ChipState::Ready;
        }
    }
}

/// Errors raised while wiring simulated chips.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SimError {
    /// A pin is already wired to another chip.
    PinInUse(PinId),
    /// No room for another chip.
    Full,
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::PinInUse(pin) => write!(f, "pin {pin} already wired"),
            SimError::Full => f.write_str("no free simulated channel"),
        }
    }
}

#[derive(Clone, Debug)]
struct Wiring {
    data_pin: PinId,
    clock_pin: PinId,
    chip: SimulatedHx711,
}

/// GPIO bank with simulated converters wired to pin pairs.
///
/// Pins that carry no chip are rejected at configuration time; reading an
/// unwired pin returns the pulled-up idle level.
#[derive(Clone, Debug)]
pub struct SimulatedGpio<const CHIPS: usize> {
    now: Tick,
    wiring: Vec<Wiring, CHIPS>,
}

impl<const CHIPS: usize> SimulatedGpio<CHIPS> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            now: Tick::ZERO,
            wiring: Vec::new(),
        }
    }

    /// Current simulated time.
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// Moves simulated time forward; pin accesses happen at this tick.
    pub fn advance(&mut self, now: Tick) {
        self.now = now;
    }

    /// Wires a new chip to `data_pin`/`clock_pin`.
    pub fn attach(
        &mut self,
        data_pin: PinId,
        clock_pin: PinId,
        conversion_ticks: Ticks,
    ) -> Result<&mut SimulatedHx711, SimError> {
        if let Some(pin) = [data_pin, clock_pin]
            .into_iter()
            .find(|pin| self.wired(*pin))
        {
            return Err(SimError::PinInUse(pin));
        }
        self.wiring
            .push(Wiring {
                data_pin,
                clock_pin,
                chip: SimulatedHx711::new(self.now, conversion_ticks),
            })
            .map_err(|_| SimError::Full)?;
        let index = self.wiring.len() - 1;
        Ok(&mut self.wiring[index].chip)
    }

    /// Chip whose DOUT is wired to `data_pin`.
    pub fn chip_mut(&mut self, data_pin: PinId) -> Option<&mut SimulatedHx711> {
        self.wiring
            .iter_mut()
            .find(|wiring| wiring.data_pin == data_pin)
            .map(|wiring| &mut wiring.chip)
    }

    #[must_use]
    pub fn chip(&self, data_pin: PinId) -> Option<&SimulatedHx711> {
        self.wiring
            .iter()
            .find(|wiring| wiring.data_pin == data_pin)
            .map(|wiring| &wiring.chip)
    }

    fn wired(&self, pin: PinId) -> bool {
        self.wiring
            .iter()
            .any(|wiring| wiring.data_pin == pin || wiring.clock_pin == pin)
    }
}

impl<const CHIPS: usize> Default for SimulatedGpio<CHIPS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CHIPS: usize> Gpio for SimulatedGpio<CHIPS> {
    fn configure_input(&mut self, pin: PinId, _pull_up: bool) -> Result<(), GpioError> {
        if self.wiring.iter().any(|wiring| wiring.data_pin == pin) {
            Ok(())
        } else {
            Err(GpioError::InvalidPin(pin))
        }
    }

    fn configure_output(&mut self, pin: PinId, initial: bool) -> Result<(), GpioError> {
        if !self.wiring.iter().any(|wiring| wiring.clock_pin == pin) {
            return Err(GpioError::InvalidPin(pin));
        }
        self.write_digital(pin, initial);
        Ok(())
    }

    fn read_digital(&mut self, pin: PinId) -> bool {
        let now = self.now;
        self.wiring
            .iter_mut()
            .find(|wiring| wiring.data_pin == pin)
            .is_none_or(|wiring| wiring.chip.data_level(now))
    }

    fn write_digital(&mut self, pin: PinId, level: bool) {
        let now = self.now;
        // Several chips may share one clock line.
        for wiring in self.wiring.iter_mut().filter(|wiring| wiring.clock_pin == pin) {
            wiring.chip.drive_clock(level, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_pulse(chip: &mut SimulatedHx711, now: Tick) {
        chip.drive_clock(true, now);
        chip.drive_clock(false, now + 1);
    }

    #[test]
    fn data_stays_high_until_conversion_completes() {
        let mut chip = SimulatedHx711::new(Tick::ZERO, 1_000);
        assert!(chip.data_level(Tick::new(999)));
        assert!(!chip.data_level(Tick::new(1_000)));
    }

    #[test]
    fn shifts_msb_first_and_latches_gain() {
        let mut chip = SimulatedHx711::new(Tick::ZERO, 10);
        chip.push_value(-2).expect("queue");
        let now = Tick::new(10);
        assert!(!chip.data_level(now));

        let mut bits = 0_u32;
        for _ in 0..24 {
            chip.drive_clock(true, now);
            bits = (bits << 1) | u32::from(chip.data_level(now));
            chip.drive_clock(false, now);
        }
        assert_eq!(bits, 0x00FF_FFFE);

        for _ in 0..3 {
            clock_pulse(&mut chip, Tick::new(20));
        }
        assert!(chip.data_level(Tick::new(21)));
        assert_eq!(chip.gain_pulses(), 3);
        assert_eq!(chip.frames(), 1);
        assert!(!chip.data_level(Tick::new(31)));
    }

    #[test]
    fn drained_queue_repeats_last_value() {
        let mut chip = SimulatedHx711::new(Tick::ZERO, 0);
        chip.push_value(5).expect("queue");
        for frame in 0..2 {
            let now = Tick::new(frame * 100);
            assert!(!chip.data_level(now));
            let mut bits = 0_u32;
            for _ in 0..25 {
                chip.drive_clock(true, now);
                bits = (bits << 1) | u32::from(chip.data_level(now));
                chip.drive_clock(false, now);
            }
            assert_eq!(bits >> 1, 5);
        }
    }

    #[test]
    fn stalled_chip_never_signals_ready() {
        let mut chip = SimulatedHx711::new(Tick::ZERO, 0);
        chip.set_stalled(true);
        assert!(chip.data_level(Tick::new(1_000_000)));
    }

    #[test]
    fn gpio_rejects_unwired_pins() {
        let mut gpio = SimulatedGpio::<2>::new();
        gpio.attach(1, 2, 100).expect("attach");
        assert_eq!(gpio.configure_input(1, true), Ok(()));
        assert_eq!(gpio.configure_output(2, false), Ok(()));
        assert_eq!(gpio.configure_input(9, true), Err(GpioError::InvalidPin(9)));
        assert_eq!(gpio.configure_output(1, false), Err(GpioError::InvalidPin(1)));
        assert_eq!(gpio.attach(3, 2, 100).err(), Some(SimError::PinInUse(2)));
        assert!(gpio.read_digital(9));
    }
}
