//! Per-channel HX711 bit protocol state machine.
//!
//! A [`Device`] is re-entered once per clock half-period by the timer
//! subsystem. Each call to [`Device::step`] runs to completion: it either
//! waits for its bus slot, backs off because the ADC is still converting,
//! drives one clock edge (sampling the data line on falling-edge steps), or
//! finishes the frame and reports the widened sample. The caller reschedules
//! the device at [`StepOutcome::wake_at`].

use core::fmt;

use crate::bus::{Admission, BusArbiter, BusClaim};
use crate::clock::{DATA_EDGES, Tick, Ticks, conversion_window, frame_edges};
use crate::gpio::{Gpio, PinId};

/// Object identifier assigned by the host.
pub type Oid = u8;

/// Widened two's-complement sample as reported to the host.
pub type Sample = i32;

const _: () = assert!(Sample::BITS >= 32, "sample accumulator must hold 32 bits");

/// Smallest and largest supported number of gain selection pulses.
pub const GAIN_PULSES_MIN: u8 = 1;
pub const GAIN_PULSES_MAX: u8 = 3;

/// Immutable parameters fixed when the device is configured.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    pub data_pin: PinId,
    pub clock_pin: PinId,
    pub gain_pulses: u8,
    pub sample_period: Ticks,
    pub bit_delay: Ticks,
    pub settle: Ticks,
}

impl DeviceConfig {
    /// Number of step invocations in one full frame.
    #[must_use]
    pub const fn frame_edges(&self) -> u32 {
        frame_edges(self.gain_pulses)
    }

    /// Worst-case bus occupancy reserved for one conversion.
    #[must_use]
    pub const fn conversion_window(&self) -> Ticks {
        conversion_window(self.bit_delay, self.gain_pulses)
    }
}

/// Report emitted when a conversion completes.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleReport {
    pub oid: Oid,
    pub next_clock: Tick,
    pub value: Sample,
}

impl fmt::Display for SampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hx711_in_state oid={} next_clock={} value={}",
            self.oid, self.next_clock, self.value
        )
    }
}

/// What a single step invocation did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StepEvent {
    /// The bus was contended; the device sleeps until its reserved slot.
    Queued { slot: Tick },
    /// The ADC had not finished converting; the reservation was given up.
    NotReady,
    /// The clock was raised.
    ClockHigh,
    /// The clock was lowered, sampling `bit` when it carried data.
    ClockLow { bit: Option<bool> },
    /// The frame completed and the sample was reported.
    Completed(SampleReport),
}

/// Result of one [`Device::step`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StepOutcome {
    /// Absolute tick of the next invocation.
    pub wake_at: Tick,
    /// `true` when this invocation took ownership of the bus.
    pub acquired: bool,
    /// Level written to the clock line, if it was touched.
    pub clock: Option<bool>,
    pub event: StepEvent,
}

impl StepOutcome {
    /// Returns the completed report, if any.
    #[must_use]
    pub const fn report(&self) -> Option<SampleReport> {
        match self.event {
            StepEvent::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// One configured HX711 channel.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Device {
    oid: Oid,
    config: DeviceConfig,
    accumulator: Sample,
    bit_index: u32,
    claim: BusClaim,
    next_wake: Tick,
}

impl Device {
    /// Creates an idle device; no wake is scheduled until [`Device::arm`].
    #[must_use]
    pub const fn new(oid: Oid, config: DeviceConfig) -> Self {
        Self {
            oid,
            config,
            accumulator: 0,
            bit_index: 0,
            claim: BusClaim::Idle,
            next_wake: Tick::ZERO,
        }
    }

    #[must_use]
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Protocol phase: number of clock edges driven in the current frame.
    #[must_use]
    pub const fn bit_index(&self) -> u32 {
        self.bit_index
    }

    /// In-progress sample; meaningful only while a frame is being shifted in.
    #[must_use]
    pub const fn accumulator(&self) -> Sample {
        self.accumulator
    }

    #[must_use]
    pub const fn claim(&self) -> BusClaim {
        self.claim
    }

    /// Returns `true` while the device owns the shared bus.
    #[must_use]
    pub const fn has_bus_lock(&self) -> bool {
        matches!(self.claim, BusClaim::Held)
    }

    /// Tick at which the next step is due.
    #[must_use]
    pub const fn next_wake(&self) -> Tick {
        self.next_wake
    }

    /// Prepares a fresh acquisition that starts after the settle delay.
    ///
    /// Any outstanding reservation is handed back and a partially shifted
    /// frame is discarded. Returns the first wake tick.
    pub fn arm<G>(&mut self, bus: &mut BusArbiter, gpio: &mut G, now: Tick) -> Tick
    where
        G: Gpio + ?Sized,
    {
        self.abandon(bus, gpio);
        self.next_wake = now + self.config.settle;
        self.next_wake
    }

    /// Gives up any bus reservation and discards the in-flight frame.
    ///
    /// PD_SCK is returned low if the last step left it high; the chip powers
    /// down after 60 µs of clock high.
    pub fn abandon<G>(&mut self, bus: &mut BusArbiter, gpio: &mut G)
    where
        G: Gpio + ?Sized,
    {
        if self.bit_index % 2 == 1 {
            gpio.write_digital(self.config.clock_pin, false);
        }
        bus.release(&mut self.claim);
        self.reset_frame();
    }

    /// Runs one protocol step.
    ///
    /// `now` is the current timer reading, used only to anchor a new bus
    /// reservation; protocol timing advances from the scheduled wake tick.
    pub fn step<G>(&mut self, bus: &mut BusArbiter, gpio: &mut G, now: Tick) -> StepOutcome
    where
        G: Gpio + ?Sized,
    {
        let acquired =
            match bus.request_or_acquire(&mut self.claim, now, self.config.conversion_window()) {
                Admission::Queued { slot } => {
                    self.next_wake = slot;
                    return StepOutcome {
                        wake_at: slot,
                        acquired: false,
                        clock: None,
                        event: StepEvent::Queued { slot },
                    };
                }
                Admission::Acquired => true,
                Admission::AlreadyHeld => false,
            };

        let delay = self.config.bit_delay;
        let mut clock = false;
        let mut event;

        if self.bit_index == 0 && gpio.read_digital(self.config.data_pin) {
            // Ready latency is unbounded, so the slot goes to the next contender.
            self.next_wake = self.next_wake + delay.saturating_mul(2);
            bus.release(&mut self.claim);
            event = StepEvent::NotReady;
        } else if self.bit_index % 2 == 1 {
            let bit = if self.bit_index < DATA_EDGES {
                let bit = gpio.read_digital(self.config.data_pin);
                self.shift_in(bit);
                Some(bit)
            } else {
                None
            };
            self.bit_index += 1;
            self.next_wake = self.next_wake + delay;
            event = StepEvent::ClockLow { bit };
        } else {
            clock = true;
            self.bit_index += 1;
            self.next_wake = self.next_wake + delay;
            event = StepEvent::ClockHigh;
        }

        if self.bit_index >= self.config.frame_edges() {
            let next_clock = self.next_wake + self.config.sample_period;
            let report = SampleReport {
                oid: self.oid,
                next_clock,
                value: self.accumulator,
            };
            clock = false;
            self.reset_frame();
            self.next_wake = next_clock;
            bus.release(&mut self.claim);
            event = StepEvent::Completed(report);
        }

        gpio.write_digital(self.config.clock_pin, clock);

        StepOutcome {
            wake_at: self.next_wake,
            acquired,
            clock: Some(clock),
            event,
        }
    }

    fn shift_in(&mut self, bit: bool) {
        // A leading one marks a negative 24-bit value: seed with all ones so
        // the top byte ends up sign-extended once all 24 bits are shifted in.
        if self.bit_index == 1 && bit {
            self.accumulator = -1;
        }
        self.accumulator = (self.accumulator << 1) | Sample::from(bit);
    }

    fn reset_frame(&mut self) {
        self.accumulator = 0;
        self.bit_index = 0;
    }
}
