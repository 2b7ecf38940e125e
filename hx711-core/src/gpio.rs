//! Digital pin abstraction consumed by the driver.
//!
//! The firmware implements [`Gpio`] over the MCU pins while tests and the
//! emulator use [`crate::sim::SimulatedGpio`]. Reads and writes are assumed to
//! complete well inside one bit delay.

use core::fmt;

/// Board-level pin number as carried in configuration commands.
pub type PinId = u32;

/// Errors reported while setting up pins.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioError {
    /// The pin number does not exist on this target.
    InvalidPin(PinId),
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpioError::InvalidPin(pin) => write!(f, "invalid pin {pin}"),
        }
    }
}

/// Abstraction over the GPIO collaborator.
pub trait Gpio {
    /// Configures `pin` as an input, optionally enabling the pull-up.
    fn configure_input(&mut self, pin: PinId, pull_up: bool) -> Result<(), GpioError>;

    /// Configures `pin` as a push-pull output driven to `initial`.
    fn configure_output(&mut self, pin: PinId, initial: bool) -> Result<(), GpioError>;

    /// Samples the current level of an input pin.
    fn read_digital(&mut self, pin: PinId) -> bool;

    /// Drives an output pin.
    fn write_digital(&mut self, pin: PinId, level: bool);
}

impl<G> Gpio for &mut G
where
    G: Gpio + ?Sized,
{
    fn configure_input(&mut self, pin: PinId, pull_up: bool) -> Result<(), GpioError> {
        (**self).configure_input(pin, pull_up)
    }

    fn configure_output(&mut self, pin: PinId, initial: bool) -> Result<(), GpioError> {
        (**self).configure_output(pin, initial)
    }

    fn read_digital(&mut self, pin: PinId) -> bool {
        (**self).read_digital(pin)
    }

    fn write_digital(&mut self, pin: PinId, level: bool) {
        (**self).write_digital(pin, level);
    }
}
