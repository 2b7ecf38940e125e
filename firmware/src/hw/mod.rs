//! Board GPIO backing the driver's pin seam.
//!
//! Pin numbers carried in `config_hx711` index [`BOARD_PINS`]; every entry
//! is a [`Flex`] pin so any of them can serve as DOUT or PD_SCK.

#![cfg(target_os = "none")]

use embassy_stm32::gpio::{Flex, Level, Pull, Speed};
use hx711_core::gpio::{Gpio, GpioError, PinId};

/// Number of header pins exposed to the host.
pub const BOARD_PIN_COUNT: usize = 8;

/// Header labels in pin-number order, for boot logs.
pub const BOARD_PINS: [&str; BOARD_PIN_COUNT] =
    ["PA0", "PA1", "PA4", "PA5", "PA6", "PA7", "PB0", "PB1"];

pub struct BoardGpio<'d> {
    pins: [Flex<'d>; BOARD_PIN_COUNT],
}

impl<'d> BoardGpio<'d> {
    pub fn new(pins: [Flex<'d>; BOARD_PIN_COUNT]) -> Self {
        Self { pins }
    }

    fn pin_mut(&mut self, pin: PinId) -> Result<&mut Flex<'d>, GpioError> {
        usize::try_from(pin)
            .ok()
            .and_then(|index| self.pins.get_mut(index))
            .ok_or(GpioError::InvalidPin(pin))
    }
}

impl Gpio for BoardGpio<'_> {
    fn configure_input(&mut self, pin: PinId, pull_up: bool) -> Result<(), GpioError> {
        let flex = self.pin_mut(pin)?;
        flex.set_as_input(if pull_up { Pull::Up } else { Pull::None });
        defmt::debug!("hw: pin {} input pull_up={}", pin, pull_up);
        Ok(())
    }

    fn configure_output(&mut self, pin: PinId, initial: bool) -> Result<(), GpioError> {
        let flex = self.pin_mut(pin)?;
        flex.set_level(Level::from(initial));
        flex.set_as_output(Speed::VeryHigh);
        defmt::debug!("hw: pin {} output initial={}", pin, initial);
        Ok(())
    }

    fn read_digital(&mut self, pin: PinId) -> bool {
        // Unknown pins read as the idle (pulled-up) level.
        self.pin_mut(pin).ok().is_none_or(|flex| flex.is_high())
    }

    fn write_digital(&mut self, pin: PinId, level: bool) {
        if let Ok(flex) = self.pin_mut(pin) {
            flex.set_level(Level::from(level));
        }
    }
}
