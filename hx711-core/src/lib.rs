#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared logic for the HX711 acquisition driver.
//
// This crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library. Hardware access, timers, and the report transport are
// reached through small traits so the firmware and the emulator can plug in
// their own implementations.

pub mod bus;
pub mod clock;
pub mod device;
pub mod driver;
pub mod gpio;
pub mod host;
pub mod protocol;
pub mod registry;
pub mod sim;
pub mod telemetry;
pub mod timer;
