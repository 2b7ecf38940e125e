//! Driver facade tying devices, the shared bus, and the timer queue together.
//!
//! [`Hx711Driver`] is what the command layer and the target's timer loop talk
//! to. Configuration converts host parameters into ticks and wires the pins;
//! a query arms the first wake of a channel; [`Hx711Driver::run_due`] fires
//! every wake that has elapsed, strictly one step at a time, so the shared
//! [`BusArbiter`] never needs a lock.

use core::fmt;

use crate::bus::BusArbiter;
use crate::clock::{ClockConfig, ClockError, Tick};
use crate::device::{Device, DeviceConfig, GAIN_PULSES_MAX, GAIN_PULSES_MIN, Oid, SampleReport};
use crate::gpio::{Gpio, GpioError, PinId};
use crate::registry::{AllocationError, NotFoundError, ObjectRegistry, Schema};
use crate::telemetry::TelemetryLog;
use crate::timer::{TimerError, TimerQueue};

/// Schema tag for HX711 channel objects.
pub const DEVICE_SCHEMA: Schema = "config_hx711";

/// Default number of channel slots.
pub const MAX_DEVICES: usize = 8;

/// Host parameters of a `config_hx711` request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConfigRequest {
    pub oid: Oid,
    pub dout_pin: PinId,
    pub sck_pin: PinId,
    /// Gain pulses appended after the 24 data pulses.
    pub gain: u32,
    /// Conversions per second; the sample period is one timer second divided by this.
    pub sample_interval: u32,
    /// Minimum delay between clock edges, in microseconds.
    pub comm_delay_us: u32,
    /// Output data rate of the board; sets the settle delay before the first edge.
    pub sps: u32,
}

/// Host parameters of a `query_hx711` request.
///
/// Only `oid` influences the driver. The remaining fields belong to the
/// filtering and range-check features of the command dictionary and are
/// carried so requests round-trip losslessly.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueryRequest {
    pub oid: Oid,
    pub clock: u32,
    pub sample_ticks: u32,
    pub sample_count: u8,
    pub rest_ticks: u32,
    pub min_value: u32,
    pub max_value: u32,
    pub range_check_count: u8,
}

impl QueryRequest {
    /// Query carrying only the object id.
    #[must_use]
    pub const fn for_oid(oid: Oid) -> Self {
        Self {
            oid,
            clock: 0,
            sample_ticks: 0,
            sample_count: 0,
            rest_ticks: 0,
            min_value: 0,
            max_value: 0,
            range_check_count: 0,
        }
    }
}

/// Errors returned by [`Hx711Driver::configure`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    Allocation(AllocationError),
    Clock(ClockError),
    Gpio(GpioError),
    /// Gain pulse count outside the supported range.
    InvalidGain(u32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Allocation(err) => write!(f, "allocation failed: {err}"),
            ConfigError::Clock(err) => write!(f, "invalid timing: {err}"),
            ConfigError::Gpio(err) => write!(f, "pin setup failed: {err}"),
            ConfigError::InvalidGain(gain) => write!(
                f,
                "gain must be {GAIN_PULSES_MIN}..={GAIN_PULSES_MAX} pulses, got {gain}"
            ),
        }
    }
}

impl From<AllocationError> for ConfigError {
    fn from(value: AllocationError) -> Self {
        ConfigError::Allocation(value)
    }
}

impl From<ClockError> for ConfigError {
    fn from(value: ClockError) -> Self {
        ConfigError::Clock(value)
    }
}

impl From<GpioError> for ConfigError {
    fn from(value: GpioError) -> Self {
        ConfigError::Gpio(value)
    }
}

/// Errors returned by [`Hx711Driver::start_acquisition`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueryError {
    NotFound(NotFoundError),
    Timer(TimerError),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::NotFound(err) => write!(f, "{err}"),
            QueryError::Timer(err) => write!(f, "{err}"),
        }
    }
}

impl From<NotFoundError> for QueryError {
    fn from(value: NotFoundError) -> Self {
        QueryError::NotFound(value)
    }
}

impl From<TimerError> for QueryError {
    fn from(value: TimerError) -> Self {
        QueryError::Timer(value)
    }
}

/// Destination for completed conversions. Emission is fire-and-forget.
pub trait ReportSink {
    fn emit(&mut self, report: SampleReport);
}

impl<S> ReportSink for &mut S
where
    S: ReportSink + ?Sized,
{
    fn emit(&mut self, report: SampleReport) {
        (**self).emit(report);
    }
}

#[cfg(feature = "alloc")]
impl ReportSink for alloc::vec::Vec<SampleReport> {
    fn emit(&mut self, report: SampleReport) {
        self.push(report);
    }
}

impl<const N: usize> ReportSink for heapless::Deque<SampleReport, N> {
    /// Keeps the newest reports, dropping the oldest when full.
    fn emit(&mut self, report: SampleReport) {
        if self.is_full() {
            self.pop_front();
        }
        let _ = self.push_back(report);
    }
}

/// HX711 acquisition driver for up to `DEVICES` channels on one shared bus.
pub struct Hx711Driver<const DEVICES: usize = MAX_DEVICES> {
    clock: ClockConfig,
    devices: ObjectRegistry<Device, DEVICES>,
    bus: BusArbiter,
    timers: TimerQueue<Oid, DEVICES>,
    telemetry: TelemetryLog,
}

impl<const DEVICES: usize> Hx711Driver<DEVICES> {
    /// Creates a driver for a timer running at `clock`.
    #[must_use]
    pub const fn new(clock: ClockConfig) -> Self {
        Self {
            clock,
            devices: ObjectRegistry::new(),
            bus: BusArbiter::new(),
            timers: TimerQueue::new(),
            telemetry: TelemetryLog::new(),
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &ClockConfig {
        &self.clock
    }

    /// Shared bus reservation state.
    #[must_use]
    pub const fn bus(&self) -> &BusArbiter {
        &self.bus
    }

    /// Configured channel for `oid`, if any.
    #[must_use]
    pub fn device(&self, oid: Oid) -> Option<&Device> {
        self.devices.lookup(oid, DEVICE_SCHEMA).ok()
    }

    /// Iterates configured channels in object id order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> + '_ {
        self.devices
            .iter_schema(DEVICE_SCHEMA)
            .map(|(_, device)| device)
    }

    #[must_use]
    pub const fn telemetry(&self) -> &TelemetryLog {
        &self.telemetry
    }

    /// Tick at which the earliest armed channel must be stepped.
    #[must_use]
    pub fn next_wake(&self) -> Option<Tick> {
        self.timers.next_wake()
    }

    /// Pending wake of `oid`, if it is armed.
    #[must_use]
    pub fn pending_wake(&self, oid: Oid) -> Option<Tick> {
        self.timers.pending(oid)
    }

    /// Creates (or replaces) the channel described by `request`.
    ///
    /// Parameters are validated and the object slot checked before any pin
    /// is touched, and the channel is only stored once both pins are set up,
    /// so a failed request leaves no partial state behind. Reconfiguring an
    /// existing channel disarms it and returns its bus reservation.
    pub fn configure<G>(&mut self, request: &ConfigRequest, gpio: &mut G) -> Result<(), ConfigError>
    where
        G: Gpio + ?Sized,
    {
        let config = self.device_config(request)?;
        self.devices.check(request.oid, DEVICE_SCHEMA)?;

        gpio.configure_input(config.data_pin, true)?;
        gpio.configure_output(config.clock_pin, false)?;

        if let Ok(previous) = self.devices.lookup_mut(request.oid, DEVICE_SCHEMA) {
            previous.abandon(&mut self.bus, gpio);
            self.timers.cancel(request.oid);
        }
        self.devices
            .allocate(request.oid, DEVICE_SCHEMA, Device::new(request.oid, config))?;
        Ok(())
    }

    /// Arms a fresh acquisition of `request.oid` after its settle delay.
    ///
    /// A wake that has not fired yet is replaced. If the channel is mid-cycle
    /// its reservation is handed back and the partial frame dropped. Returns
    /// the first wake tick.
    pub fn start_acquisition<G>(
        &mut self,
        request: &QueryRequest,
        now: Tick,
        gpio: &mut G,
    ) -> Result<Tick, QueryError>
    where
        G: Gpio + ?Sized,
    {
        let oid = request.oid;
        let device = self.devices.lookup_mut(oid, DEVICE_SCHEMA)?;
        self.timers.cancel(oid);
        let wake = device.arm(&mut self.bus, gpio, now);
        self.timers.schedule(oid, wake)?;
        self.telemetry.record_armed(oid, wake, now);
        Ok(wake)
    }

    /// Steps every channel whose wake is at or before `now`.
    ///
    /// Wakes fire in tick order with ties in arming order; a channel
    /// rescheduled at or before `now` fires again within the same call. Each
    /// step sees its own wake tick as the current time. Returns the number of
    /// steps executed.
    pub fn run_due<G, S>(&mut self, now: Tick, gpio: &mut G, sink: &mut S) -> Result<usize, TimerError>
    where
        G: Gpio + ?Sized,
        S: ReportSink + ?Sized,
    {
        let mut steps = 0;
        while let Some((oid, wake)) = self.timers.pop_due(now) {
            let Ok(device) = self.devices.lookup_mut(oid, DEVICE_SCHEMA) else {
                continue;
            };

            let outcome = device.step(&mut self.bus, gpio, wake);
            self.telemetry.record_step(oid, &outcome, wake);
            if let Some(report) = outcome.report() {
                sink.emit(report);
            }
            self.timers.schedule(oid, outcome.wake_at)?;
            steps += 1;
        }
        Ok(steps)
    }

    fn device_config(&self, request: &ConfigRequest) -> Result<DeviceConfig, ConfigError> {
        let gain_pulses = u8::try_from(request.gain)
            .ok()
            .filter(|gain| (GAIN_PULSES_MIN..=GAIN_PULSES_MAX).contains(gain))
            .ok_or(ConfigError::InvalidGain(request.gain))?;

        Ok(DeviceConfig {
            data_pin: request.dout_pin,
            clock_pin: request.sck_pin,
            gain_pulses,
            sample_period: self
                .clock
                .period_from_rate("sample_interval", request.sample_interval)?,
            bit_delay: self.clock.bit_delay("comm_delay", request.comm_delay_us)?,
            settle: self.clock.period_from_rate("sps", request.sps)?,
        })
    }
}

impl<const DEVICES: usize> Default for Hx711Driver<DEVICES> {
    fn default() -> Self {
        Self::new(ClockConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusClaim;
    use crate::sim::{SimulatedGpio, SimulatedHx711};
    use heapless::Deque;

    const CLOCK_HZ: u32 = 1_000_000;

    fn request(oid: Oid, dout_pin: PinId, sck_pin: PinId) -> ConfigRequest {
        ConfigRequest {
            oid,
            dout_pin,
            sck_pin,
            gain: 1,
            sample_interval: 10,
            comm_delay_us: 2,
            sps: 80,
        }
    }

    fn rig() -> (Hx711Driver<4>, SimulatedGpio<4>) {
        let mut gpio = SimulatedGpio::new();
        gpio.attach(1, 2, 1_000).expect("attach");
        (Hx711Driver::new(ClockConfig::new(CLOCK_HZ)), gpio)
    }

    #[test]
    fn configure_converts_host_parameters() {
        let (mut driver, mut gpio) = rig();
        driver
            .configure(&request(0, 1, 2), &mut gpio)
            .expect("configure");

        let config = driver.device(0).expect("device").config();
        assert_eq!(config.sample_period, 100_000);
        assert_eq!(config.bit_delay, 2);
        assert_eq!(config.settle, 12_500);
        assert_eq!(config.gain_pulses, 1);
    }

    #[test]
    fn invalid_requests_leave_no_device() {
        let (mut driver, mut gpio) = rig();

        let mut bad_gain = request(0, 1, 2);
        bad_gain.gain = 4;
        assert_eq!(
            driver.configure(&bad_gain, &mut gpio),
            Err(ConfigError::InvalidGain(4))
        );

        let mut zero_rate = request(0, 1, 2);
        zero_rate.sps = 0;
        assert_eq!(
            driver.configure(&zero_rate, &mut gpio),
            Err(ConfigError::Clock(ClockError::ZeroDivisor("sps")))
        );

        assert_eq!(
            driver.configure(&request(0, 7, 2), &mut gpio),
            Err(ConfigError::Gpio(GpioError::InvalidPin(7)))
        );

        assert_eq!(
            driver.configure(&request(4, 1, 2), &mut gpio),
            Err(ConfigError::Allocation(AllocationError::Exhausted {
                oid: 4,
                capacity: 4
            }))
        );
        assert!(driver.device(0).is_none());
    }

    #[test]
    fn query_for_unknown_oid_fails() {
        let (mut driver, mut gpio) = rig();
        assert_eq!(
            driver.start_acquisition(&QueryRequest::for_oid(3), Tick::ZERO, &mut gpio),
            Err(QueryError::NotFound(NotFoundError {
                oid: 3,
                schema: DEVICE_SCHEMA
            }))
        );
    }

    #[test]
    fn start_acquisition_arms_after_settle() {
        let (mut driver, mut gpio) = rig();
        driver
            .configure(&request(0, 1, 2), &mut gpio)
            .expect("configure");

        let wake = driver
            .start_acquisition(&QueryRequest::for_oid(0), Tick::new(500), &mut gpio)
            .expect("query");

        assert_eq!(wake, Tick::new(13_000));
        assert_eq!(driver.next_wake(), Some(wake));
        assert_eq!(driver.pending_wake(0), Some(wake));
    }

    #[test]
    fn run_due_emits_reports_through_sink() {
        let (mut driver, mut gpio) = rig();
        gpio.chip_mut(1)
            .expect("chip")
            .push_value(1_234)
            .expect("queue");
        driver
            .configure(&request(0, 1, 2), &mut gpio)
            .expect("configure");
        driver
            .start_acquisition(&QueryRequest::for_oid(0), Tick::ZERO, &mut gpio)
            .expect("query");

        let mut reports: Deque<SampleReport, 4> = Deque::new();
        while reports.is_empty() {
            let wake = driver.next_wake().expect("armed");
            gpio.advance(wake);
            driver
                .run_due(wake, &mut gpio, &mut reports)
                .expect("timers");
        }

        let report = reports.pop_front().expect("report");
        assert_eq!(report.oid, 0);
        assert_eq!(report.value, 1_234);
        assert_eq!(driver.bus().pending(), 0);
        assert_eq!(driver.next_wake(), Some(report.next_clock));
    }

    #[test]
    fn reconfigure_returns_reservation() {
        let (mut driver, mut gpio) = rig();
        driver
            .configure(&request(0, 1, 2), &mut gpio)
            .expect("configure");
        driver
            .start_acquisition(&QueryRequest::for_oid(0), Tick::ZERO, &mut gpio)
            .expect("query");

        // Run until the chip is ready and the first edge took the bus.
        let mut reports: Deque<SampleReport, 1> = Deque::new();
        while !driver.device(0).is_some_and(Device::has_bus_lock) {
            let wake = driver.next_wake().expect("armed");
            gpio.advance(wake);
            driver
                .run_due(wake, &mut gpio, &mut reports)
                .expect("timers");
        }
        assert_eq!(driver.bus().pending(), 1);

        driver
            .configure(&request(0, 1, 2), &mut gpio)
            .expect("reconfigure");

        assert_eq!(driver.bus().pending(), 0);
        assert_eq!(driver.next_wake(), None);
        assert_eq!(
            driver.device(0).map(Device::claim),
            Some(BusClaim::Idle)
        );
    }

    #[test]
    fn restart_mid_frame_returns_clock_low() {
        let (mut driver, mut gpio) = rig();
        driver
            .configure(&request(0, 1, 2), &mut gpio)
            .expect("configure");
        driver
            .start_acquisition(&QueryRequest::for_oid(0), Tick::ZERO, &mut gpio)
            .expect("query");

        let mut reports: Deque<SampleReport, 1> = Deque::new();
        while !gpio.chip(1).is_some_and(SimulatedHx711::clock_level) {
            let wake = driver.next_wake().expect("armed");
            gpio.advance(wake);
            driver
                .run_due(wake, &mut gpio, &mut reports)
                .expect("timers");
        }
        assert_eq!(driver.device(0).map(Device::bit_index), Some(1));

        let now = gpio.now();
        driver
            .start_acquisition(&QueryRequest::for_oid(0), now, &mut gpio)
            .expect("restart");

        assert!(!gpio.chip(1).is_some_and(SimulatedHx711::clock_level));
        assert_eq!(driver.bus().pending(), 0);
        assert_eq!(driver.device(0).map(Device::bit_index), Some(0));
    }
}
