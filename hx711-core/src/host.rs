//! Host-side view of an HX711 channel.
//!
//! [`ChannelSettings`] turns user-facing choices (hardware gain, board data
//! rate, pins) into the `config_hx711`/`query_hx711` requests the MCU
//! expects. [`AdcChannel`] consumes the resulting `hx711_in_state` reports,
//! remembers the latest value, forwards it to a registered callback, and
//! answers whether the channel has gone quiet for longer than expected.

use core::fmt;

use crate::clock::{ClockConfig, ClockError, Tick, Ticks};
use crate::device::{Oid, Sample, SampleReport};
use crate::driver::{ConfigRequest, QueryRequest};
use crate::gpio::PinId;
use crate::protocol::grammar::{self, ParseError};

/// Errors raised by host-side channel handling.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// Only 32, 64, and 128 are selectable.
    UnsupportedGain(u32),
    /// Boards run at 10 or 80 samples per second.
    UnsupportedDataRate(u32),
    /// A channel forwards to a single consumer.
    CallbackAlreadyConfigured,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::UnsupportedGain(gain) => {
                write!(f, "gain {gain} not supported (choose 32, 64, or 128)")
            }
            HostError::UnsupportedDataRate(rate) => {
                write!(f, "board rate {rate} not supported (choose 10 or 80)")
            }
            HostError::CallbackAlreadyConfigured => f.write_str("ADC callback already configured"),
        }
    }
}

/// Amplifier gain, which also selects the input channel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    /// Channel A, gain 128.
    X128,
    /// Channel B, gain 32.
    X32,
    /// Channel A, gain 64.
    #[default]
    X64,
}

impl Gain {
    /// Parses a hardware gain factor.
    pub const fn from_factor(factor: u32) -> Result<Self, HostError> {
        match factor {
            128 => Ok(Gain::X128),
            64 => Ok(Gain::X64),
            32 => Ok(Gain::X32),
            other => Err(HostError::UnsupportedGain(other)),
        }
    }

    #[must_use]
    pub const fn factor(self) -> u32 {
        match self {
            Gain::X128 => 128,
            Gain::X64 => 64,
            Gain::X32 => 32,
        }
    }

    /// Clock pulses appended after the 24 data bits to select this gain.
    #[must_use]
    pub const fn pulses(self) -> u8 {
        match self {
            Gain::X128 => 1,
            Gain::X32 => 2,
            Gain::X64 => 3,
        }
    }
}

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.factor())
    }
}

/// Output data rate selected by the board's RATE pin.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    #[default]
    Sps10,
    Sps80,
}

impl DataRate {
    pub const fn from_sps(sps: u32) -> Result<Self, HostError> {
        match sps {
            10 => Ok(DataRate::Sps10),
            80 => Ok(DataRate::Sps80),
            other => Err(HostError::UnsupportedDataRate(other)),
        }
    }

    #[must_use]
    pub const fn sps(self) -> u32 {
        match self {
            DataRate::Sps10 => 10,
            DataRate::Sps80 => 80,
        }
    }
}

/// User-facing description of one channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelSettings {
    pub dout_pin: PinId,
    pub sck_pin: PinId,
    pub gain: Gain,
    pub data_rate: DataRate,
    /// Conversions requested per second.
    pub sample_interval: u32,
    /// Minimum clock edge spacing in microseconds.
    pub comm_delay_us: u32,
}

impl ChannelSettings {
    /// Settings with the default gain, data rate, interval, and delay.
    #[must_use]
    pub const fn new(dout_pin: PinId, sck_pin: PinId) -> Self {
        Self {
            dout_pin,
            sck_pin,
            gain: Gain::X64,
            data_rate: DataRate::Sps10,
            sample_interval: 1,
            comm_delay_us: 1,
        }
    }

    #[must_use]
    pub const fn with_gain(mut self, gain: Gain) -> Self {
        self.gain = gain;
        self
    }

    #[must_use]
    pub const fn with_data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }

    #[must_use]
    pub const fn with_sample_interval(mut self, sample_interval: u32) -> Self {
        self.sample_interval = sample_interval;
        self
    }

    #[must_use]
    pub const fn with_comm_delay_us(mut self, comm_delay_us: u32) -> Self {
        self.comm_delay_us = comm_delay_us;
        self
    }

    /// `config_hx711` request for `oid`.
    #[must_use]
    pub const fn config_request(&self, oid: Oid) -> ConfigRequest {
        ConfigRequest {
            oid,
            dout_pin: self.dout_pin,
            sck_pin: self.sck_pin,
            gain: self.gain.pulses() as u32,
            sample_interval: self.sample_interval,
            comm_delay_us: self.comm_delay_us,
            sps: self.data_rate.sps(),
        }
    }

    /// `query_hx711` request for `oid`; filtering fields are left at zero.
    #[must_use]
    pub const fn query_request(&self, oid: Oid) -> QueryRequest {
        QueryRequest::for_oid(oid)
    }

    /// Nominal spacing between reports on a timer running at `clock`.
    pub fn report_period(&self, clock: &ClockConfig) -> Result<Ticks, ClockError> {
        clock.period_from_rate("sample_interval", self.sample_interval)
    }
}

/// Host object tracking one channel's reports.
pub struct AdcChannel<F = fn(Tick, Sample)> {
    oid: Oid,
    report_period: Ticks,
    last_value: Sample,
    last_report: Option<Tick>,
    started_at: Option<Tick>,
    callback: Option<F>,
}

impl<F> AdcChannel<F>
where
    F: FnMut(Tick, Sample),
{
    /// Creates a channel expecting a report every `report_period` ticks.
    #[must_use]
    pub const fn new(oid: Oid, report_period: Ticks) -> Self {
        Self {
            oid,
            report_period,
            last_value: 0,
            last_report: None,
            started_at: None,
            callback: None,
        }
    }

    #[must_use]
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    #[must_use]
    pub const fn report_period(&self) -> Ticks {
        self.report_period
    }

    /// Registers the single consumer of this channel's values.
    ///
    /// `report_period` overrides the expected report spacing when given.
    pub fn setup_callback(&mut self, report_period: Option<Ticks>, callback: F) -> Result<(), HostError> {
        if self.callback.is_some() {
            return Err(HostError::CallbackAlreadyConfigured);
        }
        if let Some(period) = report_period {
            self.report_period = period;
        }
        self.callback = Some(callback);
        Ok(())
    }

    /// Accepted for interface parity; range checking is not performed.
    pub fn setup_minmax(
        &mut self,
        _sample_time: Ticks,
        _sample_count: u8,
        _min_value: u32,
        _max_value: u32,
        _range_check_count: u8,
    ) {
    }

    /// Notes that the query was sent, starting the stall clock.
    pub fn mark_started(&mut self, now: Tick) {
        self.started_at = Some(now);
    }

    /// Latest value and the tick it was received at.
    #[must_use]
    pub fn last_value(&self) -> (Sample, Option<Tick>) {
        (self.last_value, self.last_report)
    }

    /// Applies a report received at `received_at`. Reports for other
    /// channels are ignored and yield `false`.
    pub fn handle_report(&mut self, report: &SampleReport, received_at: Tick) -> bool {
        if report.oid != self.oid {
            return false;
        }
        self.last_value = report.value;
        self.last_report = Some(received_at);
        if let Some(callback) = self.callback.as_mut() {
            callback(received_at, report.value);
        }
        true
    }

    /// Parses and applies a report line.
    pub fn handle_line<'a>(&mut self, line: &'a str, received_at: Tick) -> Result<bool, ParseError<'a>> {
        let report = grammar::parse_report(line)?;
        Ok(self.handle_report(&report, received_at))
    }

    /// Returns `true` when no report arrived within one report period plus
    /// `tolerance` of the last report (or of the start, before the first).
    ///
    /// An unready or unwired converter never reports; this is how that
    /// condition becomes visible to the host.
    #[must_use]
    pub fn is_stalled(&self, now: Tick, tolerance: Ticks) -> bool {
        self.last_report.or(self.started_at).is_some_and(|since| {
            now.saturating_since(since) > self.report_period.saturating_add(tolerance)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_maps_to_pulses() {
        assert_eq!(Gain::from_factor(128).map(Gain::pulses), Ok(1));
        assert_eq!(Gain::from_factor(32).map(Gain::pulses), Ok(2));
        assert_eq!(Gain::from_factor(64).map(Gain::pulses), Ok(3));
        assert_eq!(Gain::default(), Gain::X64);
        assert_eq!(Gain::from_factor(16), Err(HostError::UnsupportedGain(16)));
    }

    #[test]
    fn data_rate_choices() {
        assert_eq!(DataRate::from_sps(80), Ok(DataRate::Sps80));
        assert_eq!(DataRate::default().sps(), 10);
        assert_eq!(
            DataRate::from_sps(40),
            Err(HostError::UnsupportedDataRate(40))
        );
    }

    #[test]
    fn default_settings_render_requests() {
        let settings = ChannelSettings::new(12, 13);
        assert_eq!(
            settings.config_request(4),
            ConfigRequest {
                oid: 4,
                dout_pin: 12,
                sck_pin: 13,
                gain: 3,
                sample_interval: 1,
                comm_delay_us: 1,
                sps: 10,
            }
        );
        assert_eq!(settings.query_request(4), QueryRequest::for_oid(4));
        assert_eq!(
            settings.report_period(&ClockConfig::new(1_000)),
            Ok(1_000)
        );
    }

    #[test]
    fn second_callback_is_rejected() {
        let mut channel: AdcChannel = AdcChannel::new(0, 100);
        channel.setup_callback(None, |_, _| {}).expect("first");
        assert_eq!(
            channel.setup_callback(Some(5), |_, _| {}),
            Err(HostError::CallbackAlreadyConfigured)
        );
        assert_eq!(channel.report_period(), 100);
    }

    #[test]
    fn reports_update_value_and_invoke_callback() {
        let mut seen = None;
        {
            let mut channel = AdcChannel::new(1, 100);
            channel
                .setup_callback(None, |tick, value| seen = Some((tick, value)))
                .expect("callback");
            assert!(!channel.handle_report(
                &SampleReport {
                    oid: 2,
                    next_clock: Tick::ZERO,
                    value: 9
                },
                Tick::new(5)
            ));
            assert_eq!(
                channel.handle_line("hx711_in_state oid=1 next_clock=900 value=-7", Tick::new(10)),
                Ok(true)
            );
            assert_eq!(channel.last_value(), (-7, Some(Tick::new(10))));
        }
        assert_eq!(seen, Some((Tick::new(10), -7)));
    }

    #[test]
    fn stall_detection_uses_last_report() {
        let mut channel: AdcChannel = AdcChannel::new(0, 100);
        assert!(!channel.is_stalled(Tick::new(10_000), 0));

        channel.mark_started(Tick::new(0));
        assert!(!channel.is_stalled(Tick::new(150), 50));
        assert!(channel.is_stalled(Tick::new(151), 50));

        channel.handle_report(
            &SampleReport {
                oid: 0,
                next_clock: Tick::ZERO,
                value: 1,
            },
            Tick::new(200),
        );
        assert!(!channel.is_stalled(Tick::new(300), 0));
        assert!(channel.is_stalled(Tick::new(301), 0));
    }
}
