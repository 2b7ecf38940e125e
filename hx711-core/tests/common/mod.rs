#![allow(dead_code)]

use hx711_core::clock::{ClockConfig, Tick, Ticks};
use hx711_core::device::{Oid, SampleReport};
use hx711_core::driver::{ConfigRequest, Hx711Driver, QueryRequest, ReportSink};
use hx711_core::gpio::PinId;
use hx711_core::sim::SimulatedGpio;

pub const CLOCK_HZ: u32 = 1_000_000;

/// Conversion time of every simulated chip, shorter than any sample period used here.
pub const CONVERSION_TICKS: Ticks = 1_000;

#[derive(Default)]
pub struct Reports(pub Vec<SampleReport>);

impl ReportSink for Reports {
    fn emit(&mut self, report: SampleReport) {
        self.0.push(report);
    }
}

pub struct Rig {
    pub driver: Hx711Driver<4>,
    pub gpio: SimulatedGpio<4>,
    pub reports: Reports,
}

impl Rig {
    pub fn new() -> Self {
        Self {
            driver: Hx711Driver::new(ClockConfig::new(CLOCK_HZ)),
            gpio: SimulatedGpio::new(),
            reports: Reports::default(),
        }
    }

    /// Wires a chip to `dout`/`sck` and configures channel `oid` on it.
    ///
    /// 100 conversions/s (10 000 tick period), 2 µs edges, 12 500 tick settle.
    pub fn channel(&mut self, oid: Oid, dout: PinId, sck: PinId, gain: u32) -> ConfigRequest {
        self.gpio
            .attach(dout, sck, CONVERSION_TICKS)
            .expect("attach chip");
        let request = ConfigRequest {
            oid,
            dout_pin: dout,
            sck_pin: sck,
            gain,
            sample_interval: 100,
            comm_delay_us: 2,
            sps: 80,
        };
        self.driver
            .configure(&request, &mut self.gpio)
            .expect("configure channel");
        request
    }

    pub fn start(&mut self, oid: Oid, now: Tick) -> Tick {
        self.gpio.advance(now);
        self.driver
            .start_acquisition(&QueryRequest::for_oid(oid), now, &mut self.gpio)
            .expect("start acquisition")
    }

    /// Fires the earliest pending wake (and anything tied with it).
    pub fn step_next(&mut self) -> Option<Tick> {
        let wake = self.driver.next_wake()?;
        self.gpio.advance(wake);
        self.driver
            .run_due(wake, &mut self.gpio, &mut self.reports)
            .expect("timer queue");
        Some(wake)
    }

    /// Fires every wake up to and including `deadline`.
    pub fn run_until(&mut self, deadline: Tick) {
        while self
            .driver
            .next_wake()
            .is_some_and(|wake| !deadline.is_before(wake))
        {
            self.step_next();
        }
        self.gpio.advance(deadline);
    }

    /// Runs until `count` reports have been collected.
    pub fn run_reports(&mut self, count: usize) -> &[SampleReport] {
        let mut guard = 0_u32;
        while self.reports.0.len() < count {
            self.step_next().expect("channel stopped");
            guard += 1;
            assert!(guard < 100_000, "reports never arrived");
        }
        &self.reports.0
    }
}
