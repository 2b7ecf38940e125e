mod common;

use common::{CONVERSION_TICKS, Reports};
use hx711_core::clock::{ClockConfig, Tick};
use hx711_core::driver::Hx711Driver;
use hx711_core::host::{ChannelSettings, Gain};
use hx711_core::protocol::commands::{CommandError, CommandExecutor, CommandOutcome};
use hx711_core::protocol::grammar::{self, Message};
use hx711_core::sim::SimulatedGpio;

fn rig() -> (CommandExecutor<Hx711Driver<4>>, SimulatedGpio<4>) {
    let mut gpio = SimulatedGpio::new();
    gpio.attach(6, 7, CONVERSION_TICKS).expect("attach");
    (
        CommandExecutor::new(Hx711Driver::new(ClockConfig::new(1_000_000))),
        gpio,
    )
}

#[test]
fn host_rendered_lines_drive_acquisition() {
    let (mut executor, mut gpio) = rig();
    gpio.chip_mut(6)
        .expect("chip")
        .push_value(-1_000)
        .expect("queue");
    let settings = ChannelSettings::new(6, 7)
        .with_gain(Gain::X128)
        .with_sample_interval(50);

    let config = settings.config_request(2).to_string();
    let query = settings.query_request(2).to_string();
    assert_eq!(
        executor.execute(&config, Tick::ZERO, &mut gpio),
        Ok(CommandOutcome::Configured { oid: 2 })
    );
    let Ok(CommandOutcome::Querying { first_wake, .. }) =
        executor.execute(&query, Tick::ZERO, &mut gpio)
    else {
        panic!("query should arm the channel");
    };
    assert_eq!(first_wake, Tick::new(100_000));

    let mut reports = Reports::default();
    while reports.0.is_empty() {
        let wake = executor.control().next_wake().expect("armed");
        gpio.advance(wake);
        executor
            .control_mut()
            .run_due(wake, &mut gpio, &mut reports)
            .expect("timers");
    }

    let line = reports.0[0].to_string();
    assert!(line.starts_with("hx711_in_state oid=2 next_clock="));
    assert!(line.ends_with(" value=-1000"));
    assert_eq!(grammar::parse(&line), Ok(Message::Report(reports.0[0])));
}

#[test]
fn crlf_terminated_lines_are_accepted() {
    let (mut executor, mut gpio) = rig();
    let line = "config_hx711 oid=0 dout_pin=6 sck_pin=7 gain=3 sample_interval=10 comm_delay=1 sps=10\r\n";
    assert_eq!(
        executor.execute(line, Tick::ZERO, &mut gpio),
        Ok(CommandOutcome::Configured { oid: 0 })
    );
    assert_eq!(
        executor
            .control()
            .device(0)
            .map(|device| device.config().gain_pulses),
        Some(3)
    );
}

#[test]
fn oid_must_fit_in_a_byte() {
    let (mut executor, mut gpio) = rig();
    let error = executor
        .execute("config_hx711 oid=300 dout_pin=6 sck_pin=7 gain=1 sample_interval=10 comm_delay=1 sps=10", Tick::ZERO, &mut gpio)
        .expect_err("oid is a byte");
    assert!(matches!(error, CommandError::Parse(_)));
}

#[test]
fn oid_beyond_capacity_is_a_config_error() {
    let (mut executor, mut gpio) = rig();
    let error = executor
        .execute("config_hx711 oid=9 dout_pin=6 sck_pin=7 gain=1 sample_interval=10 comm_delay=1 sps=10", Tick::ZERO, &mut gpio)
        .expect_err("only four slots");
    assert!(matches!(error, CommandError::Config(_)));
    assert!(error.to_string().contains("capacity"));
}
