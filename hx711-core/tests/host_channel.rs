mod common;

use std::cell::RefCell;

use common::Rig;
use hx711_core::clock::{ClockConfig, Tick};
use hx711_core::host::{AdcChannel, ChannelSettings, HostError};

#[test]
fn channel_follows_reports_from_driver() {
    let mut rig = Rig::new();
    rig.channel(0, 1, 2, 1);
    let chip = rig.gpio.chip_mut(1).expect("chip");
    for value in [10, 20, 30] {
        chip.push_value(value).expect("queue");
    }

    let seen = RefCell::new(Vec::new());
    let mut channel = AdcChannel::new(0, 10_000);
    channel
        .setup_callback(None, |tick, value| seen.borrow_mut().push((tick, value)))
        .expect("callback");

    let start = rig.start(0, Tick::ZERO);
    channel.mark_started(Tick::ZERO);
    let lines: Vec<String> = rig
        .run_reports(3)
        .iter()
        .map(ToString::to_string)
        .collect();
    let received_at = rig.gpio.now();
    for line in &lines {
        assert_eq!(channel.handle_line(line, received_at), Ok(true));
    }

    assert_eq!(channel.last_value(), (30, Some(received_at)));
    assert_eq!(
        seen.borrow().iter().map(|(_, value)| *value).collect::<Vec<_>>(),
        [10, 20, 30]
    );
    assert!(start.is_before(received_at));
}

#[test]
fn stalled_converter_is_flagged_by_host() {
    let mut rig = Rig::new();
    rig.channel(0, 1, 2, 1);
    rig.gpio.chip_mut(1).expect("chip").set_stalled(true);

    let clock = ClockConfig::new(common::CLOCK_HZ);
    let period = ChannelSettings::new(1, 2)
        .with_sample_interval(100)
        .report_period(&clock)
        .expect("period");
    let mut channel: AdcChannel = AdcChannel::new(0, period);
    rig.start(0, Tick::ZERO);
    channel.mark_started(Tick::ZERO);

    rig.run_until(Tick::new(30_000));
    assert!(rig.reports.0.is_empty());
    assert!(channel.is_stalled(rig.gpio.now(), 12_500));
}

#[test]
fn healthy_converter_is_not_flagged() {
    let mut rig = Rig::new();
    rig.channel(0, 1, 2, 1);
    let mut channel: AdcChannel = AdcChannel::new(0, 10_100);
    rig.start(0, Tick::ZERO);
    channel.mark_started(Tick::ZERO);

    rig.run_until(Tick::new(60_000));
    for report in &rig.reports.0 {
        channel.handle_report(report, report.next_clock);
    }
    assert!(rig.reports.0.len() >= 4);
    assert!(!channel.is_stalled(Tick::new(60_000), 12_600));
}

#[test]
fn setup_minmax_is_accepted_and_callback_is_single() {
    let mut channel: AdcChannel = AdcChannel::new(3, 1_000);
    channel.setup_minmax(0, 0, 0, 0, 0);
    channel.setup_callback(None, |_, _| {}).expect("first callback");
    assert_eq!(
        channel.setup_callback(None, |_, _| {}),
        Err(HostError::CallbackAlreadyConfigured)
    );
}
