//! Fires the driver at each wake tick and forwards completed reports.

use embassy_futures::select::{Either, select};
use embassy_time::{Instant, Timer};
use heapless::Deque;
use hx711_core::device::SampleReport;

use super::{Acquisition, LINK_COUNTERS, LINK_TX, SharedAcquisition, WAKE_CHANGED, instant_for, tick_at};
use crate::link::{encode_line, report_line};
use crate::telemetry::TelemetryMirror;

/// Reports buffered between two lock sections.
const REPORT_BATCH: usize = 8;

#[embassy_executor::task]
pub async fn run(shared: &'static SharedAcquisition) -> ! {
    let mut mirror = TelemetryMirror::new();
    let mut reports: Deque<SampleReport, REPORT_BATCH> = Deque::new();

    loop {
        let next = shared.lock(|cell| cell.borrow().executor.control().next_wake());
        let Some(wake) = next else {
            WAKE_CHANGED.wait().await;
            continue;
        };

        let deadline = instant_for(wake, Instant::now());
        if let Either::Second(()) = select(Timer::at(deadline), WAKE_CHANGED.wait()).await {
            continue;
        }

        let now = tick_at(Instant::now());
        let result = shared.lock(|cell| {
            let mut acquisition = cell.borrow_mut();
            let Acquisition { executor, gpio } = &mut *acquisition;
            let driver = executor.control_mut();
            let result = driver.run_due(now, gpio, &mut reports);
            mirror.drain(driver.telemetry());
            result
        });
        if let Err(err) = result {
            defmt::error!("acquisition: {}", err);
        }

        while let Some(report) = reports.pop_front() {
            forward_report(&report);
        }
    }
}

fn forward_report(report: &SampleReport) {
    if !LINK_COUNTERS.host_attached() {
        LINK_COUNTERS.record_report_dropped();
        return;
    }

    let line = report_line(report);
    let mut complete = true;
    encode_line(&line, |frame| {
        complete &= LINK_TX.try_send(frame).is_ok();
    });

    if complete {
        LINK_COUNTERS.record_report_sent();
    } else {
        LINK_COUNTERS.record_report_dropped();
        defmt::warn!("acquisition: dropped report oid={} (link queue full)", report.oid);
    }
}
