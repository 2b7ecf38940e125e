#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Mirrors driver telemetry to the debug probe.
//!
//! The core driver keeps its own ring of [`TelemetryRecord`]s. After every
//! batch of steps the acquisition task drains the records it has not seen
//! yet and forwards them to defmt (or stdout on host builds) so bring-up can
//! watch arbitration without attaching a host.

use hx711_core::telemetry::{EventId, TelemetryEvent, TelemetryLog, TelemetryRecord};

/// Tracks how far the driver's telemetry ring has been mirrored.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TelemetryMirror {
    cursor: EventId,
}

impl TelemetryMirror {
    pub const fn new() -> Self {
        Self { cursor: 0 }
    }

    /// Forwards every record newer than the previous call and returns how
    /// many were emitted.
    pub fn drain(&mut self, log: &TelemetryLog) -> usize {
        let mut emitted = 0;
        for record in log.since(self.cursor) {
            emit_record(record);
            emitted += 1;
        }
        self.cursor = log.next_id();
        emitted
    }
}

const fn event_label(event: &TelemetryEvent) -> &'static str {
    match event {
        TelemetryEvent::BusAcquired => "bus-acquired",
        TelemetryEvent::BusQueued { .. } => "bus-queued",
        TelemetryEvent::AdcNotReady => "adc-not-ready",
        TelemetryEvent::SampleEmitted { .. } => "sample",
        TelemetryEvent::AcquisitionArmed { .. } => "armed",
    }
}

#[cfg(target_os = "none")]
fn emit_record(record: &TelemetryRecord) {
    let label = event_label(&record.event);
    match record.event {
        TelemetryEvent::AdcNotReady => defmt::warn!(
            "telemetry:hx711 #{} t={} oid={} {}",
            record.id,
            record.tick.raw(),
            record.oid,
            label
        ),
        TelemetryEvent::SampleEmitted { .. } => defmt::info!(
            "telemetry:hx711 #{} t={} oid={} {} arg={}",
            record.id,
            record.tick.raw(),
            record.oid,
            label,
            record.event.argument()
        ),
        _ => defmt::debug!(
            "telemetry:hx711 #{} t={} oid={} {} arg={}",
            record.id,
            record.tick.raw(),
            record.oid,
            label,
            record.event.argument()
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &TelemetryRecord) {
    println!(
        "telemetry:hx711 #{} t={} oid={} {} arg={}",
        record.id,
        record.tick.raw(),
        record.oid,
        event_label(&record.event),
        record.event.argument()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use hx711_core::clock::Tick;

    #[test]
    fn drain_only_forwards_new_records() {
        let mut log: TelemetryLog = TelemetryLog::new();
        let mut mirror = TelemetryMirror::new();

        log.record(0, TelemetryEvent::BusAcquired, Tick::new(10));
        log.record(0, TelemetryEvent::SampleEmitted { value: -5 }, Tick::new(20));
        assert_eq!(mirror.drain(&log), 2);
        assert_eq!(mirror.drain(&log), 0);

        log.record(1, TelemetryEvent::AdcNotReady, Tick::new(30));
        assert_eq!(mirror.drain(&log), 1);
    }

    #[test]
    fn labels_match_event_kinds() {
        assert_eq!(event_label(&TelemetryEvent::BusQueued { slot: Tick::new(5) }), "bus-queued");
        assert_eq!(event_label(&TelemetryEvent::SampleEmitted { value: 1 }), "sample");
    }
}
