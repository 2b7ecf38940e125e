//! Acquisition telemetry shared by firmware and host targets.
//!
//! Every notable transition of a channel (bus admission, an unready ADC, a
//! completed sample, a re-armed acquisition) is captured as a
//! [`TelemetryRecord`] in a fixed-size ring. Firmware mirrors the records to
//! `defmt`; the emulator writes them into session transcripts. Events encode
//! to compact numeric codes for transport over diagnostics channels.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::clock::Tick;
use crate::device::{Oid, Sample, StepEvent, StepOutcome};

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Discriminated acquisition events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TelemetryEvent {
    /// The channel took ownership of the bus.
    BusAcquired,
    /// The bus was contended; the channel sleeps until `slot`.
    BusQueued { slot: Tick },
    /// The ADC was still converting when its slot came up.
    AdcNotReady,
    /// A conversion completed and was reported.
    SampleEmitted { value: Sample },
    /// A new acquisition was armed with its first wake at `wake`.
    AcquisitionArmed { wake: Tick },
}

impl TelemetryEvent {
    const BUS_ACQUIRED_CODE: u8 = 0x01;
    const BUS_QUEUED_CODE: u8 = 0x02;
    const ADC_NOT_READY_CODE: u8 = 0x03;
    const SAMPLE_EMITTED_CODE: u8 = 0x04;
    const ACQUISITION_ARMED_CODE: u8 = 0x05;

    /// Encodes the event kind into a transport-friendly discriminant.
    #[must_use]
    pub const fn code(&self) -> u8 {
        match self {
            TelemetryEvent::BusAcquired => Self::BUS_ACQUIRED_CODE,
            TelemetryEvent::BusQueued { .. } => Self::BUS_QUEUED_CODE,
            TelemetryEvent::AdcNotReady => Self::ADC_NOT_READY_CODE,
            TelemetryEvent::SampleEmitted { .. } => Self::SAMPLE_EMITTED_CODE,
            TelemetryEvent::AcquisitionArmed { .. } => Self::ACQUISITION_ARMED_CODE,
        }
    }

    /// Extra 32-bit argument carried by the event, zero when there is none.
    #[must_use]
    pub const fn argument(&self) -> u32 {
        match self {
            TelemetryEvent::BusQueued { slot } | TelemetryEvent::AcquisitionArmed { wake: slot } => {
                slot.raw()
            }
            TelemetryEvent::SampleEmitted { value } => value.cast_unsigned(),
            TelemetryEvent::BusAcquired | TelemetryEvent::AdcNotReady => 0,
        }
    }

    /// Rebuilds an event from its code and argument.
    #[must_use]
    pub const fn from_raw(code: u8, argument: u32) -> Option<Self> {
        match code {
            Self::BUS_ACQUIRED_CODE => Some(TelemetryEvent::BusAcquired),
            Self::BUS_QUEUED_CODE => Some(TelemetryEvent::BusQueued {
                slot: Tick::new(argument),
            }),
            Self::ADC_NOT_READY_CODE => Some(TelemetryEvent::AdcNotReady),
            Self::SAMPLE_EMITTED_CODE => Some(TelemetryEvent::SampleEmitted {
                value: argument.cast_signed(),
            }),
            Self::ACQUISITION_ARMED_CODE => Some(TelemetryEvent::AcquisitionArmed {
                wake: Tick::new(argument),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for TelemetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEvent::BusAcquired => f.write_str("bus-acquired"),
            TelemetryEvent::BusQueued { slot } => write!(f, "bus-queued slot={slot}"),
            TelemetryEvent::AdcNotReady => f.write_str("adc-not-ready"),
            TelemetryEvent::SampleEmitted { value } => write!(f, "sample value={value}"),
            TelemetryEvent::AcquisitionArmed { wake } => write!(f, "armed wake={wake}"),
        }
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetryRecord {
    pub id: EventId,
    pub tick: Tick,
    pub oid: Oid,
    pub event: TelemetryEvent,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} @{} oid={} {}",
            self.id, self.tick, self.oid, self.event
        )
    }
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord, CAPACITY>;

/// Records acquisition events into a fixed-size ring buffer.
pub struct TelemetryLog<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: TelemetryRing<CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> TelemetryLog<CAPACITY> {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent record, if available.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Identifier the next record will receive.
    ///
    /// Callers draining the log incrementally remember this value and skip
    /// older records on their next pass.
    #[must_use]
    pub const fn next_id(&self) -> EventId {
        self.next_event_id
    }

    /// Records an arbitrary event.
    pub fn record(&mut self, oid: Oid, event: TelemetryEvent, tick: Tick) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            tick,
            oid,
            event,
        });

        id
    }

    /// Records the events implied by one device step taken at `tick`.
    pub fn record_step(&mut self, oid: Oid, outcome: &StepOutcome, tick: Tick) {
        if outcome.acquired {
            self.record(oid, TelemetryEvent::BusAcquired, tick);
        }
        match outcome.event {
            StepEvent::Queued { slot } => {
                self.record(oid, TelemetryEvent::BusQueued { slot }, tick);
            }
            StepEvent::NotReady => {
                self.record(oid, TelemetryEvent::AdcNotReady, tick);
            }
            StepEvent::Completed(report) => {
                self.record(
                    oid,
                    TelemetryEvent::SampleEmitted {
                        value: report.value,
                    },
                    tick,
                );
            }
            StepEvent::ClockHigh | StepEvent::ClockLow { .. } => {}
        }
    }

    /// Records that an acquisition was (re)armed.
    pub fn record_armed(&mut self, oid: Oid, wake: Tick, tick: Tick) -> EventId {
        self.record(oid, TelemetryEvent::AcquisitionArmed { wake }, tick)
    }

    /// Iterates records with an id at or after `since`, oldest first.
    pub fn since(&self, since: EventId) -> impl Iterator<Item = &TelemetryRecord> {
        self.oldest_first()
            .filter(move |record| record.id.wrapping_sub(since).cast_signed() >= 0)
    }
}

impl<const CAPACITY: usize> Default for TelemetryLog<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SampleReport;

    #[test]
    fn event_codes_round_trip_with_arguments() {
        let events = [
            TelemetryEvent::BusAcquired,
            TelemetryEvent::BusQueued {
                slot: Tick::new(1_234),
            },
            TelemetryEvent::AdcNotReady,
            TelemetryEvent::SampleEmitted { value: -8_388_608 },
            TelemetryEvent::AcquisitionArmed {
                wake: Tick::new(u32::MAX),
            },
        ];

        for event in events {
            assert_eq!(
                TelemetryEvent::from_raw(event.code(), event.argument()),
                Some(event)
            );
        }
        assert_eq!(TelemetryEvent::from_raw(0xEE, 0), None);
    }

    #[test]
    fn step_outcomes_map_to_events() {
        let mut log = TelemetryLog::<8>::new();
        let report = SampleReport {
            oid: 2,
            next_clock: Tick::new(9_000),
            value: 42,
        };

        log.record_step(
            2,
            &StepOutcome {
                wake_at: Tick::new(110),
                acquired: true,
                clock: Some(true),
                event: StepEvent::ClockHigh,
            },
            Tick::new(100),
        );
        log.record_step(
            2,
            &StepOutcome {
                wake_at: Tick::new(9_000),
                acquired: false,
                clock: Some(false),
                event: StepEvent::Completed(report),
            },
            Tick::new(600),
        );

        let events: heapless::Vec<TelemetryEvent, 8> =
            log.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[
                TelemetryEvent::BusAcquired,
                TelemetryEvent::SampleEmitted { value: 42 }
            ]
        );
        assert_eq!(log.latest().map(|record| record.tick), Some(Tick::new(600)));
    }

    #[test]
    fn ring_keeps_most_recent_records() {
        let mut log = TelemetryLog::<2>::new();
        for raw in 0..5 {
            log.record(0, TelemetryEvent::AdcNotReady, Tick::new(raw));
        }

        assert_eq!(log.len(), 2);
        assert_eq!(log.next_id(), 5);
        let ids: heapless::Vec<EventId, 2> = log.since(3).map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[3, 4]);
        assert_eq!(log.since(5).count(), 0);
    }
}
