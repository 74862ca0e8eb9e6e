//! Telemetry event catalog and the fixed-size recorder shared by firmware and host targets.
//!
//! Events encode to compact numeric codes so the firmware can mirror them over
//! defmt and the emulator can print them, while the payloads stay `Copy` and
//! allocation-free.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::channel::{AdcChannel, ChannelSelection};
use crate::storage::{EraseSpan, SaveReport, StorageError};

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Discriminated telemetry events emitted by the capture pipeline.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    ChannelSelected(AdcChannel),
    AcquisitionStarted,
    AcquisitionComplete,
    AcquisitionRejected,
    RegionErased,
    RegionProgrammed,
    RegionLoaded,
    StorageFault,
    Custom(u16),
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::ChannelSelected(channel) => write!(f, "channel-selected {channel}"),
            TelemetryEventKind::AcquisitionStarted => f.write_str("acquisition-started"),
            TelemetryEventKind::AcquisitionComplete => f.write_str("acquisition-complete"),
            TelemetryEventKind::AcquisitionRejected => f.write_str("acquisition-rejected"),
            TelemetryEventKind::RegionErased => f.write_str("region-erased"),
            TelemetryEventKind::RegionProgrammed => f.write_str("region-programmed"),
            TelemetryEventKind::RegionLoaded => f.write_str("region-loaded"),
            TelemetryEventKind::StorageFault => f.write_str("storage-fault"),
            TelemetryEventKind::Custom(code) => write!(f, "custom({code})"),
        }
    }
}

impl TelemetryEventKind {
    const CHANNEL_SELECTED_BASE: u16 = 0x0000;
    const ACQUISITION_STARTED_CODE: u16 = 0x0010;
    const ACQUISITION_COMPLETE_CODE: u16 = 0x0011;
    const ACQUISITION_REJECTED_CODE: u16 = 0x0012;
    const REGION_ERASED_CODE: u16 = 0x0020;
    const REGION_PROGRAMMED_CODE: u16 = 0x0021;
    const REGION_LOADED_CODE: u16 = 0x0022;
    const STORAGE_FAULT_CODE: u16 = 0x0023;

    /// Encodes the event into a compact transport-friendly discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u16 {
        match self {
            TelemetryEventKind::ChannelSelected(channel) => {
                Self::CHANNEL_SELECTED_BASE + channel_index(channel)
            }
            TelemetryEventKind::AcquisitionStarted => Self::ACQUISITION_STARTED_CODE,
            TelemetryEventKind::AcquisitionComplete => Self::ACQUISITION_COMPLETE_CODE,
            TelemetryEventKind::AcquisitionRejected => Self::ACQUISITION_REJECTED_CODE,
            TelemetryEventKind::RegionErased => Self::REGION_ERASED_CODE,
            TelemetryEventKind::RegionProgrammed => Self::REGION_PROGRAMMED_CODE,
            TelemetryEventKind::RegionLoaded => Self::REGION_LOADED_CODE,
            TelemetryEventKind::StorageFault => Self::STORAGE_FAULT_CODE,
            TelemetryEventKind::Custom(code) => code,
        }
    }

    /// Decodes a raw discriminant, falling back to [`TelemetryEventKind::Custom`].
    #[must_use]
    pub fn from_raw(code: u16) -> Self {
        match code {
            Self::ACQUISITION_STARTED_CODE => TelemetryEventKind::AcquisitionStarted,
            Self::ACQUISITION_COMPLETE_CODE => TelemetryEventKind::AcquisitionComplete,
            Self::ACQUISITION_REJECTED_CODE => TelemetryEventKind::AcquisitionRejected,
            Self::REGION_ERASED_CODE => TelemetryEventKind::RegionErased,
            Self::REGION_PROGRAMMED_CODE => TelemetryEventKind::RegionProgrammed,
            Self::REGION_LOADED_CODE => TelemetryEventKind::RegionLoaded,
            Self::STORAGE_FAULT_CODE => TelemetryEventKind::StorageFault,
            value if (Self::CHANNEL_SELECTED_BASE..Self::ACQUISITION_STARTED_CODE)
                .contains(&value) =>
            {
                let offset = value - Self::CHANNEL_SELECTED_BASE;
                channel_from_index(offset).map_or(TelemetryEventKind::Custom(value), |channel| {
                    TelemetryEventKind::ChannelSelected(channel)
                })
            }
            other => TelemetryEventKind::Custom(other),
        }
    }
}

/// Why an acquisition request produced no buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RejectReason {
    Busy,
    Allocation,
    Custom(u8),
}

impl RejectReason {
    const BUSY_CODE: u8 = 0x00;
    const ALLOCATION_CODE: u8 = 0x01;

    #[must_use]
    pub const fn to_raw(self) -> u8 {
        match self {
            RejectReason::Busy => Self::BUSY_CODE,
            RejectReason::Allocation => Self::ALLOCATION_CODE,
            RejectReason::Custom(code) => code,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u8) -> Self {
        match code {
            Self::BUSY_CODE => RejectReason::Busy,
            Self::ALLOCATION_CODE => RejectReason::Allocation,
            other => RejectReason::Custom(other),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    Selection(SelectionTelemetry),
    Acquisition(AcquisitionTelemetry),
    Rejection(RejectReason),
    Storage(StorageTelemetry),
    Fault(StorageError),
}

impl TelemetryPayload {
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Selection event payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SelectionTelemetry {
    pub sequence: u32,
}

/// Acquisition payload; `captured` is zero for the start record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AcquisitionTelemetry {
    pub channel: AdcChannel,
    pub budget: u32,
    pub captured: u32,
    pub elapsed: Option<Duration>,
}

/// Region access payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StorageTelemetry {
    pub offset: u32,
    pub bytes: u32,
    pub samples: u32,
}

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    acquisition_started_at: Option<TInstant>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            acquisition_started_at: None,
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn record_selection(&mut self, selection: ChannelSelection, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::ChannelSelected(selection.channel),
            TelemetryPayload::Selection(SelectionTelemetry {
                sequence: selection.sequence,
            }),
            timestamp,
        )
    }

    /// Records the start of an acquisition and remembers when it began.
    pub fn record_acquisition_started(
        &mut self,
        channel: AdcChannel,
        budget: usize,
        timestamp: TInstant,
    ) -> EventId {
        self.acquisition_started_at = Some(timestamp);
        let payload = TelemetryPayload::Acquisition(AcquisitionTelemetry {
            channel,
            budget: saturate(budget),
            captured: 0,
            elapsed: None,
        });
        self.record(TelemetryEventKind::AcquisitionStarted, payload, timestamp)
    }

    /// Records a finished acquisition along with its wall time.
    pub fn record_acquisition_complete(
        &mut self,
        channel: AdcChannel,
        budget: usize,
        captured: usize,
        timestamp: TInstant,
    ) -> EventId {
        let elapsed = self
            .acquisition_started_at
            .take()
            .map(|start| timestamp.saturating_duration_since(start));
        let payload = TelemetryPayload::Acquisition(AcquisitionTelemetry {
            channel,
            budget: saturate(budget),
            captured: saturate(captured),
            elapsed,
        });
        self.record(TelemetryEventKind::AcquisitionComplete, payload, timestamp)
    }

    pub fn record_acquisition_rejected(
        &mut self,
        reason: RejectReason,
        timestamp: TInstant,
    ) -> EventId {
        self.acquisition_started_at = None;
        self.record(
            TelemetryEventKind::AcquisitionRejected,
            TelemetryPayload::Rejection(reason),
            timestamp,
        )
    }

    /// Records both halves of a completed write cycle.
    pub fn record_save(&mut self, report: &SaveReport, timestamp: TInstant) -> EventId {
        self.record_region_erased(report.erased, timestamp);
        let payload = TelemetryPayload::Storage(StorageTelemetry {
            offset: saturate(report.erased.offset),
            bytes: saturate(report.programmed),
            samples: saturate(report.samples),
        });
        self.record(TelemetryEventKind::RegionProgrammed, payload, timestamp)
    }

    pub fn record_region_erased(&mut self, span: EraseSpan, timestamp: TInstant) -> EventId {
        let payload = TelemetryPayload::Storage(StorageTelemetry {
            offset: saturate(span.offset),
            bytes: saturate(span.len),
            samples: 0,
        });
        self.record(TelemetryEventKind::RegionErased, payload, timestamp)
    }

    pub fn record_region_loaded(
        &mut self,
        offset: usize,
        samples: usize,
        timestamp: TInstant,
    ) -> EventId {
        let payload = TelemetryPayload::Storage(StorageTelemetry {
            offset: saturate(offset),
            bytes: saturate(samples.saturating_mul(crate::buffer::SAMPLE_BYTES)),
            samples: saturate(samples),
        });
        self.record(TelemetryEventKind::RegionLoaded, payload, timestamp)
    }

    pub fn record_storage_fault(&mut self, error: StorageError, timestamp: TInstant) -> EventId {
        self.record(
            TelemetryEventKind::StorageFault,
            TelemetryPayload::Fault(error),
            timestamp,
        )
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

const fn channel_index(channel: AdcChannel) -> u16 {
    match channel {
        AdcChannel::Ain0 => 0,
        AdcChannel::Ain1 => 1,
        AdcChannel::Ain2 => 2,
    }
}

fn channel_from_index(index: u16) -> Option<AdcChannel> {
    u8::try_from(index).ok().and_then(AdcChannel::from_index)
}

fn saturate(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
