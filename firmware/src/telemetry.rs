#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Mirrors capture-core telemetry to defmt on the target and stdout on the host.

use core::fmt::Display;

use capture_core::telemetry::{
    EventId, TelemetryEventKind, TelemetryPayload, TelemetryRecord,
    TelemetryRecorder,
};

use crate::clock::FirmwareInstant;

pub type FirmwareTelemetry = TelemetryRecorder<FirmwareInstant>;

/// Forwards records that have not been logged yet.
#[derive(Default)]
pub struct TelemetryMirror {
    next_id: EventId,
}

impl TelemetryMirror {
    pub const fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Logs every record newer than the last flush; returns how many.
    pub fn flush(&mut self, telemetry: &FirmwareTelemetry) -> usize {
        let mut logged = 0;
        for record in telemetry.oldest_first() {
            if record.id.wrapping_sub(self.next_id) > EventId::MAX / 2 {
                continue;
            }
            let summary = summarize(record);
            emit_record(event_label(record.event), &summary);
            self.next_id = record.id.wrapping_add(1);
            logged += 1;
        }
        logged
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct RecordSummary {
    id: EventId,
    code: u16,
    timestamp_us: u64,
    primary: u32,
    secondary: u32,
    elapsed_us: Option<u64>,
}

fn summarize(record: &TelemetryRecord<FirmwareInstant>) -> RecordSummary {
    let (primary, secondary, elapsed_us) = match record.details {
        TelemetryPayload::None | TelemetryPayload::Fault(_) => (0, 0, None),
        TelemetryPayload::Selection(details) => (details.sequence, 0, None),
        TelemetryPayload::Acquisition(details) => (
            details.captured,
            details.budget,
            details
                .elapsed
                .map(|elapsed| u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)),
        ),
        TelemetryPayload::Rejection(reason) => (u32::from(reason.to_raw()), 0, None),
        TelemetryPayload::Storage(details) => (details.samples, details.bytes, None),
    };

    RecordSummary {
        id: record.id,
        code: record.event.to_raw(),
        timestamp_us: record.timestamp.as_micros(),
        primary,
        secondary,
        elapsed_us,
    }
}

const fn event_label(event: TelemetryEventKind) -> &'static str {
    match event {
        TelemetryEventKind::ChannelSelected(_) => "channel-selected",
        TelemetryEventKind::AcquisitionStarted => "acquisition-started",
        TelemetryEventKind::AcquisitionComplete => "acquisition-complete",
        TelemetryEventKind::AcquisitionRejected => "acquisition-rejected",
        TelemetryEventKind::RegionErased => "region-erased",
        TelemetryEventKind::RegionProgrammed => "region-programmed",
        TelemetryEventKind::RegionLoaded => "region-loaded",
        TelemetryEventKind::StorageFault => "storage-fault",
        TelemetryEventKind::Custom(_) => "custom",
    }
}

#[cfg(target_os = "none")]
fn emit_record(label: &'static str, summary: &RecordSummary) {
    if let Some(elapsed) = summary.elapsed_us {
        defmt::info!(
            "telemetry #{} {} ({=u16:#x}) t={}us a={} b={} Δ={}us",
            summary.id,
            label,
            summary.code,
            summary.timestamp_us,
            summary.primary,
            summary.secondary,
            elapsed
        );
    } else {
        defmt::info!(
            "telemetry #{} {} ({=u16:#x}) t={}us a={} b={}",
            summary.id,
            label,
            summary.code,
            summary.timestamp_us,
            summary.primary,
            summary.secondary
        );
    }
}

#[cfg(not(target_os = "none"))]
fn emit_record(label: &'static str, summary: &RecordSummary) {
    if let Some(elapsed) = summary.elapsed_us {
        println!(
            "telemetry #{} {} ({:#x}) t={}us a={} b={} Δ={}us",
            summary.id,
            label,
            summary.code,
            summary.timestamp_us,
            summary.primary,
            summary.secondary,
            elapsed
        );
    } else {
        println!(
            "telemetry #{} {} ({:#x}) t={}us a={} b={}",
            summary.id, label, summary.code, summary.timestamp_us, summary.primary, summary.secondary
        );
    }
}

/// Logs a run of samples in volts.
#[cfg(target_os = "none")]
pub fn emit_samples(label: &'static str, values: &[f64]) {
    defmt::info!("{} ({} samples):", label, values.len());
    for value in values {
        defmt::info!("  {=f64}", *value);
    }
}

#[cfg(not(target_os = "none"))]
pub fn emit_samples(label: &'static str, values: &[f64]) {
    println!("{label} ({} samples):", values.len());
    let line: Vec<String> = values.iter().map(|value| format!("{value:.5}")).collect();
    println!("{}", line.join(" "));
}

#[cfg(target_os = "none")]
pub fn emit_failure(context: &'static str, error: &impl Display) {
    defmt::warn!("{}: {}", context, defmt::Display2Format(error));
}

#[cfg(not(target_os = "none"))]
pub fn emit_failure(context: &'static str, error: &impl Display) {
    println!("{context}: {error}");
}
