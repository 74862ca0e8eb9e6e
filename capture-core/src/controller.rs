//! Single owner of the sampler and the storage manager.
//!
//! Every operation takes `&mut self`, so an acquisition, a save, and a load can
//! never overlap. Only channel selection reaches the shared [`CaptureState`]
//! from elsewhere.

use core::fmt;
use core::time::Duration;

use crate::buffer::SampleBuffer;
use crate::channel::{
    AdcChannel, CaptureState, ChannelSelection, ChannelSelector, SamplerPhase, SelectionTrigger,
};
use crate::sampler::{AnalogSource, CaptureError, SampleClock, Sampler};
use crate::storage::{FlashFence, NvStorage, SaveReport, StorageError, StorageManager, StorageRegion};
use crate::telemetry::{RejectReason, TELEMETRY_RING_CAPACITY, TelemetryInstant, TelemetryRecorder};

/// Failure of a combined capture-and-store run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ControllerError {
    Capture(CaptureError),
    Storage(StorageError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::Capture(err) => write!(f, "capture failed: {err}"),
            ControllerError::Storage(err) => write!(f, "storage failed: {err}"),
        }
    }
}

impl From<CaptureError> for ControllerError {
    fn from(value: CaptureError) -> Self {
        ControllerError::Capture(value)
    }
}

impl From<StorageError> for ControllerError {
    fn from(value: StorageError) -> Self {
        ControllerError::Storage(value)
    }
}

/// Result of [`CaptureController::capture_and_store`].
#[derive(Debug, PartialEq)]
pub struct CaptureOutcome {
    pub captured: SampleBuffer,
    pub saved: SaveReport,
    pub readback: SampleBuffer,
}

/// Point-in-time view for status reporting.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControllerStatus {
    pub channel: AdcChannel,
    pub phase: SamplerPhase,
    pub acquiring: bool,
    pub selections: u32,
    /// Selections whose telemetry record was dropped on a full queue.
    pub dropped_selections: u32,
    pub region: StorageRegion,
    pub last_saved: Option<usize>,
}

pub struct CaptureController<'a, A, C, S, F, const N: usize = TELEMETRY_RING_CAPACITY>
where
    C: SampleClock,
{
    sampler: Sampler<'a, A, C>,
    storage: StorageManager<S, F>,
    telemetry: TelemetryRecorder<C::Instant, N>,
    last_saved: Option<usize>,
}

impl<'a, A, C, S, F, const N: usize> CaptureController<'a, A, C, S, F, N>
where
    A: AnalogSource,
    C: SampleClock,
    C::Instant: TelemetryInstant,
    S: NvStorage,
    F: FlashFence,
{
    pub fn new(sampler: Sampler<'a, A, C>, storage: StorageManager<S, F>) -> Self {
        Self {
            sampler,
            storage,
            telemetry: TelemetryRecorder::new(),
            last_saved: None,
        }
    }

    pub fn state(&self) -> &'a CaptureState {
        self.sampler.state()
    }

    pub fn sampler(&self) -> &Sampler<'a, A, C> {
        &self.sampler
    }

    pub fn sampler_mut(&mut self) -> &mut Sampler<'a, A, C> {
        &mut self.sampler
    }

    pub fn storage(&self) -> &StorageManager<S, F> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageManager<S, F> {
        &mut self.storage
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<C::Instant, N> {
        &self.telemetry
    }

    /// Sample count of the most recent successful save.
    ///
    /// The region itself stores no length, so this is the only record of it.
    pub fn last_saved_len(&self) -> Option<usize> {
        self.last_saved
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.state();
        ControllerStatus {
            channel: state.active_channel(),
            phase: state.phase(),
            acquiring: state.is_acquiring(),
            selections: state.selection_count(),
            dropped_selections: state.dropped_selections(),
            region: self.storage.region(),
            last_saved: self.last_saved,
        }
    }

    /// Applies a selection event from the controller's own context.
    pub fn select(&mut self, trigger: SelectionTrigger) -> ChannelSelection {
        let selection = ChannelSelector::new(self.state()).on_trigger(trigger);
        self.note_selection(selection);
        selection
    }

    /// Records a selection that was handled elsewhere, e.g. by an interrupt task.
    pub fn note_selection(&mut self, selection: ChannelSelection) {
        let now = self.now();
        self.telemetry.record_selection(selection, now);
    }

    pub fn acquire(&mut self, duration: Duration) -> Result<SampleBuffer, CaptureError> {
        if self.state().is_acquiring() {
            let now = self.now();
            self.telemetry
                .record_acquisition_rejected(RejectReason::Busy, now);
            return Err(CaptureError::Busy);
        }

        let channel = self.state().active_channel();
        let budget = self.sampler.config().budget_for(duration);
        let started = self.now();
        self.telemetry
            .record_acquisition_started(channel, budget, started);

        let result = self.sampler.acquire(duration);
        let now = self.now();
        match &result {
            Ok(buffer) => {
                self.telemetry
                    .record_acquisition_complete(channel, budget, buffer.len(), now);
            }
            Err(CaptureError::Busy) => {
                self.telemetry
                    .record_acquisition_rejected(RejectReason::Busy, now);
            }
            Err(CaptureError::Allocation(_)) => {
                self.telemetry
                    .record_acquisition_rejected(RejectReason::Allocation, now);
            }
        }
        result
    }

    /// Persists `buffer` to the configured region.
    ///
    /// # Panics
    ///
    /// Panics on a fence timeout when the storage policy is `Abort`.
    pub fn save(&mut self, buffer: &SampleBuffer) -> Result<SaveReport, StorageError> {
        let region = self.storage.region();
        let result = self.storage.save(buffer, region);
        let now = self.now();
        match &result {
            Ok(report) => {
                self.telemetry.record_save(report, now);
                self.last_saved = Some(report.samples);
            }
            Err(err) => {
                self.telemetry.record_storage_fault(*err, now);
            }
        }
        result
    }

    /// Reads `count` samples from the configured region, valid or not.
    pub fn load(&mut self, count: usize) -> Result<SampleBuffer, StorageError> {
        let region = self.storage.region();
        let result = self.storage.load(region, count);
        let now = self.now();
        match &result {
            Ok(buffer) => {
                self.telemetry
                    .record_region_loaded(region.offset, buffer.len(), now);
            }
            Err(err) => {
                self.telemetry.record_storage_fault(*err, now);
            }
        }
        result
    }

    /// Reads back exactly what the last successful save wrote.
    pub fn load_last(&mut self) -> Result<SampleBuffer, StorageError> {
        self.load(self.last_saved.unwrap_or(0))
    }

    /// Acquire, persist, and read the capture back with its own sample count.
    ///
    /// # Panics
    ///
    /// Panics on a fence timeout when the storage policy is `Abort`.
    pub fn capture_and_store(&mut self, duration: Duration) -> Result<CaptureOutcome, ControllerError> {
        let captured = self.acquire(duration)?;
        let saved = self.save(&captured)?;
        let readback = self.load(captured.len())?;
        Ok(CaptureOutcome {
            captured,
            saved,
            readback,
        })
    }

    fn now(&self) -> C::Instant {
        self.sampler.clock().now()
    }
}
