//! Active-input selection and the shared capture state.
//!
//! [`CaptureState`] is the only state shared between the selection event
//! handler and the sampling loop. Every field is a single-word atomic so the
//! handler may run from interrupt context while an acquisition is blocked in
//! its pacing wait. The handler never allocates, blocks, or performs I/O.

use core::fmt;

use portable_atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

/// Number of analog inputs multiplexed onto the ADC.
pub const CHANNEL_COUNT: usize = 3;

/// Channel selected at power-up.
pub const DEFAULT_CHANNEL: AdcChannel = AdcChannel::Ain0;

/// Analog input lines routed through the ADC mux.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdcChannel {
    Ain0,
    Ain1,
    Ain2,
}

impl AdcChannel {
    /// Every selectable channel in mux order.
    pub const ALL: [AdcChannel; CHANNEL_COUNT] =
        [AdcChannel::Ain0, AdcChannel::Ain1, AdcChannel::Ain2];

    /// Mux index for the channel.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            AdcChannel::Ain0 => 0,
            AdcChannel::Ain1 => 1,
            AdcChannel::Ain2 => 2,
        }
    }

    /// Attempts to construct a channel from a raw mux index.
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(AdcChannel::Ain0),
            1 => Some(AdcChannel::Ain1),
            2 => Some(AdcChannel::Ain2),
            _ => None,
        }
    }
}

impl fmt::Display for AdcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ADC{}", self.index())
    }
}

/// Discrete selection inputs, one per channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SelectionTrigger {
    Sel0,
    Sel1,
    Sel2,
}

impl SelectionTrigger {
    /// Channel that the trigger selects.
    #[must_use]
    pub const fn channel(self) -> AdcChannel {
        match self {
            SelectionTrigger::Sel0 => AdcChannel::Ain0,
            SelectionTrigger::Sel1 => AdcChannel::Ain1,
            SelectionTrigger::Sel2 => AdcChannel::Ain2,
        }
    }

    /// Trigger wired to `channel`.
    #[must_use]
    pub const fn for_channel(channel: AdcChannel) -> Self {
        match channel {
            AdcChannel::Ain0 => SelectionTrigger::Sel0,
            AdcChannel::Ain1 => SelectionTrigger::Sel1,
            AdcChannel::Ain2 => SelectionTrigger::Sel2,
        }
    }

    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(SelectionTrigger::Sel0),
            1 => Some(SelectionTrigger::Sel1),
            2 => Some(SelectionTrigger::Sel2),
            _ => None,
        }
    }
}

/// Lifecycle of the sampler: `Idle → Arming → Sampling → Idle`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SamplerPhase {
    Idle,
    Arming,
    Sampling,
}

impl SamplerPhase {
    const fn to_raw(self) -> u8 {
        match self {
            SamplerPhase::Idle => 0,
            SamplerPhase::Arming => 1,
            SamplerPhase::Sampling => 2,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => SamplerPhase::Arming,
            2 => SamplerPhase::Sampling,
            _ => SamplerPhase::Idle,
        }
    }
}

/// Shared state consulted by the sampler and mutated by the selector.
pub struct CaptureState {
    active_channel: AtomicU8,
    acquiring: AtomicBool,
    deadline_reached: AtomicBool,
    phase: AtomicU8,
    selections: AtomicU32,
    dropped_selections: AtomicU32,
}

impl CaptureState {
    /// Creates the state with `channel` active and no acquisition in flight.
    #[must_use]
    pub const fn new(channel: AdcChannel) -> Self {
        Self {
            active_channel: AtomicU8::new(channel.index()),
            acquiring: AtomicBool::new(false),
            deadline_reached: AtomicBool::new(false),
            phase: AtomicU8::new(SamplerPhase::Idle.to_raw()),
            selections: AtomicU32::new(0),
            dropped_selections: AtomicU32::new(0),
        }
    }

    /// Channel that the next raw read will use.
    pub fn active_channel(&self) -> AdcChannel {
        let raw = self.active_channel.load(Ordering::Acquire);
        AdcChannel::from_index(raw).unwrap_or(DEFAULT_CHANNEL)
    }

    /// Number of selection events handled since start-up (wrapping).
    pub fn selection_count(&self) -> u32 {
        self.selections.load(Ordering::Acquire)
    }

    /// Selection records lost before reaching telemetry (wrapping).
    pub fn dropped_selections(&self) -> u32 {
        self.dropped_selections.load(Ordering::Acquire)
    }

    /// Counts a selection whose record could not be forwarded. The channel
    /// switch itself has already happened.
    pub fn note_dropped_selection(&self) {
        self.dropped_selections.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns `true` while an acquisition holds the status flag.
    pub fn is_acquiring(&self) -> bool {
        self.acquiring.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> SamplerPhase {
        SamplerPhase::from_raw(self.phase.load(Ordering::Acquire))
    }

    /// Claims the acquisition status flag.
    ///
    /// Returns `None` without waiting when another acquisition already owns it.
    pub fn begin_acquisition(&self) -> Option<AcquisitionGuard<'_>> {
        self.acquiring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AcquisitionGuard { state: self })
    }

    /// Marks the acquisition deadline as reached.
    ///
    /// Safe to call from an alarm interrupt.
    pub fn expire_deadline(&self) {
        self.deadline_reached.store(true, Ordering::Release);
    }

    pub fn deadline_reached(&self) -> bool {
        self.deadline_reached.load(Ordering::Acquire)
    }

    pub(crate) fn clear_deadline(&self) {
        self.deadline_reached.store(false, Ordering::Release);
    }

    pub(crate) fn set_phase(&self, phase: SamplerPhase) {
        self.phase.store(phase.to_raw(), Ordering::Release);
    }

    fn select(&self, channel: AdcChannel) -> u32 {
        self.active_channel.store(channel.index(), Ordering::Release);
        self.selections.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL)
    }
}

/// Holds the acquisition status flag; releases it on drop.
pub struct AcquisitionGuard<'a> {
    state: &'a CaptureState,
}

impl AcquisitionGuard<'_> {
    pub fn state(&self) -> &CaptureState {
        self.state
    }
}

impl Drop for AcquisitionGuard<'_> {
    fn drop(&mut self) {
        self.state.set_phase(SamplerPhase::Idle);
        self.state.acquiring.store(false, Ordering::Release);
    }
}

/// Result of handling one selection event.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChannelSelection {
    pub channel: AdcChannel,
    /// Position of this event in the selection history, starting at 1.
    pub sequence: u32,
}

/// Event handler translating trigger lines into active-channel updates.
///
/// No debounce is applied: a bouncing trigger produces one selection per edge.
#[derive(Copy, Clone)]
pub struct ChannelSelector<'a> {
    state: &'a CaptureState,
}

impl<'a> ChannelSelector<'a> {
    #[must_use]
    pub const fn new(state: &'a CaptureState) -> Self {
        Self { state }
    }

    /// Handles a falling edge on `trigger`.
    pub fn on_trigger(&self, trigger: SelectionTrigger) -> ChannelSelection {
        let channel = trigger.channel();
        let sequence = self.state.select(channel);
        ChannelSelection { channel, sequence }
    }

    pub fn active_channel(&self) -> AdcChannel {
        self.state.active_channel()
    }
}
