use core::ops::Add;
use core::time::Duration;

use capture_core::buffer::SampleBuffer;
use capture_core::channel::{AdcChannel, CaptureState, ChannelSelector, SelectionTrigger};
use capture_core::controller::CaptureController;
use capture_core::sampler::{AnalogSource, SAMPLING_PERIOD, SampleClock, Sampler, sample_budget};
use capture_core::storage::{
    ExclusiveAccess, FencePolicy, MemoryStorage, StorageConfig, StorageManager, StorageRegion,
};
use capture_core::telemetry::TelemetryInstant;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
struct MockInstant(u64);

impl MockInstant {
    fn micros(value: u64) -> Self {
        Self(value)
    }
}

impl Add<Duration> for MockInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + u64::try_from(rhs.as_micros()).expect("duration fits"))
    }
}

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }
}

/// Wakes late by a repeating jitter pattern.
struct JitterClock {
    now: MockInstant,
    jitter: &'static [u64],
    wakeups: usize,
}

impl JitterClock {
    fn new(jitter: &'static [u64]) -> Self {
        Self {
            now: MockInstant::micros(10_000),
            jitter,
            wakeups: 0,
        }
    }
}

impl SampleClock for JitterClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        self.now
    }

    fn sleep_until(&mut self, deadline: MockInstant) {
        let late = self.jitter[self.wakeups % self.jitter.len()];
        self.wakeups += 1;
        if deadline > self.now {
            self.now = MockInstant(deadline.0 + late);
        }
    }
}

/// Sine-ish table indexed per read, offset per channel.
struct TableAdc {
    reads: usize,
}

impl AnalogSource for TableAdc {
    fn read_raw(&mut self, channel: AdcChannel) -> u16 {
        const TABLE: [u16; 8] = [2048, 3495, 4095, 3495, 2048, 600, 0, 600];
        let raw = TABLE[self.reads % TABLE.len()];
        self.reads += 1;
        raw.saturating_sub(u16::from(channel.index()) * 10)
    }
}

type Flash = MemoryStorage<4096, 256>;

fn storage_config() -> StorageConfig {
    StorageConfig {
        region: StorageRegion::new(0x3_0000, 0x1_0000),
        policy: FencePolicy::Report,
        ..StorageConfig::default()
    }
}

#[test]
fn acquire_800us_then_save_and_load_returns_same_samples() {
    let state = CaptureState::default();
    let sampler = Sampler::new(&state, TableAdc { reads: 0 }, JitterClock::new(&[0, 3, 11, 1]));
    let storage = StorageManager::new(Flash::new(0x4_0000), ExclusiveAccess, storage_config());
    let mut controller: CaptureController<'_, _, _, _, _> = CaptureController::new(sampler, storage);

    let duration = Duration::from_micros(800);
    assert_eq!(sample_budget(duration, SAMPLING_PERIOD), 10);

    let captured = controller.acquire(duration).expect("acquisition");
    assert!(
        (9..=10).contains(&captured.len()),
        "captured {} samples",
        captured.len()
    );
    assert!(captured.is_allocated());

    controller.save(&captured).expect("save");
    let loaded = controller.load(captured.len()).expect("load");

    assert_eq!(loaded.len(), captured.len());
    for (stored, original) in loaded.iter().zip(captured.iter()) {
        assert_eq!(stored.to_bits(), original.to_bits());
    }
}

#[test]
fn length_never_exceeds_budget_for_any_duration() {
    for micros in [0u64, 1, 79, 80, 81, 159, 160, 799, 800, 801, 1_000, 4_000] {
        let state = CaptureState::default();
        let mut sampler =
            Sampler::new(&state, TableAdc { reads: 0 }, JitterClock::new(&[0, 50, 5]));
        let duration = Duration::from_micros(micros);

        let buffer = sampler.acquire(duration).expect("acquisition");
        assert!(buffer.len() <= sample_budget(duration, SAMPLING_PERIOD));
        if buffer.is_empty() {
            assert!(!buffer.is_allocated(), "empty buffer held storage at {micros}us");
        }
    }
}

#[test]
fn selection_sequence_is_observable_in_order() {
    let state = CaptureState::default();
    let selector = ChannelSelector::new(&state);

    let history: Vec<_> = [
        SelectionTrigger::Sel1,
        SelectionTrigger::Sel0,
        SelectionTrigger::Sel2,
    ]
    .into_iter()
    .map(|trigger| selector.on_trigger(trigger))
    .collect();

    let channels: Vec<_> = history.iter().map(|selection| selection.channel).collect();
    let sequence: Vec<_> = history.iter().map(|selection| selection.sequence).collect();
    assert_eq!(channels, [AdcChannel::Ain1, AdcChannel::Ain0, AdcChannel::Ain2]);
    assert_eq!(sequence, [1, 2, 3]);
    assert_eq!(state.active_channel(), AdcChannel::Ain2);
}

#[test]
fn capture_and_store_on_selected_channel() {
    let state = CaptureState::default();
    let sampler = Sampler::new(&state, TableAdc { reads: 0 }, JitterClock::new(&[0]));
    let storage = StorageManager::new(Flash::new(0x4_0000), ExclusiveAccess, storage_config());
    let mut controller: CaptureController<'_, _, _, _, _> = CaptureController::new(sampler, storage);

    controller.select(SelectionTrigger::Sel2);
    let outcome = controller
        .capture_and_store(Duration::from_micros(800))
        .expect("capture");

    let expected_first = f64::from(2048u16 - 20) * (3.3 / 4096.0);
    assert_eq!(outcome.captured.as_slice()[0], expected_first);
    assert_eq!(outcome.readback, outcome.captured);
    assert_eq!(outcome.saved.erased.len, 4096);
    assert_eq!(outcome.saved.programmed, 256);

    let drained: SampleBuffer = controller.load_last().expect("reload");
    assert_eq!(drained.len(), 10);
}
