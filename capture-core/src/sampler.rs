//! Deadline-paced acquisition loop.
//!
//! The sampler reads the active channel once per sampling period for a
//! caller-chosen duration. Sample instants are scheduled from the previous
//! *scheduled* instant, never from the time the read actually happened, so
//! wake-up latency does not accumulate into drift. The pacing wait is blocking;
//! only selection events (which touch nothing but [`CaptureState`]) run while
//! an acquisition is in flight.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::buffer::{AllocationError, SampleBuffer};
use crate::channel::{AdcChannel, CaptureState, SamplerPhase};

/// Hardware-calibrated interval between consecutive reads.
pub const SAMPLING_PERIOD: Duration = Duration::from_micros(80);
/// Converter resolution.
pub const ADC_RESOLUTION_BITS: u32 = 12;
/// Full-scale reference voltage.
pub const REFERENCE_VOLTAGE: f64 = 3.3;

/// Number of samples that fit in `duration`.
///
/// Truncating on purpose: a partial trailing period never earns a slot, which
/// keeps the slot count identical to the historical firmware.
#[must_use]
pub fn sample_budget(duration: Duration, period: Duration) -> usize {
    if period.is_zero() {
        return 0;
    }
    let count = duration.as_nanos() / period.as_nanos();
    usize::try_from(count).unwrap_or(usize::MAX)
}

/// Timing and scaling parameters for an acquisition.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplerConfig {
    pub period: Duration,
    pub reference_voltage: f64,
    pub resolution_bits: u32,
}

impl SamplerConfig {
    #[must_use]
    pub const fn new(period: Duration, reference_voltage: f64, resolution_bits: u32) -> Self {
        Self {
            period,
            reference_voltage,
            resolution_bits,
        }
    }

    /// Volts per LSB.
    #[must_use]
    pub fn scale(&self) -> f64 {
        let steps = 1u32
            .checked_shl(self.resolution_bits)
            .map_or(f64::from(u32::MAX) + 1.0, f64::from);
        self.reference_voltage / steps
    }

    /// Converts a raw conversion result into volts.
    #[must_use]
    pub fn convert(&self, raw: u16) -> f64 {
        f64::from(raw) * self.scale()
    }

    #[must_use]
    pub fn budget_for(&self, duration: Duration) -> usize {
        sample_budget(duration, self.period)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self::new(SAMPLING_PERIOD, REFERENCE_VOLTAGE, ADC_RESOLUTION_BITS)
    }
}

/// Source of raw conversions for a given mux input.
pub trait AnalogSource {
    /// Performs one blocking conversion on `channel`.
    fn read_raw(&mut self, channel: AdcChannel) -> u16;
}

/// Monotonic clock with a blocking wait.
pub trait SampleClock {
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    fn now(&self) -> Self::Instant;

    /// Blocks until `deadline` has passed. Returns immediately for past deadlines.
    fn sleep_until(&mut self, deadline: Self::Instant);
}

/// One-shot acquisition deadline.
///
/// Expiry is latched into [`CaptureState`] so an interrupt-driven alarm and the
/// polling loop agree on a single flag.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct OneShotDeadline<I> {
    expires_at: I,
}

impl<I> OneShotDeadline<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Arms the deadline `duration` after `start`.
    pub fn arm(start: I, duration: Duration) -> Self {
        Self {
            expires_at: start + duration,
        }
    }

    pub fn expires_at(&self) -> I {
        self.expires_at
    }

    /// Latches expiry into `state` once `now` reaches the deadline.
    pub fn poll(&self, now: I, state: &CaptureState) -> bool {
        if now >= self.expires_at {
            state.expire_deadline();
        }
        state.deadline_reached()
    }
}

/// Reasons an acquisition produced no buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CaptureError {
    /// Another acquisition holds the status flag.
    Busy,
    /// The sample slots could not be reserved.
    Allocation(AllocationError),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Busy => f.write_str("acquisition already in progress"),
            CaptureError::Allocation(err) => err.fmt(f),
        }
    }
}

impl From<AllocationError> for CaptureError {
    fn from(value: AllocationError) -> Self {
        CaptureError::Allocation(value)
    }
}

/// Paced reader bound to a shared [`CaptureState`].
pub struct Sampler<'a, A, C> {
    state: &'a CaptureState,
    adc: A,
    clock: C,
    config: SamplerConfig,
}

impl<'a, A, C> Sampler<'a, A, C>
where
    A: AnalogSource,
    C: SampleClock,
{
    pub fn new(state: &'a CaptureState, adc: A, clock: C) -> Self {
        Self::with_config(state, adc, clock, SamplerConfig::default())
    }

    pub fn with_config(state: &'a CaptureState, adc: A, clock: C, config: SamplerConfig) -> Self {
        Self {
            state,
            adc,
            clock,
            config,
        }
    }

    pub fn state(&self) -> &'a CaptureState {
        self.state
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Samples the active channel for `duration`.
    ///
    /// Blocks the caller until the deadline expires. The returned buffer holds
    /// at most [`sample_budget`] readings; timing skew may leave it shorter. A
    /// duration shorter than one period yields an empty buffer without arming.
    pub fn acquire(&mut self, duration: Duration) -> Result<SampleBuffer, CaptureError> {
        let state = self.state;
        let guard = state.begin_acquisition().ok_or(CaptureError::Busy)?;

        let budget = self.config.budget_for(duration);
        if budget == 0 {
            return Ok(SampleBuffer::empty());
        }
        let mut buffer = SampleBuffer::with_capacity(budget)?;

        state.set_phase(SamplerPhase::Arming);
        state.clear_deadline();
        let start = self.clock.now();
        let deadline = OneShotDeadline::arm(start, duration);
        let mut next_sample = start;

        state.set_phase(SamplerPhase::Sampling);
        while !state.deadline_reached() {
            if buffer.remaining() == 0 {
                self.clock.sleep_until(deadline.expires_at());
                state.expire_deadline();
                break;
            }

            let raw = self.adc.read_raw(state.active_channel());
            if buffer.push(self.config.convert(raw)).is_err() {
                break;
            }

            next_sample = next_sample + self.config.period;
            self.clock.sleep_until(next_sample);
            deadline.poll(self.clock.now(), state);
        }

        state.clear_deadline();
        drop(guard);
        Ok(buffer.finish())
    }

    pub fn into_parts(self) -> (A, C) {
        (self.adc, self.clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelSelector, SelectionTrigger};
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::{Cell, RefCell};

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct MockInstant(u64);

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + rhs.as_micros() as u64)
        }
    }

    /// Virtual clock whose waits land `overshoot_us` late.
    struct VirtualClock {
        now: Rc<Cell<u64>>,
        overshoot_us: u64,
        sleeps: usize,
    }

    impl VirtualClock {
        fn new(now: Rc<Cell<u64>>) -> Self {
            Self {
                now,
                overshoot_us: 0,
                sleeps: 0,
            }
        }
    }

    impl SampleClock for VirtualClock {
        type Instant = MockInstant;

        fn now(&self) -> Self::Instant {
            MockInstant(self.now.get())
        }

        fn sleep_until(&mut self, deadline: Self::Instant) {
            self.sleeps += 1;
            if deadline.0 > self.now.get() {
                self.now.set(deadline.0 + self.overshoot_us);
            }
        }
    }

    /// Records which channel was read and when.
    struct ScriptedAdc {
        now: Rc<Cell<u64>>,
        raw: u16,
        reads: Rc<RefCell<Vec<(u64, AdcChannel)>>>,
    }

    impl AnalogSource for ScriptedAdc {
        fn read_raw(&mut self, channel: AdcChannel) -> u16 {
            self.reads.borrow_mut().push((self.now.get(), channel));
            self.raw
        }
    }

    fn fixture(raw: u16) -> (Rc<Cell<u64>>, Rc<RefCell<Vec<(u64, AdcChannel)>>>, ScriptedAdc) {
        let now = Rc::new(Cell::new(1_000));
        let reads = Rc::new(RefCell::new(Vec::new()));
        let adc = ScriptedAdc {
            now: now.clone(),
            raw,
            reads: reads.clone(),
        };
        (now, reads, adc)
    }

    #[test]
    fn budget_truncates_partial_periods() {
        let period = Duration::from_micros(80);
        assert_eq!(sample_budget(Duration::from_micros(800), period), 10);
        assert_eq!(sample_budget(Duration::from_micros(879), period), 10);
        assert_eq!(sample_budget(Duration::from_micros(79), period), 0);
        assert_eq!(sample_budget(Duration::from_millis(1), period), 12);
        assert_eq!(sample_budget(Duration::from_micros(800), Duration::ZERO), 0);
    }

    #[test]
    fn default_scale_matches_twelve_bit_reference() {
        let config = SamplerConfig::default();
        assert_eq!(config.scale(), 3.3 / 4096.0);
        assert_eq!(config.convert(0), 0.0);
        assert_eq!(config.convert(2048), 1.65);
    }

    #[test]
    fn acquire_fills_exact_budget_on_ideal_clock() {
        let state = CaptureState::default();
        let (now, reads, adc) = fixture(1024);
        let mut sampler = Sampler::new(&state, adc, VirtualClock::new(now.clone()));

        let buffer = sampler
            .acquire(Duration::from_micros(800))
            .expect("acquisition should succeed");

        assert_eq!(buffer.len(), 10);
        assert!(buffer.iter().all(|value| *value == 3.3 / 4.0));
        assert_eq!(now.get(), 1_800);

        let times: Vec<u64> = reads.borrow().iter().map(|(at, _)| *at).collect();
        let expected: Vec<u64> = (0..10).map(|k| 1_000 + k * 80).collect();
        assert_eq!(times, expected);

        assert_eq!(state.phase(), SamplerPhase::Idle);
        assert!(!state.is_acquiring());
        assert!(!state.deadline_reached());
    }

    #[test]
    fn late_wakeups_do_not_accumulate_drift() {
        let state = CaptureState::default();
        let (now, reads, adc) = fixture(0);
        let mut clock = VirtualClock::new(now);
        clock.overshoot_us = 7;
        let mut sampler = Sampler::new(&state, adc, clock);

        let buffer = sampler.acquire(Duration::from_micros(800)).expect("acquire");
        assert_eq!(buffer.len(), 10);

        let times: Vec<u64> = reads.borrow().iter().map(|(at, _)| *at).collect();
        assert_eq!(times[0], 1_000);
        for (k, at) in times.iter().enumerate().skip(1) {
            assert_eq!(*at, 1_000 + 80 * k as u64 + 7);
        }
    }

    #[test]
    fn partial_trailing_period_waits_for_deadline_without_extra_sample() {
        let state = CaptureState::default();
        let (now, reads, adc) = fixture(0);
        let mut sampler = Sampler::new(&state, adc, VirtualClock::new(now.clone()));

        let buffer = sampler.acquire(Duration::from_micros(850)).expect("acquire");

        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.capacity(), 10);
        assert_eq!(reads.borrow().len(), 10);
        assert_eq!(now.get(), 1_850);
    }

    #[test]
    fn sub_period_duration_returns_empty_without_waiting() {
        let state = CaptureState::default();
        let (now, reads, adc) = fixture(0);
        let mut sampler = Sampler::new(&state, adc, VirtualClock::new(now.clone()));

        let buffer = sampler.acquire(Duration::from_micros(40)).expect("acquire");

        assert!(buffer.is_empty());
        assert!(!buffer.is_allocated());
        assert!(reads.borrow().is_empty());
        assert_eq!(now.get(), 1_000);
        assert!(!state.is_acquiring());
    }

    #[test]
    fn busy_state_rejects_without_blocking() {
        let state = CaptureState::default();
        let (now, reads, adc) = fixture(0);
        let mut sampler = Sampler::new(&state, adc, VirtualClock::new(now.clone()));

        let guard = state.begin_acquisition().expect("simulated in-flight acquisition");
        state.set_phase(SamplerPhase::Sampling);

        let result = sampler.acquire(Duration::from_micros(800));
        assert_eq!(result, Err(CaptureError::Busy));
        assert_eq!(now.get(), 1_000);
        assert!(reads.borrow().is_empty());
        assert_eq!(sampler.clock().sleeps, 0);

        assert!(state.is_acquiring());
        assert_eq!(state.phase(), SamplerPhase::Sampling);

        drop(guard);
        assert!(!state.is_acquiring());
    }

    #[test]
    fn oversize_request_reports_allocation_failure_and_releases_flag() {
        let state = CaptureState::default();
        let (_, reads, adc) = fixture(0);
        let clock = VirtualClock::new(Rc::new(Cell::new(0)));
        let mut sampler = Sampler::new(&state, adc, clock);

        let result = sampler.acquire(Duration::from_secs(u64::MAX));
        assert!(matches!(result, Err(CaptureError::Allocation(_))));
        assert!(reads.borrow().is_empty());
        assert!(!state.is_acquiring());
        assert_eq!(state.phase(), SamplerPhase::Idle);
    }

    #[test]
    fn selection_during_acquisition_switches_subsequent_reads() {
        struct SwitchingAdc<'s> {
            selector: ChannelSelector<'s>,
            reads: Vec<AdcChannel>,
        }

        impl AnalogSource for SwitchingAdc<'_> {
            fn read_raw(&mut self, channel: AdcChannel) -> u16 {
                self.reads.push(channel);
                if self.reads.len() == 3 {
                    self.selector.on_trigger(SelectionTrigger::Sel2);
                }
                0
            }
        }

        let state = CaptureState::default();
        let adc = SwitchingAdc {
            selector: ChannelSelector::new(&state),
            reads: Vec::new(),
        };
        let clock = VirtualClock::new(Rc::new(Cell::new(0)));
        let mut sampler = Sampler::new(&state, adc, clock);

        let buffer = sampler.acquire(Duration::from_micros(400)).expect("acquire");
        assert_eq!(buffer.len(), 5);

        let (adc, _) = sampler.into_parts();
        assert_eq!(
            adc.reads,
            [
                AdcChannel::Ain0,
                AdcChannel::Ain0,
                AdcChannel::Ain0,
                AdcChannel::Ain2,
                AdcChannel::Ain2,
            ]
        );
    }

    #[test]
    fn external_alarm_ends_acquisition_early() {
        struct AlarmAdc<'s> {
            state: &'s CaptureState,
            reads: usize,
        }

        impl AnalogSource for AlarmAdc<'_> {
            fn read_raw(&mut self, _: AdcChannel) -> u16 {
                self.reads += 1;
                if self.reads == 4 {
                    self.state.expire_deadline();
                }
                0
            }
        }

        let state = CaptureState::default();
        let adc = AlarmAdc {
            state: &state,
            reads: 0,
        };
        let clock = VirtualClock::new(Rc::new(Cell::new(0)));
        let mut sampler = Sampler::new(&state, adc, clock);

        let buffer = sampler.acquire(Duration::from_micros(800)).expect("acquire");
        assert_eq!(buffer.len(), 4);
        assert!(!state.deadline_reached());
    }
}
