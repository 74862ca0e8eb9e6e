//! Host stand-ins for the ADC and the sampling timebase.

use std::hint;
use std::ops::Add;
use std::thread;
use std::time::{Duration, Instant};

use capture_core::channel::{AdcChannel, CHANNEL_COUNT};
use capture_core::sampler::{AnalogSource, SampleClock};
use capture_core::telemetry::TelemetryInstant;

/// Sleeps shorter than this are spun out instead of handed to the scheduler.
const SPIN_THRESHOLD: Duration = Duration::from_millis(1);

const FULL_SCALE: u16 = 4095;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct HostInstant(Instant);

impl HostInstant {
    pub fn now() -> Self {
        Self(Instant::now())
    }
}

impl Add<Duration> for HostInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

impl TelemetryInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_duration_since(earlier.0)
    }
}

/// Wall-clock timebase. Waits spin for the final stretch so 80 µs pacing
/// survives scheduler granularity.
#[derive(Copy, Clone, Debug, Default)]
pub struct HostClock;

impl SampleClock for HostClock {
    type Instant = HostInstant;

    fn now(&self) -> HostInstant {
        HostInstant::now()
    }

    fn sleep_until(&mut self, deadline: HostInstant) {
        let remaining = deadline.0.saturating_duration_since(Instant::now());
        if remaining > SPIN_THRESHOLD {
            thread::sleep(remaining - SPIN_THRESHOLD);
        }
        while Instant::now() < deadline.0 {
            hint::spin_loop();
        }
    }
}

/// Per-channel test signals, 12-bit.
///
/// * ADC0: sawtooth climbing 64 counts per conversion.
/// * ADC1: square wave toggling every 8 conversions.
/// * ADC2: mid-scale DC.
#[derive(Debug, Default)]
pub struct WaveformAdc {
    conversions: [u32; CHANNEL_COUNT],
}

impl WaveformAdc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversions performed on `channel` so far.
    pub fn conversions(&self, channel: AdcChannel) -> u32 {
        self.conversions[usize::from(channel.index())]
    }
}

impl AnalogSource for WaveformAdc {
    fn read_raw(&mut self, channel: AdcChannel) -> u16 {
        let slot = &mut self.conversions[usize::from(channel.index())];
        let n = *slot;
        *slot = slot.wrapping_add(1);

        match channel {
            AdcChannel::Ain0 => u16::try_from(n.wrapping_mul(64) % 4096).unwrap_or(FULL_SCALE),
            AdcChannel::Ain1 => {
                if (n / 8) % 2 == 0 {
                    FULL_SCALE
                } else {
                    0
                }
            }
            AdcChannel::Ain2 => 2048,
        }
    }
}
