#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Instant wrapper bridging `embassy-time` to the capture-core clock traits.

use core::ops::Add;
use core::time::Duration;

use capture_core::telemetry::TelemetryInstant;
use embassy_time::{Duration as EmbassyDuration, Instant};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct FirmwareInstant(Instant);

impl FirmwareInstant {
    pub const fn from_micros(micros: u64) -> Self {
        Self(Instant::from_micros(micros))
    }

    pub const fn into_embassy(self) -> Instant {
        self.0
    }

    pub fn as_micros(self) -> u64 {
        self.0.as_micros()
    }
}

impl From<Instant> for FirmwareInstant {
    fn from(value: Instant) -> Self {
        Self(value)
    }
}

impl Add<Duration> for FirmwareInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + to_embassy(rhs))
    }
}

impl TelemetryInstant for FirmwareInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        let micros = self.0.saturating_duration_since(earlier.0).as_micros();
        Duration::from_micros(micros)
    }
}

/// Saturating conversion; embassy ticks cap at `u64` microseconds.
pub fn to_embassy(duration: Duration) -> EmbassyDuration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    EmbassyDuration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adding_sampling_period_advances_by_80us() {
        let start = FirmwareInstant::from_micros(1_000);
        let next = start + Duration::from_micros(80);
        assert_eq!(next.as_micros(), 1_080);
        assert!(next > start);
    }

    #[test]
    fn duration_since_saturates_at_zero() {
        let early = FirmwareInstant::from_micros(10);
        let late = FirmwareInstant::from_micros(250);
        assert_eq!(
            late.saturating_duration_since(early),
            Duration::from_micros(240)
        );
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }
}
