use capture_core::sampler::SampleClock;
use embassy_time::{Instant, block_for};

use crate::clock::FirmwareInstant;

/// Blocking clock over the embassy time driver.
///
/// `sleep_until` spins; the thread executor makes no progress while a capture
/// is pacing, only interrupt-executor tasks run.
#[derive(Copy, Clone, Default)]
pub struct EmbassyClock;

impl SampleClock for EmbassyClock {
    type Instant = FirmwareInstant;

    fn now(&self) -> FirmwareInstant {
        FirmwareInstant::from(Instant::now())
    }

    fn sleep_until(&mut self, deadline: FirmwareInstant) {
        let deadline = deadline.into_embassy();
        let now = Instant::now();
        if deadline > now {
            block_for(deadline - now);
        }
    }
}
