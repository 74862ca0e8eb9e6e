#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Trigger polling plan for the capture task.
//!
//! Three level-sensitive inputs are sampled every [`POLL_INTERVAL`]. Each one
//! that reads high contributes a fixed run of steps, evaluated in pin order:
//! diagnostics first, then capture-and-store, then read-back.

use core::time::Duration;

use capture_core::sampler::SAMPLING_PERIOD;
use heapless::Vec;

/// Delay between trigger polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Pause between consecutive diagnostic acquisitions.
pub const DIAGNOSTIC_PAUSE: Duration = Duration::from_millis(500);
/// Diagnostic acquisition lengths, in sampling periods.
pub const DIAGNOSTIC_PERIODS: [u32; 3] = [1, 3, 10];
/// Capture length for the store trigger, in sampling periods.
pub const CAPTURE_PERIODS: u32 = 10;
/// Samples read back by the read-back trigger.
pub const READBACK_COUNT: usize = 10;

pub const MAX_STEPS: usize = 8;

/// Input levels sampled on one poll.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TriggerLevels {
    pub diagnostics: bool,
    pub capture: bool,
    pub readback: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Step {
    /// Acquire and log, without persisting.
    Acquire(Duration),
    Pause(Duration),
    /// Acquire, save, and read back with the captured count.
    CaptureAndStore(Duration),
    /// Read back a fixed number of samples.
    Readback(usize),
}

pub type StepPlan = Vec<Step, MAX_STEPS>;

/// Length of `periods` sampling periods.
pub fn periods(periods: u32) -> Duration {
    SAMPLING_PERIOD * periods
}

/// Steps to run for one poll.
pub fn plan(levels: TriggerLevels) -> StepPlan {
    let mut steps = StepPlan::new();

    if levels.diagnostics {
        for count in DIAGNOSTIC_PERIODS {
            push(&mut steps, Step::Acquire(periods(count)));
            push(&mut steps, Step::Pause(DIAGNOSTIC_PAUSE));
        }
    }
    if levels.capture {
        push(&mut steps, Step::CaptureAndStore(periods(CAPTURE_PERIODS)));
    }
    if levels.readback {
        push(&mut steps, Step::Readback(READBACK_COUNT));
    }

    steps
}

fn push(steps: &mut StepPlan, step: Step) {
    let pushed = steps.push(step);
    debug_assert!(pushed.is_ok(), "MAX_STEPS must cover every trigger at once");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_poll_has_no_steps() {
        assert!(plan(TriggerLevels::default()).is_empty());
    }

    #[test]
    fn diagnostics_run_three_paced_acquisitions() {
        let steps = plan(TriggerLevels {
            diagnostics: true,
            ..TriggerLevels::default()
        });

        assert_eq!(
            steps.as_slice(),
            &[
                Step::Acquire(Duration::from_micros(80)),
                Step::Pause(Duration::from_millis(500)),
                Step::Acquire(Duration::from_micros(240)),
                Step::Pause(Duration::from_millis(500)),
                Step::Acquire(Duration::from_micros(800)),
                Step::Pause(Duration::from_millis(500)),
            ]
        );
    }

    #[test]
    fn all_triggers_fit_and_keep_pin_order() {
        let steps = plan(TriggerLevels {
            diagnostics: true,
            capture: true,
            readback: true,
        });

        assert_eq!(steps.len(), 8);
        assert_eq!(
            steps[6],
            Step::CaptureAndStore(Duration::from_micros(800))
        );
        assert_eq!(steps[7], Step::Readback(10));
    }
}
