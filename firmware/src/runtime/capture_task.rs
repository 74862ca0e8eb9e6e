use embassy_stm32::gpio::Input;
use embassy_time::Timer;

use super::{FirmwareController, SelectionQueue};
use crate::clock::to_embassy;
use crate::orchestrator::{self, POLL_INTERVAL, Step, TriggerLevels};
use crate::telemetry::{TelemetryMirror, emit_failure, emit_samples};

pub struct TriggerInputs {
    pub diagnostics: Input<'static>,
    pub capture: Input<'static>,
    pub readback: Input<'static>,
}

impl TriggerInputs {
    fn levels(&self) -> TriggerLevels {
        TriggerLevels {
            diagnostics: self.diagnostics.is_high(),
            capture: self.capture.is_high(),
            readback: self.readback.is_high(),
        }
    }
}

#[embassy_executor::task]
pub async fn run(
    mut controller: FirmwareController,
    triggers: TriggerInputs,
    selections: &'static SelectionQueue,
) {
    let mut mirror = TelemetryMirror::new();
    defmt::info!(
        "capture controller ready on {}",
        defmt::Display2Format(&controller.state().active_channel())
    );

    loop {
        while let Ok(selection) = selections.try_receive() {
            controller.note_selection(selection);
        }

        for step in orchestrator::plan(triggers.levels()) {
            run_step(&mut controller, step).await;
            mirror.flush(controller.telemetry());
        }

        while let Ok(selection) = selections.try_receive() {
            controller.note_selection(selection);
        }
        mirror.flush(controller.telemetry());

        Timer::after(to_embassy(POLL_INTERVAL)).await;
    }
}

async fn run_step(controller: &mut FirmwareController, step: Step) {
    match step {
        Step::Acquire(duration) => match controller.acquire(duration) {
            Ok(buffer) => emit_samples("acquired", buffer.as_slice()),
            Err(err) => emit_failure("acquire", &err),
        },
        Step::Pause(duration) => Timer::after(to_embassy(duration)).await,
        Step::CaptureAndStore(duration) => match controller.capture_and_store(duration) {
            Ok(outcome) => emit_samples("read back", outcome.readback.as_slice()),
            Err(err) => emit_failure("capture", &err),
        },
        Step::Readback(count) => match controller.load(count) {
            Ok(buffer) => emit_samples("read back", buffer.as_slice()),
            Err(err) => emit_failure("load", &err),
        },
    }
}
