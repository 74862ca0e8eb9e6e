use capture_core::channel::{CaptureState, ChannelSelector, SelectionTrigger};
use embassy_futures::select::{Either3, select3};
use embassy_stm32::exti::ExtiInput;

use super::SelectionQueue;

/// Runs on the interrupt executor so a press lands while the capture task is
/// inside a blocking sampling loop.
#[embassy_executor::task]
pub async fn run(
    state: &'static CaptureState,
    mut sel0: ExtiInput<'static>,
    mut sel1: ExtiInput<'static>,
    mut sel2: ExtiInput<'static>,
    queue: &'static SelectionQueue,
) {
    let selector = ChannelSelector::new(state);

    loop {
        let trigger = match select3(
            sel0.wait_for_falling_edge(),
            sel1.wait_for_falling_edge(),
            sel2.wait_for_falling_edge(),
        )
        .await
        {
            Either3::First(()) => SelectionTrigger::Sel0,
            Either3::Second(()) => SelectionTrigger::Sel1,
            Either3::Third(()) => SelectionTrigger::Sel2,
        };

        let selection = selector.on_trigger(trigger);
        if queue.try_send(selection).is_err() {
            state.note_dropped_selection();
        }
    }
}
