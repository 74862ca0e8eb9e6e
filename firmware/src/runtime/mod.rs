use core::mem::MaybeUninit;

use capture_core::channel::{CaptureState, ChannelSelection, DEFAULT_CHANNEL};
use capture_core::controller::CaptureController;
use capture_core::sampler::Sampler;
use capture_core::storage::{StorageConfig, StorageManager};
use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::{InterruptExecutor, Spawner};
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Input, Pull};
use embassy_stm32::interrupt::{InterruptExt, Priority};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_alloc::LlffHeap;

use crate::hw::adc::MuxedAdc;
use crate::hw::clock::EmbassyClock;
use crate::hw::flash::{CriticalSectionFence, InternalFlash};

mod capture_task;
mod selector_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Heap backing sample buffers. Requests beyond it surface as
/// `CaptureError::Allocation`.
const HEAP_SIZE: usize = 32 * 1024;
const SELECTION_QUEUE_DEPTH: usize = 8;

#[global_allocator]
static HEAP: LlffHeap = LlffHeap::empty();

pub(super) static CAPTURE_STATE: CaptureState = CaptureState::new(DEFAULT_CHANNEL);
pub(super) static SELECTIONS: SelectionQueue = Channel::new();
static SELECTOR_EXECUTOR: InterruptExecutor = InterruptExecutor::new();

pub(super) type SelectionQueue =
    Channel<CriticalSectionRawMutex, ChannelSelection, SELECTION_QUEUE_DEPTH>;

pub(super) type FirmwareController = CaptureController<
    'static,
    MuxedAdc<'static>,
    EmbassyClock,
    InternalFlash<'static>,
    CriticalSectionFence,
>;

#[hal::interrupt]
unsafe fn USART3_4_5_6_LPUART1() {
    unsafe { SELECTOR_EXECUTOR.on_interrupt() }
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    {
        static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];
        unsafe { HEAP.init((&raw mut HEAP_MEM).cast::<u8>() as usize, HEAP_SIZE) }
    }

    let config = hal::Config::default();
    let hal::Peripherals {
        ADC1,
        FLASH,
        PA0,
        PA1,
        PA4,
        PB0,
        PB1,
        PB2,
        PB3,
        PB4,
        PB5,
        EXTI3,
        EXTI4,
        EXTI5,
        ..
    } = hal::init(config);

    let sel0 = ExtiInput::new(PB3, EXTI3, Pull::Up);
    let sel1 = ExtiInput::new(PB4, EXTI4, Pull::Up);
    let sel2 = ExtiInput::new(PB5, EXTI5, Pull::Up);

    hal::interrupt::USART3_4_5_6_LPUART1.set_priority(Priority::P1);
    let selector_spawner = SELECTOR_EXECUTOR.start(hal::interrupt::USART3_4_5_6_LPUART1);
    selector_spawner
        .spawn(selector_task::run(&CAPTURE_STATE, sel0, sel1, sel2, &SELECTIONS))
        .expect("failed to spawn selector task");

    let sampler = Sampler::new(&CAPTURE_STATE, MuxedAdc::new(ADC1, PA0, PA1, PA4), EmbassyClock);
    let storage = StorageManager::new(
        InternalFlash::new(FLASH),
        CriticalSectionFence,
        StorageConfig::default(),
    );
    storage
        .validate()
        .expect("sample region does not fit the internal flash");
    let controller: FirmwareController = CaptureController::new(sampler, storage);

    let triggers = capture_task::TriggerInputs {
        diagnostics: Input::new(PB0, Pull::Down),
        capture: Input::new(PB1, Pull::Down),
        readback: Input::new(PB2, Pull::Down),
    };

    spawner
        .spawn(capture_task::run(controller, triggers, &SELECTIONS))
        .expect("failed to spawn capture task");

    core::future::pending::<()>().await;
}
