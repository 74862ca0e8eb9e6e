//! Internal flash of the STM32G0B1 (512 KiB, 2 KiB pages, 64-bit programming).

use capture_core::storage::{EraseSpan, FenceTimeout, FlashFence, NvStorage, StorageError};
use core::time::Duration;
use embassy_stm32::Peri;
use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::peripherals::FLASH;

pub const FLASH_SIZE: usize = 512 * 1024;
pub const PAGE_SIZE: usize = 2048;
pub const DOUBLE_WORD: usize = 8;

pub struct InternalFlash<'d> {
    flash: Flash<'d, Blocking>,
}

impl<'d> InternalFlash<'d> {
    pub fn new(flash: Peri<'d, FLASH>) -> Self {
        Self {
            flash: Flash::new_blocking(flash),
        }
    }
}

fn to_offset(offset: usize, len: usize) -> Result<u32, StorageError> {
    u32::try_from(offset).map_err(|_| StorageError::OutOfRegion { offset, len })
}

impl NvStorage for InternalFlash<'_> {
    const ERASE_GRANULE: usize = PAGE_SIZE;
    const PROGRAM_GRANULE: usize = DOUBLE_WORD;

    fn capacity(&self) -> usize {
        FLASH_SIZE
    }

    fn erase(&mut self, span: EraseSpan) -> Result<(), StorageError> {
        let from = to_offset(span.offset, span.len)?;
        let to = to_offset(span.offset + span.len, span.len)?;
        self.flash
            .blocking_erase(from, to)
            .map_err(|_| StorageError::EraseFailed)
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let at = to_offset(offset, data.len())?;
        self.flash
            .blocking_write(at, data)
            .map_err(|_| StorageError::ProgramFailed)
    }

    fn read(&mut self, offset: usize, out: &mut [u8]) -> Result<(), StorageError> {
        let at = to_offset(offset, out.len())?;
        self.flash
            .blocking_read(at, out)
            .map_err(|_| StorageError::ReadFailed)
    }
}

/// Masks interrupts for the duration of an erase or program.
///
/// Entering a critical section cannot block on a single core, so the timeout
/// never elapses.
#[derive(Copy, Clone, Default)]
pub struct CriticalSectionFence;

impl FlashFence for CriticalSectionFence {
    fn execute<R>(&mut self, _: Duration, op: impl FnOnce() -> R) -> Result<R, FenceTimeout> {
        Ok(critical_section::with(|_| op()))
    }
}
