#![no_std]

extern crate alloc;

// Shared logic for the ADC capture subsystem. Hardware is reached only
// through the traits in `sampler` and `storage`; the firmware and the host
// emulator each supply their own implementations.

pub mod buffer;
pub mod channel;
pub mod commands;
pub mod controller;
pub mod sampler;
pub mod storage;
pub mod telemetry;
