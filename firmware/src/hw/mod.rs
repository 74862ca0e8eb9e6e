//! Embassy-backed implementations of the capture-core hardware traits.

#![cfg(target_os = "none")]

pub mod adc;
pub mod clock;
pub mod flash;
