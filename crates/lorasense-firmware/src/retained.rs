//! Retained state in RTC fast memory
//!
//! The block is declared `persistent`, so it is never initialized by the
//! startup code: it keeps its content across deep sleep and holds garbage
//! after power-on, which [`RetainedState::load`] detects.

use lorasense_core::retained::{RETAINED_LEN, RetainedState};

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RETAINED_BLOCK: [u8; RETAINED_LEN] = [0; RETAINED_LEN];

pub fn load() -> RetainedState {
    // SAFETY: single core, read once at boot before anything writes to it
    let block = unsafe { *(&raw const RETAINED_BLOCK) };
    RetainedState::load(&block)
}

pub fn store(state: &RetainedState) {
    // SAFETY: only the main task touches the block
    unsafe {
        *(&raw mut RETAINED_BLOCK) = state.to_bytes();
    }
}
