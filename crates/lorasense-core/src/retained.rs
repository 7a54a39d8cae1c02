//! State that survives deep sleep
//!
//! Deep sleep powers down main RAM, so the few counters the wake cycle needs
//! live in a small block of RTC memory. That memory is not cleared on wake
//! but holds garbage after a cold power-on, hence the magic header: a block
//! that does not start with [`MAGIC`] is treated as a first boot.
//!
//! ## Block layout
//!
//! | Offset | Size | Content                      |
//! |--------|------|------------------------------|
//! | 0      | 4    | magic `LSN1`                 |
//! | 4      | 1    | body length                  |
//! | 5      | ..   | postcard-encoded state       |

use log::info;
use serde::{Deserialize, Serialize};

/// Size of the retained block in RTC memory.
pub const RETAINED_LEN: usize = 32;

const MAGIC: [u8; 4] = *b"LSN1";
const HEADER_LEN: usize = 5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetainedState {
    /// Wake cycles since power-on, starting at 1 for the first cycle
    pub boot_count: u32,
    /// Failed cycles in a row; reset by a delivered payload
    pub consecutive_failures: u32,
    /// Failed cycles since power-on
    pub total_failures: u32,
    /// Whether the previous cycle delivered its payload
    pub last_delivered: bool,
}

impl RetainedState {
    pub const fn new() -> Self {
        Self {
            boot_count: 0,
            consecutive_failures: 0,
            total_failures: 0,
            last_delivered: false,
        }
    }

    /// Count a new wake cycle and return its number.
    ///
    /// Wraps to 1, a boot number is never 0.
    pub fn begin_boot(&mut self) -> u32 {
        self.boot_count = self.boot_count.checked_add(1).unwrap_or(1);
        self.boot_count
    }

    /// Record how the cycle ended.
    pub fn record(&mut self, delivered: bool) {
        self.last_delivered = delivered;
        if delivered {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.total_failures = self.total_failures.saturating_add(1);
        }
    }

    /// The previous cycle ran and failed to deliver.
    ///
    /// A fresh state has no previous cycle, so this is false on first boot.
    pub fn previous_failed(&self) -> bool {
        self.consecutive_failures > 0
    }

    /// Encode into the RTC block.
    pub fn to_bytes(&self) -> [u8; RETAINED_LEN] {
        let mut block = [0u8; RETAINED_LEN];
        block[..MAGIC.len()].copy_from_slice(&MAGIC);

        // The body is at most 16 bytes, so this only fails if the layout
        // changes. A zero length makes the block decode as a cold boot.
        let body_len = postcard::to_slice(self, &mut block[HEADER_LEN..])
            .map(|body| body.len())
            .unwrap_or(0);
        block[MAGIC.len()] = body_len as u8;
        block
    }

    /// Decode an RTC block, `None` if it does not hold a valid state.
    pub fn from_bytes(block: &[u8; RETAINED_LEN]) -> Option<Self> {
        if block[..MAGIC.len()] != MAGIC {
            return None;
        }

        let body_len = block[MAGIC.len()] as usize;
        if body_len == 0 || HEADER_LEN + body_len > RETAINED_LEN {
            return None;
        }

        postcard::from_bytes(&block[HEADER_LEN..HEADER_LEN + body_len]).ok()
    }

    /// Decode an RTC block, starting over when it is invalid.
    pub fn load(block: &[u8; RETAINED_LEN]) -> Self {
        match Self::from_bytes(block) {
            Some(state) => state,
            None => {
                info!("No retained state found, starting from a cold boot");
                Self::new()
            }
        }
    }
}
