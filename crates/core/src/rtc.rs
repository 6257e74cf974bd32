//! Wake-cycle bookkeeping on top of [`WakeMemory`].
//!
//! Every boot writes `FAST` into the start-type slot immediately. Only a
//! completed sleep decision writes `NORMAL` back, so a reset that hits while
//! the station is awake is seen as a fast reset by the next boot.

use tracing::{debug, info};

use crate::hal::{WakeMemory, WakeSlot};

pub const MAGIC: u32 = 0xAABB_CCDD;
pub const START_NORMAL: u32 = 0;
pub const START_FAST: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartType {
    Normal,
    FastReset,
}

impl StartType {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::FastReset => "fastReset",
        }
    }
}

pub struct WakeState<M: WakeMemory> {
    mem: M,
    start_type: StartType,
    power_on: bool,
}

impl<M: WakeMemory> WakeState<M> {
    /// Classify this boot and arm the fast-reset detection.
    pub fn boot(mut mem: M, start_counter: u16) -> Self {
        let power_on = mem.read(WakeSlot::Magic) != MAGIC;
        if power_on {
            info!(start_counter, "wake memory empty, cold start");
            mem.write(WakeSlot::Magic, MAGIC);
            mem.write(WakeSlot::WakeupCount, u32::from(start_counter));
            mem.write(WakeSlot::FastResetCount, 0);
            mem.write(WakeSlot::StartType, START_NORMAL);
        }

        let start_type = if mem.read(WakeSlot::StartType) == START_FAST {
            let n = mem.read(WakeSlot::FastResetCount).saturating_add(1);
            mem.write(WakeSlot::FastResetCount, n);
            StartType::FastReset
        } else {
            mem.write(WakeSlot::FastResetCount, 0);
            StartType::Normal
        };
        mem.write(WakeSlot::StartType, START_FAST);

        let state = Self {
            mem,
            start_type,
            power_on,
        };
        info!(
            start = start_type.label(),
            power_on,
            wakeups = state.wakeup_count(),
            fast_resets = state.fast_reset_count(),
            "boot classified"
        );
        state
    }

    pub fn start_type(&self) -> StartType {
        self.start_type
    }

    pub fn is_fast_reset(&self) -> bool {
        self.start_type == StartType::FastReset
    }

    pub fn is_power_on(&self) -> bool {
        self.power_on
    }

    pub fn wakeup_count(&self) -> u16 {
        self.mem.read(WakeSlot::WakeupCount) as u16
    }

    pub fn fast_reset_count(&self) -> u16 {
        self.mem.read(WakeSlot::FastResetCount) as u16
    }

    pub fn set_wakeup_count(&mut self, count: u16) {
        debug!(count, "wakeup counter set");
        self.mem.write(WakeSlot::WakeupCount, u32::from(count));
    }

    pub fn reset_wakeup_count(&mut self) {
        self.set_wakeup_count(0);
    }

    /// Called right before deep sleep: count the cycle and mark the next boot
    /// as a normal wake.
    pub fn record_sleep_cycle(&mut self) {
        let next = self.wakeup_count().wrapping_add(1);
        self.mem.write(WakeSlot::WakeupCount, u32::from(next));
        self.mem.write(WakeSlot::StartType, START_NORMAL);
    }

    pub fn into_memory(self) -> M {
        self.mem
    }
}

// ===========================================================================
// Tests
// ===========================================================================
