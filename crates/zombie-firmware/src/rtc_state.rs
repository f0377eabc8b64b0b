//! Device state kept in RTC fast memory across deep sleep
//!
//! The snapshot lives in a persistent RTC fast memory section, which is not
//! initialized on reset. After a power loss it holds garbage; the snapshot
//! header check in the core rejects it and the node cold boots.

use esp_hal::rtc_cntl::{SleepSource, wakeup_cause};
use log::{debug, error};
use zombie_core::{NodeState, WakeKind};

const SNAPSHOT_SIZE: usize = NodeState::SNAPSHOT_SIZE;

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut SNAPSHOT: [u8; SNAPSHOT_SIZE] = [0; SNAPSHOT_SIZE];

/// Only a timer wake-up from deep sleep continues the previous state.
pub fn wake_kind() -> WakeKind {
    match wakeup_cause() {
        SleepSource::Timer => WakeKind::Warm,
        cause => {
            debug!("Wake-up cause {:?}, cold boot", cause);
            WakeKind::ColdBoot
        }
    }
}

/// Copy of the snapshot stored before the last deep sleep.
pub fn load() -> [u8; SNAPSHOT_SIZE] {
    // SAFETY: single-core access before any task touches the snapshot.
    unsafe { *(&raw const SNAPSHOT) }
}

pub fn store(snapshot: &[u8]) {
    if snapshot.len() != SNAPSHOT_SIZE {
        error!(
            "Snapshot is {} bytes, RTC slot holds {}",
            snapshot.len(),
            SNAPSHOT_SIZE
        );
        return;
    }

    // SAFETY: called once from main right before deep sleep.
    unsafe { (*(&raw mut SNAPSHOT)).copy_from_slice(snapshot) };
}
