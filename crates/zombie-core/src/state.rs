//! Device state that survives deep sleep
//!
//! Everything the node has to remember between wake cycles lives in one
//! [`DeviceState`] aggregate: the cycle counters, the inference state of the
//! classifier and the previous cycle's voltage. The firmware keeps its
//! snapshot in RTC memory, the simulator in a file.
//!
//! Snapshot format (little-endian):
//! - magic: 4 bytes ("ZOMB")
//! - version: 2 bytes (u16)
//! - units: 2 bytes (u16)
//! - window: 2 bytes (u16)
//! - reserved: 2 bytes
//! - boots, measurements, sessions, buffered: 16 bytes (4 × u32)
//! - last_voltage: 4 bytes (f32)
//! - cell: U × f32
//! - hidden: U × f32
//! - window: W × f32

use alloc::vec::Vec;

use log::{info, warn};
use thiserror_no_std::Error;

use crate::lstm::{InferenceState, LSTM_UNITS, SlidingWindow, WINDOW_CAPACITY};

/// Magic number at the start of every state snapshot
pub const STATE_MAGIC: [u8; 4] = *b"ZOMB";

/// Current snapshot format version
pub const STATE_VERSION: u16 = 1;

/// Size of the fixed snapshot header (magic through last_voltage)
pub const SNAPSHOT_HEADER_SIZE: usize = 32;

/// Device state of the deployed node
pub type NodeState = DeviceState<LSTM_UNITS, WINDOW_CAPACITY>;

/// Error types for state snapshot decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Snapshot does not start with the state magic
    #[error("State snapshot has a bad magic number")]
    BadMagic,

    /// Snapshot was written by a different format version
    #[error("Unsupported state snapshot version: {version}")]
    UnsupportedVersion {
        /// Version found in the snapshot
        version: u16,
    },

    /// Snapshot was written for different model dimensions
    #[error("State dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Which dimension differs
        what: &'static str,
        /// Dimension compiled into the firmware
        expected: usize,
        /// Dimension found in the snapshot
        found: usize,
    },

    /// Snapshot has the wrong length
    #[error("State snapshot truncated (expected {expected} bytes, found {found})")]
    Truncated {
        /// Expected snapshot length
        expected: usize,
        /// Actual snapshot length
        found: usize,
    },
}

/// How the node came out of reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeKind {
    /// Power-on, brownout or any reset that lost RTC memory
    ColdBoot,
    /// Timer wake-up from deep sleep
    Warm,
}

/// Monotonic cycle counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleCounters {
    /// Number of wake-ups since the last cold boot (including it)
    pub boots: u32,
    /// Number of measurements taken; also the sequence of the latest one
    pub measurements: u32,
    /// Number of successfully established network sessions
    pub sessions: u32,
    /// Number of records waiting in the store-and-forward log
    pub buffered: u32,
}

/// Everything that persists across deep sleep
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState<const U: usize, const W: usize> {
    pub counters: CycleCounters,
    pub inference: InferenceState<U, W>,
    /// Capacitor voltage measured in the previous cycle
    pub last_voltage: f32,
}

impl<const U: usize, const W: usize> Default for DeviceState<U, W> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const U: usize, const W: usize> DeviceState<U, W> {
    /// Serialized snapshot size in bytes
    pub const SNAPSHOT_SIZE: usize = SNAPSHOT_HEADER_SIZE + (2 * U + W) * 4;

    pub const fn zeroed() -> Self {
        Self {
            counters: CycleCounters {
                boots: 0,
                measurements: 0,
                sessions: 0,
                buffered: 0,
            },
            inference: InferenceState::zeroed(),
            last_voltage: 0.0,
        }
    }

    /// Restore the state for a new wake cycle.
    ///
    /// A warm wake restores `snapshot`; a cold boot, or a snapshot that fails
    /// to decode, starts from a zeroed state. Either way the boot counter is
    /// incremented. Returns the state together with the effective wake kind,
    /// which is [`WakeKind::ColdBoot`] whenever the state was re-initialised.
    pub fn wake(kind: WakeKind, snapshot: &[u8]) -> (Self, WakeKind) {
        let (mut state, kind) = match kind {
            WakeKind::ColdBoot => {
                info!("Cold boot, initialising device state");
                (Self::zeroed(), WakeKind::ColdBoot)
            }
            WakeKind::Warm => match Self::from_bytes(snapshot) {
                Ok(state) => (state, WakeKind::Warm),
                Err(e) => {
                    warn!("Discarding persisted device state: {}", e);
                    (Self::zeroed(), WakeKind::ColdBoot)
                }
            },
        };

        state.counters.boots = state.counters.boots.wrapping_add(1);
        (state, kind)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SNAPSHOT_SIZE);

        bytes.extend_from_slice(&STATE_MAGIC);
        bytes.extend_from_slice(&STATE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(U as u16).to_le_bytes());
        bytes.extend_from_slice(&(W as u16).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 2]);

        let counters = &self.counters;
        for counter in [
            counters.boots,
            counters.measurements,
            counters.sessions,
            counters.buffered,
        ] {
            bytes.extend_from_slice(&counter.to_le_bytes());
        }
        bytes.extend_from_slice(&self.last_voltage.to_le_bytes());

        let recurrent = &self.inference.recurrent;
        for value in recurrent
            .cell
            .iter()
            .chain(recurrent.hidden.iter())
            .chain(self.inference.window.values().iter())
        {
            bytes.extend_from_slice(&value.to_le_bytes());
        }

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        if bytes.len() < SNAPSHOT_HEADER_SIZE {
            return Err(StateError::Truncated {
                expected: Self::SNAPSHOT_SIZE,
                found: bytes.len(),
            });
        }

        if bytes[0..4] != STATE_MAGIC {
            return Err(StateError::BadMagic);
        }

        let read_u16 = |offset: usize| {
            let mut value = [0u8; 2];
            value.copy_from_slice(&bytes[offset..offset + 2]);
            u16::from_le_bytes(value)
        };
        let read_word = |offset: usize| {
            let mut value = [0u8; 4];
            value.copy_from_slice(&bytes[offset..offset + 4]);
            value
        };

        let version = read_u16(4);
        if version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion { version });
        }

        for (what, offset, expected) in [("units", 6, U), ("window", 8, W)] {
            let found = read_u16(offset) as usize;
            if found != expected {
                return Err(StateError::DimensionMismatch {
                    what,
                    expected,
                    found,
                });
            }
        }

        if bytes.len() != Self::SNAPSHOT_SIZE {
            return Err(StateError::Truncated {
                expected: Self::SNAPSHOT_SIZE,
                found: bytes.len(),
            });
        }

        let mut state = Self::zeroed();
        state.counters = CycleCounters {
            boots: u32::from_le_bytes(read_word(12)),
            measurements: u32::from_le_bytes(read_word(16)),
            sessions: u32::from_le_bytes(read_word(20)),
            buffered: u32::from_le_bytes(read_word(24)),
        };
        state.last_voltage = f32::from_le_bytes(read_word(28));

        let mut offset = SNAPSHOT_HEADER_SIZE;
        for value in state
            .inference
            .recurrent
            .cell
            .iter_mut()
            .chain(state.inference.recurrent.hidden.iter_mut())
        {
            *value = f32::from_le_bytes(read_word(offset));
            offset += 4;
        }

        let mut window = [0.0_f32; W];
        for value in window.iter_mut() {
            *value = f32::from_le_bytes(read_word(offset));
            offset += 4;
        }
        state.inference.window = SlidingWindow::from_values(window);

        Ok(state)
    }
}
