//! On-device LSTM classifier
//!
//! The network is a single LSTM layer followed by a dense layer, evaluated
//! with a piecewise-linear tanh lookup table instead of libm transcendental
//! functions. Its input is one scaled scalar per time-step, taken from a
//! persistent sliding window that survives deep sleep.
//!
//! - [`activation`]: lookup-table tanh and sigmoid
//! - [`cell`]: recurrent state and one cell step
//! - [`dense`]: classifier head
//! - [`window`]: input scaling and the circular input window
//! - [`network`]: weight set and its binary blob format
//! - [`predictor`]: end-to-end prediction pass

pub mod activation;
pub mod cell;
pub mod dense;
pub mod network;
pub mod predictor;
pub mod window;

pub use activation::{DEFAULT_TANH_TABLE, LookupEntry, MAX_TABLE_LEN, TanhTable};
pub use cell::{CellWeights, GateWeights, RecurrentState};
pub use dense::DenseLayer;
pub use network::Network;
pub use predictor::{IlluminationCategory, InferenceState, Prediction, Predictor};
pub use window::{ScaleBounds, SlidingWindow, WindowShape};

use thiserror_no_std::Error;

/// Number of LSTM units in the deployed model
pub const LSTM_UNITS: usize = 32;

/// Number of output categories of the deployed model
pub const CATEGORY_COUNT: usize = 3;

/// Window shape of the deployed model: 20 time-steps, one every 6 samples.
///
/// With a 5 minute wake interval this covers the last 10 hours.
pub const NODE_WINDOW_SHAPE: WindowShape = WindowShape::new(20, 6);

/// Capacity of the persistent input window of the deployed model
pub const WINDOW_CAPACITY: usize = NODE_WINDOW_SHAPE.capacity();

/// The network deployed on the node
pub type NodeNetwork = Network<LSTM_UNITS, CATEGORY_COUNT>;

/// Error types for model loading and validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Lookup table has no entries
    #[error("Lookup table is empty")]
    EmptyTable,

    /// Lookup table has more entries than can be stored
    #[error("Lookup table too long (max: {max})")]
    TableTooLong {
        /// Maximum supported number of entries
        max: usize,
    },

    /// Lookup table is not strictly ascending in x, or has a negative x
    #[error("Lookup table not ascending at entry {index}")]
    UnorderedTable {
        /// Index of the first offending entry
        index: usize,
    },

    /// Window shape does not match the window capacity it is used with
    #[error("Window shape {feature_width}x{step_count} does not fit capacity {capacity}")]
    ShapeMismatch {
        /// Time-steps per prediction
        feature_width: usize,
        /// Samples between two time-steps
        step_count: usize,
        /// Capacity of the persistent window
        capacity: usize,
    },

    /// Scale bounds are degenerate (min >= max)
    #[error("Invalid scale bounds (min >= max)")]
    InvalidBounds,

    /// Network blob does not start with the expected magic
    #[error("Network blob has a bad magic number")]
    BadMagic,

    /// Network blob has an unsupported format version
    #[error("Unsupported network blob version: {version}")]
    UnsupportedVersion {
        /// Version found in the blob
        version: u16,
    },

    /// Network blob was exported for different dimensions
    #[error("Network dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Which dimension differs
        what: &'static str,
        /// Dimension compiled into the firmware
        expected: usize,
        /// Dimension declared by the blob
        found: usize,
    },

    /// Network blob length does not match its header
    #[error("Network blob truncated (expected {expected} bytes, found {found})")]
    Truncated {
        /// Length implied by the header
        expected: usize,
        /// Actual blob length
        found: usize,
    },
}
