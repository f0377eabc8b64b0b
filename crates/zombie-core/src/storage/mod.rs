//! Persistent storage for the store-and-forward record log
//!
//! The log is a single append-only byte stream of fixed-stride
//! [`MeasurementRecord`](crate::record::MeasurementRecord)s. Backends only
//! have to offer append, positioned reads, length and clear; record framing
//! and the buffered-record count live in [`StoreAndForwardBuffer`].

pub mod buffer;
pub mod memory;
pub mod sd_card;

pub use buffer::{DrainReport, StoreAndForwardBuffer};
pub use memory::MemoryStorage;
pub use sd_card::SdCardStorage;

use thiserror_no_std::Error;

/// Name of the record log file on the SD card
pub const RECORD_LOG_FILE: &str = "buffer.bin";

/// Name of the configuration file on the SD card
pub const CONFIG_FILE: &str = "config.bin";

/// Name of the network weights file on the SD card
pub const NETWORK_FILE: &str = "network.bin";

/// Error types for storage operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The storage device could not be accessed at all
    #[error("Storage unavailable: {details}")]
    Unavailable {
        /// Additional details about the failure
        details: &'static str,
    },

    /// An operation on an accessible device failed
    #[error("Storage {operation} failed: {details}")]
    Io {
        /// Operation that was being performed
        operation: &'static str,
        /// Additional details about the failure
        details: &'static str,
    },

    /// The log cannot grow any further
    #[error("Storage full")]
    Full,
}

/// Append-only byte log on non-volatile storage
pub trait RecordStorage {
    /// Append `bytes` at the end of the log.
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError>;

    /// Read up to `buf.len()` bytes starting at `offset`, returning the number
    /// of bytes read. Returns 0 at or past the end of the log.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Current length of the log in bytes.
    fn len(&mut self) -> Result<u32, StorageError>;

    /// Remove all content. Clearing an empty or missing log succeeds.
    fn clear(&mut self) -> Result<(), StorageError>;
}
