//! RAM-backed record log for hosts and tests

use alloc::vec::Vec;

use super::{RecordStorage, StorageError};

/// Record log held in a `Vec<u8>`
///
/// Optionally limited to a maximum size, and can be switched into a failing
/// state to exercise error paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    capacity_limit: Option<usize>,
    failing: bool,
    read_failing: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that refuses appends growing it beyond `limit` bytes.
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            capacity_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Make every subsequent operation fail with [`StorageError::Unavailable`].
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    /// Make reads fail while appends keep working.
    pub fn set_read_failing(&mut self, failing: bool) {
        self.read_failing = failing;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing {
            return Err(StorageError::Unavailable {
                details: "Injected storage failure",
            });
        }
        Ok(())
    }
}

impl RecordStorage for MemoryStorage {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        if let Some(limit) = self.capacity_limit
            && self.bytes.len() + bytes.len() > limit
        {
            return Err(StorageError::Full);
        }
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.check()?;
        if self.read_failing {
            return Err(StorageError::Io {
                operation: "read",
                details: "Injected read failure",
            });
        }
        let offset = offset as usize;
        if offset >= self.bytes.len() {
            return Ok(0);
        }
        let available = &self.bytes[offset..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        Ok(count)
    }

    fn len(&mut self) -> Result<u32, StorageError> {
        self.check()?;
        Ok(self.bytes.len() as u32)
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        self.check()?;
        self.bytes.clear();
        Ok(())
    }
}
