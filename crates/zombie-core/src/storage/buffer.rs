//! Store-and-forward buffer of measurement records
//!
//! Records that could not be delivered are appended to the persistent log
//! and replayed in append order once the uplink is back. A drain hands every
//! complete record to the sender and then clears the whole log, whether or
//! not the individual sends succeeded: records are fire-and-forget once a
//! connection has been established. A failure while reading the log aborts
//! the drain and leaves the log untouched.

use log::{debug, info, warn};

use super::{RecordStorage, StorageError};
use crate::record::{MeasurementRecord, RECORD_SIZE};

/// Outcome of a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    /// Records handed to the sender
    pub attempted: u32,
    /// Records the sender reported as delivered
    pub delivered: u32,
}

impl DrainReport {
    /// Records that were dropped by the drain.
    pub fn lost(&self) -> u32 {
        self.attempted - self.delivered
    }
}

/// Record log plus the persisted count of buffered records
pub struct StoreAndForwardBuffer<'a, S: RecordStorage> {
    storage: &'a mut S,
    buffered: &'a mut u32,
}

impl<'a, S: RecordStorage> StoreAndForwardBuffer<'a, S> {
    pub fn new(storage: &'a mut S, buffered: &'a mut u32) -> Self {
        Self { storage, buffered }
    }

    pub fn len(&self) -> u32 {
        *self.buffered
    }

    pub fn is_empty(&self) -> bool {
        *self.buffered == 0
    }

    /// Rebuild the buffered count from the records present in storage.
    ///
    /// Used after a cold boot, when the persisted count was lost but the log
    /// on non-volatile storage survived.
    pub fn recover(&mut self) -> Result<u32, StorageError> {
        let count = self.storage.len()? / RECORD_SIZE as u32;
        if count != *self.buffered {
            info!(
                "Recovered {} buffered records (count was {})",
                count, *self.buffered
            );
        }
        *self.buffered = count;
        Ok(count)
    }

    pub fn append(&mut self, record: &MeasurementRecord) -> Result<(), StorageError> {
        self.storage.append(&record.to_bytes())?;
        *self.buffered += 1;
        debug!("Buffered record #{} ({} in log)", record.measurement_sequence, *self.buffered);
        Ok(())
    }

    /// Hand every buffered record to `send` in append order, then clear the
    /// log.
    ///
    /// `send` returns whether the record was delivered; undelivered records
    /// are still removed. Nothing happens when no records are buffered.
    pub async fn drain<F>(&mut self, mut send: F) -> Result<DrainReport, StorageError>
    where
        F: AsyncFnMut(&MeasurementRecord) -> bool,
    {
        let mut report = DrainReport::default();
        if *self.buffered == 0 {
            return Ok(report);
        }

        let complete = self.storage.len()? / RECORD_SIZE as u32;
        if complete != *self.buffered {
            warn!(
                "Log holds {} complete records but {} were counted",
                complete, *self.buffered
            );
        }

        let mut bytes = [0u8; RECORD_SIZE];
        for index in 0..complete {
            let read = self.storage.read_at(index * RECORD_SIZE as u32, &mut bytes)?;
            if read < RECORD_SIZE {
                return Err(StorageError::Io {
                    operation: "read",
                    details: "Record log shorter than its reported length",
                });
            }

            let record = MeasurementRecord::from_bytes(&bytes);
            report.attempted += 1;
            if send(&record).await {
                report.delivered += 1;
            }
        }

        self.clear()?;

        if report.lost() > 0 {
            warn!(
                "Drained {} records, {} were not delivered",
                report.attempted,
                report.lost()
            );
        } else {
            info!("Drained {} buffered records", report.attempted);
        }

        Ok(report)
    }

    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.storage.clear()?;
        *self.buffered = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use embassy_futures::block_on;

    use super::*;
    use crate::lstm::Prediction;
    use crate::storage::MemoryStorage;

    fn record(sequence: u32) -> MeasurementRecord {
        MeasurementRecord::new(
            3.4,
            3.3,
            10.0,
            sequence as f32 * 10.0,
            sequence,
            0,
            1_700_000_000 + sequence as i64 * 300,
            Prediction::Undefined,
        )
    }

    #[test]
    fn test_append_then_drain_in_order() {
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;
        let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);

        for sequence in 1..=5 {
            buffer.append(&record(sequence)).unwrap();
        }
        assert_eq!(buffer.len(), 5);

        let mut seen = Vec::new();
        let report = block_on(buffer.drain(async |record: &MeasurementRecord| {
            seen.push(record.measurement_sequence);
            true
        }))
        .unwrap();

        assert_eq!(seen, [1, 2, 3, 4, 5]);
        assert_eq!(
            report,
            DrainReport {
                attempted: 5,
                delivered: 5,
            }
        );
        assert!(buffer.is_empty());
        drop(buffer);
        assert_eq!(buffered, 0);
        assert!(storage.bytes().is_empty());
    }

    #[test]
    fn test_drain_of_empty_log_is_noop() {
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;
        let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);

        let mut calls = 0;
        let report = block_on(buffer.drain(async |_: &MeasurementRecord| {
            calls += 1;
            true
        }))
        .unwrap();

        assert_eq!(calls, 0);
        assert_eq!(report, DrainReport::default());
    }

    #[test]
    fn test_drain_clears_even_when_sends_fail() {
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;
        let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);

        for sequence in 1..=3 {
            buffer.append(&record(sequence)).unwrap();
        }

        let report = block_on(buffer.drain(async |record: &MeasurementRecord| {
            record.measurement_sequence != 2
        }))
        .unwrap();

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.lost(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_read_failure_leaves_log_intact() {
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;
        {
            let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
            buffer.append(&record(1)).unwrap();
            buffer.append(&record(2)).unwrap();
        }

        storage.set_failing(true);
        {
            let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
            let result = block_on(buffer.drain(async |_: &MeasurementRecord| true));
            assert!(matches!(result, Err(StorageError::Unavailable { .. })));
            assert_eq!(buffer.len(), 2);
        }

        storage.set_failing(false);
        assert_eq!(storage.bytes().len(), 2 * RECORD_SIZE);
    }

    #[test]
    fn test_append_propagates_storage_errors() {
        let mut storage = MemoryStorage::with_capacity_limit(RECORD_SIZE);
        let mut buffered = 0;
        let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);

        buffer.append(&record(1)).unwrap();
        assert_eq!(buffer.append(&record(2)), Err(StorageError::Full));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_recover_counts_complete_records() {
        let mut storage = MemoryStorage::new();
        storage.append(&record(1).to_bytes()).unwrap();
        storage.append(&record(2).to_bytes()).unwrap();
        // Torn write from a brownout
        storage.append(&[0xFF; 7]).unwrap();

        let mut buffered = 0;
        let mut buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
        assert_eq!(buffer.recover().unwrap(), 2);

        let mut seen = Vec::new();
        block_on(buffer.drain(async |record: &MeasurementRecord| {
            seen.push(record.measurement_sequence);
            true
        }))
        .unwrap();
        assert_eq!(seen, [1, 2]);
        drop(buffer);
        assert!(storage.bytes().is_empty());
    }
}
