//! Record delivery with store-and-forward fallback

use core::future::Future;

use log::{info, warn};
use thiserror_no_std::Error;

use crate::record::{MeasurementRecord, RECORD_SIZE};
use crate::storage::{DrainReport, RecordStorage, StorageError, StoreAndForwardBuffer};

/// Error types for transport operations
///
/// All of them are recoverable: a record that fails to send is buffered.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No link to the server has been established
    #[error("Not connected")]
    NotConnected,

    /// The server refused the connection
    #[error("Connection refused")]
    ConnectionRefused,

    /// The operation did not complete in time
    #[error("Transport timed out")]
    Timeout,

    /// Any other failure of the underlying stack
    #[error("Transport I/O error: {details}")]
    Io {
        /// Additional details about the failure
        details: &'static str,
    },
}

/// Raw byte transport to the telemetry server
pub trait Transport {
    /// Send `bytes`, returning how many of them were accepted.
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = Result<usize, TransportError>>;
}

/// A transport whose link has to be brought up and torn down per wake cycle
pub trait Uplink: Transport {
    /// Try to establish the link. Returns whether the node is now connected.
    fn connect(&mut self) -> impl Future<Output = bool>;

    /// Tear the link down and power the radio off.
    fn disconnect(&mut self) -> impl Future<Output = ()>;
}

/// What happened to a record handed to [`DeliveryCoordinator::deliver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The server accepted the full record
    Sent,
    /// The record was appended to the store-and-forward log
    Buffered,
}

/// Sends a single record. Only a fully accepted record counts as sent.
async fn send_record<T: Transport>(transport: &mut T, record: &MeasurementRecord) -> bool {
    match transport.send(&record.to_bytes()).await {
        Ok(RECORD_SIZE) => true,
        Ok(accepted) => {
            warn!(
                "Record #{}: server accepted {} of {} bytes",
                record.measurement_sequence, accepted, RECORD_SIZE
            );
            false
        }
        Err(e) => {
            warn!("Record #{}: send failed: {}", record.measurement_sequence, e);
            false
        }
    }
}

/// Routes records either straight to the transport or into the
/// store-and-forward buffer
pub struct DeliveryCoordinator<'a, T: Transport, S: RecordStorage> {
    transport: &'a mut T,
    buffer: StoreAndForwardBuffer<'a, S>,
}

impl<'a, T: Transport, S: RecordStorage> DeliveryCoordinator<'a, T, S> {
    pub fn new(transport: &'a mut T, buffer: StoreAndForwardBuffer<'a, S>) -> Self {
        Self { transport, buffer }
    }

    pub fn buffer(&self) -> &StoreAndForwardBuffer<'a, S> {
        &self.buffer
    }

    /// Attempt one direct send; buffer the record if it fails.
    ///
    /// Only storage errors are returned. There is no retry: the record is
    /// replayed by a later [`Self::drain`].
    pub async fn deliver(
        &mut self,
        record: &MeasurementRecord,
    ) -> Result<DeliveryOutcome, StorageError> {
        if send_record(&mut *self.transport, record).await {
            info!("Record #{} delivered", record.measurement_sequence);
            return Ok(DeliveryOutcome::Sent);
        }

        self.buffer.append(record)?;
        Ok(DeliveryOutcome::Buffered)
    }

    /// Replay the store-and-forward log through the transport.
    pub async fn drain(&mut self) -> Result<DrainReport, StorageError> {
        let transport = &mut *self.transport;
        self.buffer
            .drain(async |record: &MeasurementRecord| send_record(&mut *transport, record).await)
            .await
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::{vec, vec::Vec};

    use embassy_futures::block_on;

    use super::*;
    use crate::lstm::Prediction;
    use crate::storage::MemoryStorage;

    /// Transport that replays a script of results and records what it sent
    struct ScriptedTransport {
        script: Vec<Result<usize, TransportError>>,
        sent: Vec<u32>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<usize, TransportError>>) -> Self {
            Self {
                script,
                sent: Vec::new(),
            }
        }
    }

    impl Transport for ScriptedTransport {
        async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
            let result = if self.script.is_empty() {
                Ok(bytes.len())
            } else {
                self.script.remove(0)
            };
            if result == Ok(bytes.len()) {
                let mut record = [0u8; RECORD_SIZE];
                record.copy_from_slice(bytes);
                self.sent
                    .push(MeasurementRecord::from_bytes(&record).measurement_sequence);
            }
            result
        }
    }

    fn record(sequence: u32) -> MeasurementRecord {
        MeasurementRecord::new(3.5, 3.4, 12.0, 200.0, sequence, 1, 0, Prediction::Class(1))
    }

    #[test]
    fn test_fail_then_succeed() {
        let mut transport = ScriptedTransport::new(vec![Err(TransportError::ConnectionRefused)]);
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;

        {
            let buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
            let mut coordinator = DeliveryCoordinator::new(&mut transport, buffer);

            let outcome = block_on(coordinator.deliver(&record(1))).unwrap();
            assert_eq!(outcome, DeliveryOutcome::Buffered);
            assert_eq!(coordinator.buffer().len(), 1);

            let report = block_on(coordinator.drain()).unwrap();
            assert_eq!(report.delivered, 1);
            assert!(coordinator.buffer().is_empty());

            let outcome = block_on(coordinator.deliver(&record(2))).unwrap();
            assert_eq!(outcome, DeliveryOutcome::Sent);
        }

        assert_eq!(transport.sent, [1, 2]);
        assert_eq!(buffered, 0);
        assert!(storage.bytes().is_empty());
    }

    #[test]
    fn test_short_write_counts_as_failure() {
        let mut transport = ScriptedTransport::new(vec![Ok(0), Ok(12)]);
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;

        let buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
        let mut coordinator = DeliveryCoordinator::new(&mut transport, buffer);

        assert_eq!(
            block_on(coordinator.deliver(&record(1))).unwrap(),
            DeliveryOutcome::Buffered
        );
        assert_eq!(
            block_on(coordinator.deliver(&record(2))).unwrap(),
            DeliveryOutcome::Buffered
        );
        assert_eq!(coordinator.buffer().len(), 2);
    }

    #[test]
    fn test_buffer_failure_is_propagated() {
        let mut transport = ScriptedTransport::new(vec![Err(TransportError::NotConnected)]);
        let mut storage = MemoryStorage::new();
        storage.set_failing(true);
        let mut buffered = 0;

        let buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
        let mut coordinator = DeliveryCoordinator::new(&mut transport, buffer);

        assert!(matches!(
            block_on(coordinator.deliver(&record(1))),
            Err(StorageError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_drain_replays_in_order_and_drops_failures() {
        let mut transport = ScriptedTransport::new(vec![
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Err(TransportError::Timeout),
            Ok(RECORD_SIZE),
            Err(TransportError::Io { details: "reset" }),
        ]);
        let mut storage = MemoryStorage::new();
        let mut buffered = 0;

        let buffer = StoreAndForwardBuffer::new(&mut storage, &mut buffered);
        let mut coordinator = DeliveryCoordinator::new(&mut transport, buffer);
        for sequence in 1..=3 {
            block_on(coordinator.deliver(&record(sequence))).unwrap();
        }

        let report = block_on(coordinator.drain()).unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert!(coordinator.buffer().is_empty());
        drop(coordinator);

        assert_eq!(transport.sent, [1, 3]);
    }
}
