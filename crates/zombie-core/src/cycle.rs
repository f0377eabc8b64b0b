//! One wake cycle of the node: measure, predict, deliver, sleep
//!
//! The cycle runs to completion on every wake-up. Sensing and storage
//! failures are returned to the caller, which goes back to sleep either way;
//! transport failures never surface here because undelivered records are
//! buffered instead.

use core::time::Duration;

use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::config::NodeConfig;
use crate::delivery::{DeliveryCoordinator, DeliveryOutcome, Transport, Uplink};
use crate::lstm::{Prediction, Predictor};
use crate::power::PowerMode;
use crate::record::MeasurementRecord;
use crate::sensors::{MeasurementSource, SensorError};
use crate::state::{DeviceState, WakeKind};
use crate::storage::{DrainReport, RecordStorage, StorageError, StoreAndForwardBuffer};

/// Wall clock
pub trait Clock {
    /// Seconds since the Unix epoch.
    fn now(&mut self) -> i64;
}

/// Error types for a wake cycle
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CycleError {
    /// Reading the sensors failed
    #[error("Sensor failure: {0}")]
    Sensor(SensorError),

    /// The store-and-forward log could not be accessed
    #[error("Storage failure: {0}")]
    Storage(StorageError),
}

impl From<SensorError> for CycleError {
    fn from(e: SensorError) -> Self {
        CycleError::Sensor(e)
    }
}

impl From<StorageError> for CycleError {
    fn from(e: StorageError) -> Self {
        CycleError::Storage(e)
    }
}

/// Hardware the wake cycle talks to
pub struct NodeIo<M, L, S, K> {
    pub sensors: M,
    pub uplink: L,
    pub storage: S,
    pub clock: K,
}

/// What a wake cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub mode: PowerMode,
    /// Whether the uplink came up
    pub connected: bool,
    /// Record produced this cycle, if a measurement was taken
    pub record: Option<MeasurementRecord>,
    pub delivery: Option<DeliveryOutcome>,
    /// Backlog replay, if the uplink came up with records buffered
    pub drained: Option<DrainReport>,
    /// How long to sleep before the next cycle
    pub sleep_for: Duration,
}

impl CycleReport {
    fn skipped(mode: PowerMode, sleep_for: Duration) -> Self {
        Self {
            mode,
            connected: false,
            record: None,
            delivery: None,
            drained: None,
            sleep_for,
        }
    }
}

/// Restore the device state on wake-up.
///
/// After a cold boot the buffered record count is rebuilt from the log on
/// non-volatile storage, so records written before a power loss are still
/// replayed. A storage failure here is logged and leaves the count at zero.
pub fn wake_node<const U: usize, const W: usize, S: RecordStorage>(
    kind: WakeKind,
    snapshot: &[u8],
    storage: &mut S,
) -> (DeviceState<U, W>, WakeKind) {
    let (mut state, kind) = DeviceState::<U, W>::wake(kind, snapshot);

    if kind == WakeKind::ColdBoot {
        let mut buffer = StoreAndForwardBuffer::new(storage, &mut state.counters.buffered);
        if let Err(e) = buffer.recover() {
            error!("Could not recover store-and-forward log: {}", e);
        }
    }

    info!(
        "Wake #{} ({:?}): {} measurements, {} buffered",
        state.counters.boots, kind, state.counters.measurements, state.counters.buffered
    );

    (state, kind)
}

/// Run one wake cycle.
///
/// With the uplink up, the backlog is drained before the new record is sent
/// so the server receives records in measurement order. If the backlog cannot
/// be read, the new record is still delivered before the storage error is
/// returned. Without a predictor
/// every record carries [`Prediction::Undefined`].
pub async fn run_cycle<const U: usize, const C: usize, const W: usize, M, L, S, K>(
    config: &NodeConfig,
    predictor: Option<&Predictor<'_, U, C, W>>,
    state: &mut DeviceState<U, W>,
    io: &mut NodeIo<M, L, S, K>,
) -> Result<CycleReport, CycleError>
where
    M: MeasurementSource,
    L: Uplink,
    S: RecordStorage,
    K: Clock,
{
    let sleep_for = config.sleep_duration();

    let supply = io.sensors.supply_voltage().await?;
    let mode = PowerMode::for_voltage(supply, &config.power);
    if !mode.measures() {
        warn!("Supply at {:.3} V, skipping cycle", supply);
        return Ok(CycleReport::skipped(mode, sleep_for));
    }

    let readings = io.sensors.read().await?;

    state.counters.measurements += 1;
    let sequence = state.counters.measurements;

    let prediction = match predictor {
        Some(predictor) => predictor.predict(readings.light, sequence, &mut state.inference),
        None => Prediction::Undefined,
    };
    info!("Measurement #{}: {:?} mode, prediction {}", sequence, mode, prediction);

    let connected = mode.uses_radio() && io.uplink.connect().await;
    if connected {
        state.counters.sessions += 1;
    }

    let record = MeasurementRecord::new(
        readings.voltage,
        state.last_voltage,
        readings.cell_current,
        readings.light,
        sequence,
        state.counters.sessions,
        io.clock.now(),
        prediction,
    );
    state.last_voltage = readings.voltage;

    let delivery = {
        let mut buffer = StoreAndForwardBuffer::new(&mut io.storage, &mut state.counters.buffered);
        if connected {
            let mut coordinator = DeliveryCoordinator::new(&mut io.uplink, buffer);
            deliver_online(&mut coordinator, &record).await
        } else {
            buffer
                .append(&record)
                .map(|()| (None, DeliveryOutcome::Buffered))
        }
    };

    if connected {
        io.uplink.disconnect().await;
    }

    let (drained, outcome) = delivery?;

    Ok(CycleReport {
        mode,
        connected,
        record: Some(record),
        delivery: Some(outcome),
        drained,
        sleep_for,
    })
}

/// Replay the backlog, then deliver the new record.
///
/// A failed replay leaves the log intact and does not stop the new record
/// from being sent or buffered; its error is returned afterwards.
async fn deliver_online<T: Transport, S: RecordStorage>(
    coordinator: &mut DeliveryCoordinator<'_, T, S>,
    record: &MeasurementRecord,
) -> Result<(Option<DrainReport>, DeliveryOutcome), StorageError> {
    let drained = if coordinator.buffer().is_empty() {
        Ok(None)
    } else {
        coordinator.drain().await.map(Some)
    };
    if let Err(e) = &drained {
        warn!("Backlog replay failed, delivering new record anyway: {}", e);
    }

    let outcome = coordinator.deliver(record).await?;
    Ok((drained?, outcome))
}
