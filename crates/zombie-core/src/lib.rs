//! Hardware-independent core library for the zombie sensor node
//!
//! This crate contains all platform-agnostic logic of the node: the on-device
//! LSTM classifier (lookup-table activations, recurrent cell, persistent input
//! window, dense head), the store-and-forward telemetry path (fixed-stride
//! record log and delivery coordinator), the persisted device state, power
//! policy, configuration and the per-wake orchestration that ties them
//! together.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32-S3) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod config;
pub mod cycle;
pub mod delivery;
pub mod lstm;
pub mod power;
pub mod record;
pub mod sensors;
pub mod state;
pub mod storage;

pub use config::NodeConfig;
pub use cycle::{Clock, CycleError, CycleReport, NodeIo, run_cycle, wake_node};
pub use delivery::{DeliveryCoordinator, DeliveryOutcome, Transport, TransportError, Uplink};
pub use lstm::{NodeNetwork, Prediction, Predictor};
pub use power::{PowerControl, PowerMode};
pub use record::MeasurementRecord;
pub use state::{DeviceState, NodeState, WakeKind};
pub use storage::{RecordStorage, StorageError, StoreAndForwardBuffer};
