//! Desktop simulator for the zombie sensor node.
//!
//! Runs the hardware-independent wake cycle from `zombie-core` through many
//! simulated deep-sleep periods. The environment model supplies a diurnal
//! light level and a storage capacitor that charges from the solar cell and
//! drains with every measurement and radio session. The record log and the
//! RTC snapshot are kept in files, so consecutive runs continue where the
//! previous one stopped.
//!
//! ```text
//! zombie-simulator [CYCLES] [--sim-dir DIR] [--network BLOB]
//! ```
//!
//! `--sim-dir` and `--network` can also be given as `ZOMBIE_SIM_DIR` and
//! `ZOMBIE_NETWORK`. Log output is filtered with `RUST_LOG`.

use std::cell::RefCell;
use std::f32::consts::PI;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use embassy_futures::block_on;
use log::{error, info, warn};

use zombie_core::delivery::{DeliveryOutcome, Transport, TransportError, Uplink};
use zombie_core::lstm::{
    CATEGORY_COUNT, LSTM_UNITS, NODE_WINDOW_SHAPE, NodeNetwork, Prediction, ScaleBounds,
    WINDOW_CAPACITY,
};
use zombie_core::record::{MeasurementRecord, RECORD_SIZE};
use zombie_core::sensors::{MeasurementSource, Readings, SensorError};
use zombie_core::storage::{RECORD_LOG_FILE, RecordStorage, StorageError};
use zombie_core::{
    Clock, NodeConfig, NodeIo, NodeState, PowerControl, PowerMode, Predictor, WakeKind,
    run_cycle, wake_node,
};

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Wake cycles to run when no count is given (8 hours at 5 minute sleep).
const DEFAULT_CYCLES: u32 = 96;

const DEFAULT_SIM_DIR: &str = "target/zombie-sim";

#[derive(Parser, Debug)]
#[command(version, about = "Run the zombie sensor node through simulated wake cycles")]
struct Args {
    /// Number of wake cycles to simulate
    #[arg(default_value_t = DEFAULT_CYCLES)]
    cycles: u32,

    /// Directory for the record log and state snapshot
    #[arg(long, env = "ZOMBIE_SIM_DIR", default_value = DEFAULT_SIM_DIR)]
    sim_dir: PathBuf,

    /// Network blob to load instead of the synthetic network
    #[arg(long, env = "ZOMBIE_NETWORK")]
    network: Option<PathBuf>,
}

/// File holding the device state snapshot between runs (RTC memory).
const SNAPSHOT_FILE: &str = "state.bin";

/// 2024-06-01 06:00:00 UTC
const START_EPOCH: i64 = 1_717_200_000 + 6 * 3600;

const SECONDS_PER_DAY: i64 = 86_400;

/// Uplink outage pattern: the access point is down for `OUTAGE_LEN` cycles
/// out of every `OUTAGE_PERIOD`.
const OUTAGE_PERIOD: u32 = 48;
const OUTAGE_LEN: u32 = 12;

// Capacitor model (V)
const START_VOLTAGE: f32 = 3.5;
const MAX_VOLTAGE: f32 = 4.2;
const CHARGE_PER_LUX_SECOND: f32 = 6.0e-7;
const LEAK_PER_SECOND: f32 = 5.0e-5;
const MEASUREMENT_COST: f32 = 0.005;
const CONNECT_COST: f32 = 0.05;
const SEND_COST: f32 = 0.002;

// ---------------------------------------------------------------------------
// Environment model
// ---------------------------------------------------------------------------

/// Simulated surroundings of the node: wall clock, light and capacitor.
struct Environment {
    now: i64,
    voltage: f32,
}

impl Environment {
    fn new() -> Self {
        Self {
            now: START_EPOCH,
            voltage: START_VOLTAGE,
        }
    }

    /// Illuminance in lux at the current time.
    ///
    /// Daylight through a window from 06:00 to 20:00, a 90 minute dark
    /// period at noon every other day and constant room light in the evening.
    fn light(&self) -> f32 {
        let day = self.now.div_euclid(SECONDS_PER_DAY);
        let hour = self.now.rem_euclid(SECONDS_PER_DAY) as f32 / 3600.0;

        if day % 2 == 0 && (12.0..13.5).contains(&hour) {
            0.0
        } else if (6.0..20.0).contains(&hour) {
            700.0 * (PI * (hour - 6.0) / 14.0).sin()
        } else if (20.0..23.0).contains(&hour) {
            250.0
        } else {
            0.0
        }
    }

    /// Solar cell current in µA for the current light level.
    fn cell_current(&self) -> f32 {
        self.light() * 0.12
    }

    fn spend(&mut self, volts: f32) {
        self.voltage = (self.voltage - volts).max(0.0);
    }

    /// Let `duration` pass, charging from the light at the start of the
    /// period.
    fn advance(&mut self, duration: Duration) {
        let seconds = duration.as_secs() as f32;
        let charge = self.light() * CHARGE_PER_LUX_SECOND * seconds;
        let leak = LEAK_PER_SECOND * seconds;
        self.voltage = (self.voltage + charge - leak).clamp(0.0, MAX_VOLTAGE);
        self.now += duration.as_secs() as i64;
    }
}

type SharedEnvironment = Rc<RefCell<Environment>>;

struct SimSensors {
    env: SharedEnvironment,
}

impl MeasurementSource for SimSensors {
    async fn supply_voltage(&mut self) -> Result<f32, SensorError> {
        Ok(self.env.borrow().voltage)
    }

    async fn read(&mut self) -> Result<Readings, SensorError> {
        let mut env = self.env.borrow_mut();
        env.spend(MEASUREMENT_COST);
        Ok(Readings {
            voltage: env.voltage,
            cell_current: env.cell_current(),
            light: env.light(),
        })
    }
}

struct SimClock {
    env: SharedEnvironment,
}

impl Clock for SimClock {
    fn now(&mut self) -> i64 {
        self.env.borrow().now
    }
}

/// Deep sleep: time passes and the capacitor charges.
struct SimSleep {
    env: SharedEnvironment,
}

impl PowerControl for SimSleep {
    async fn enter_low_power(&mut self, duration: Duration) {
        self.env.borrow_mut().advance(duration);
    }
}

// ---------------------------------------------------------------------------
// Uplink with scripted outages
// ---------------------------------------------------------------------------

/// Uplink that is unreachable during scripted windows and otherwise hands
/// every record to the simulated server.
struct FlakyUplink {
    env: SharedEnvironment,
    cycle: u32,
    connected: bool,
    received: Vec<MeasurementRecord>,
}

impl FlakyUplink {
    fn new(env: SharedEnvironment) -> Self {
        Self {
            env,
            cycle: 0,
            connected: false,
            received: Vec::new(),
        }
    }

    fn link_up(&self) -> bool {
        self.cycle % OUTAGE_PERIOD >= OUTAGE_LEN
    }
}

impl Transport for FlakyUplink {
    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let Ok(record) = <&[u8; RECORD_SIZE]>::try_from(bytes) else {
            return Err(TransportError::Io {
                details: "Server expects whole records",
            });
        };

        self.env.borrow_mut().spend(SEND_COST);
        self.received.push(MeasurementRecord::from_bytes(record));
        Ok(bytes.len())
    }
}

impl Uplink for FlakyUplink {
    async fn connect(&mut self) -> bool {
        self.env.borrow_mut().spend(CONNECT_COST);
        self.connected = self.link_up();
        if !self.connected {
            warn!("Access point unreachable");
        }
        self.connected
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }
}

// ---------------------------------------------------------------------------
// File-backed storage
// ---------------------------------------------------------------------------

/// Record log in a file on the host, standing in for the SD card.
struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

fn io_error(operation: &'static str, e: io::Error) -> StorageError {
    error!("Record log {} failed: {}", operation, e);
    StorageError::Io {
        operation,
        details: "Host file I/O error",
    }
}

impl RecordStorage for FileStorage {
    fn append(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(bytes))
            .map_err(|e| io_error("append", e))
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error("read", e)),
        };

        file.seek(SeekFrom::Start(u64::from(offset)))
            .map_err(|e| io_error("read", e))?;

        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(io_error("read", e)),
            }
        }
        Ok(filled)
    }

    fn len(&mut self) -> Result<u32, StorageError> {
        match fs::metadata(&self.path) {
            Ok(metadata) => Ok(metadata.len() as u32),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(io_error("len", e)),
        }
    }

    fn clear(&mut self) -> Result<(), StorageError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("clear", e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Deterministic pseudo-weight in [-scale, scale] for parameter `index`.
fn synthetic_weight(index: usize, scale: f32) -> f32 {
    ((index as f32 * 12.9898).sin() * 43_758.547).fract() * scale
}

/// A small deterministic network exercising every weight. It is passed
/// through the blob codec so the simulator loads it like the firmware would.
fn synthetic_network() -> Option<Box<NodeNetwork>> {
    let bounds = ScaleBounds::new(0.0, 1000.0).ok()?;
    let mut network = Box::new(NodeNetwork::zeroed(NODE_WINDOW_SHAPE, bounds));

    let mut index = 0;
    let mut next = |scale: f32| {
        index += 1;
        synthetic_weight(index, scale)
    };

    for gate in network.cell.gates_mut() {
        gate.input.iter_mut().for_each(|w| *w = next(1.0));
        for row in gate.recurrent.iter_mut() {
            row.iter_mut().for_each(|w| *w = next(0.2));
        }
        gate.bias.iter_mut().for_each(|b| *b = next(0.1));
    }
    for row in network.dense.kernel.iter_mut() {
        row.iter_mut().for_each(|w| *w = next(0.5));
    }
    network.dense.bias.iter_mut().for_each(|b| *b = next(0.1));

    NodeNetwork::from_bytes(&network.to_bytes())
        .map_err(|e| error!("Synthetic network failed to round-trip: {}", e))
        .ok()
}

fn load_network(path: Option<&Path>) -> Option<Box<NodeNetwork>> {
    let Some(path) = path else {
        info!("Using synthetic network");
        return synthetic_network();
    };

    let bytes = fs::read(path)
        .map_err(|e| error!("Could not read {}: {}", path.display(), e))
        .ok()?;
    NodeNetwork::from_bytes(&bytes)
        .map_err(|e| error!("Ignoring {}: {}", path.display(), e))
        .ok()
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Summary {
    cycles: u32,
    dormant: u32,
    offline: u32,
    sent: u32,
    buffered: u32,
    drained: u32,
    dropped: u32,
    failed: u32,
    undefined: u32,
    per_class: [u32; CATEGORY_COUNT],
}

impl Summary {
    fn count_prediction(&mut self, prediction: Prediction) {
        match prediction {
            Prediction::Class(class) if class < CATEGORY_COUNT => self.per_class[class] += 1,
            _ => self.undefined += 1,
        }
    }
}

fn read_snapshot(path: &Path) -> (WakeKind, Vec<u8>) {
    match fs::read(path) {
        Ok(bytes) => (WakeKind::Warm, bytes),
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not read {}: {}", path.display(), e);
            }
            (WakeKind::ColdBoot, Vec::new())
        }
    }
}

fn main() -> io::Result<()> {
    let Args {
        cycles,
        sim_dir,
        network,
    } = Args::parse();
    env_logger::init();

    fs::create_dir_all(&sim_dir)?;
    let snapshot_path = sim_dir.join(SNAPSHOT_FILE);

    info!("Starting zombie simulator: {} cycles in {}", cycles, sim_dir.display());

    let config = NodeConfig::default();
    let network = load_network(network.as_deref());
    let predictor = network.as_deref().and_then(|network| {
        Predictor::<LSTM_UNITS, CATEGORY_COUNT, WINDOW_CAPACITY>::new(network)
            .map_err(|e| error!("Network does not fit the input window: {}", e))
            .ok()
    });

    let env = Rc::new(RefCell::new(Environment::new()));
    let mut io = NodeIo {
        sensors: SimSensors { env: env.clone() },
        uplink: FlakyUplink::new(env.clone()),
        storage: FileStorage::new(sim_dir.join(RECORD_LOG_FILE)),
        clock: SimClock { env: env.clone() },
    };
    let mut sleep = SimSleep { env: env.clone() };

    let (mut wake_kind, mut snapshot) = read_snapshot(&snapshot_path);
    let mut summary = Summary::default();

    for cycle in 0..cycles {
        io.uplink.cycle = cycle;
        let (mut state, _) =
            wake_node::<LSTM_UNITS, WINDOW_CAPACITY, _>(wake_kind, &snapshot, &mut io.storage);

        summary.cycles += 1;
        let sleep_for = match block_on(run_cycle(&config, predictor.as_ref(), &mut state, &mut io))
        {
            Ok(report) => {
                match report.mode {
                    PowerMode::Dormant => summary.dormant += 1,
                    PowerMode::Offline => summary.offline += 1,
                    PowerMode::Normal => {}
                }
                match report.delivery {
                    Some(DeliveryOutcome::Sent) => summary.sent += 1,
                    Some(DeliveryOutcome::Buffered) => summary.buffered += 1,
                    None => {}
                }
                if let Some(drain) = report.drained {
                    summary.drained += drain.delivered;
                    summary.dropped += drain.lost();
                }
                if let Some(record) = report.record {
                    summary.count_prediction(record.prediction());
                    info!("Cycle {}: {}", cycle, record);
                } else {
                    info!("Cycle {}: {:?}, no measurement", cycle, report.mode);
                }
                report.sleep_for
            }
            Err(e) => {
                summary.failed += 1;
                error!("Cycle {} failed: {}", cycle, e);
                config.sleep_duration()
            }
        };

        snapshot = state.to_bytes();
        fs::write(&snapshot_path, &snapshot)?;
        wake_kind = WakeKind::Warm;

        block_on(sleep.enter_low_power(sleep_for));
    }

    let state = NodeState::from_bytes(&snapshot).ok();
    let still_buffered = state.map_or(0, |state| state.counters.buffered);

    info!("Simulation finished after {} cycles", summary.cycles);
    info!(
        "  modes:       {} dormant, {} offline",
        summary.dormant, summary.offline
    );
    info!(
        "  delivery:    {} sent directly, {} buffered, {} replayed, {} dropped",
        summary.sent, summary.buffered, summary.drained, summary.dropped
    );
    info!(
        "  server:      {} records received, {} still buffered",
        io.uplink.received.len(),
        still_buffered
    );
    info!(
        "  predictions: {} undefined, {:?} per class",
        summary.undefined, summary.per_class
    );
    if summary.failed > 0 {
        warn!("  {} cycles failed", summary.failed);
    }
    info!("  capacitor:   {:.3} V", env.borrow().voltage);

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_cli_arguments() {
        let args =
            Args::try_parse_from(["zombie-simulator", "12", "--sim-dir", "/tmp/sim"]).unwrap();
        assert_eq!(args.cycles, 12);
        assert_eq!(args.sim_dir, PathBuf::from("/tmp/sim"));

        let args = Args::try_parse_from(["zombie-simulator", "--network", "net.bin"]).unwrap();
        assert_eq!(args.cycles, DEFAULT_CYCLES);
        assert_eq!(args.network, Some(PathBuf::from("net.bin")));

        assert!(Args::try_parse_from(["zombie-simulator", "many"]).is_err());
    }

    fn temp_log(name: &str) -> FileStorage {
        let path = std::env::temp_dir().join(format!("zombie-{}-{}", std::process::id(), name));
        let _ = fs::remove_file(&path);
        FileStorage::new(path)
    }

    #[test]
    fn test_file_storage_append_read_clear() {
        let mut storage = temp_log("log.bin");
        assert_eq!(storage.len().unwrap(), 0);

        storage.append(&[1, 2, 3]).unwrap();
        storage.append(&[4, 5]).unwrap();
        assert_eq!(storage.len().unwrap(), 5);

        let mut buf = [0u8; 4];
        assert_eq!(storage.read_at(2, &mut buf).unwrap(), 3);
        assert_eq!(buf[..3], [3, 4, 5]);
        assert_eq!(storage.read_at(10, &mut buf).unwrap(), 0);

        storage.clear().unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.len().unwrap(), 0);
    }

    #[test]
    fn test_synthetic_network_is_deterministic() {
        let first = synthetic_network().unwrap();
        let second = synthetic_network().unwrap();
        assert_eq!(first, second);
        assert_ne!(first.cell.forget.input[0], 0.0);
    }

    #[test]
    fn test_light_follows_the_day() {
        let mut env = Environment::new();
        // 06:00: dawn
        assert_eq!(env.light(), 0.0);

        // 13:00, odd day without a dark period
        env.advance(Duration::from_secs(7 * 3600));
        assert!(env.light() > 600.0);

        // 12:30 the next (even) day, inside the dark period
        env.advance(Duration::from_secs(23 * 3600 + 1800));
        assert_eq!(env.light(), 0.0);

        // 21:00 room light
        env.advance(Duration::from_secs(8 * 3600 + 1800));
        assert_eq!(env.light(), 250.0);
    }

    #[test]
    fn test_uplink_outage_window() {
        let env = Rc::new(RefCell::new(Environment::new()));
        let mut uplink = FlakyUplink::new(env);

        uplink.cycle = 0;
        assert!(!block_on(uplink.connect()));
        uplink.cycle = OUTAGE_LEN;
        assert!(block_on(uplink.connect()));
    }
}
