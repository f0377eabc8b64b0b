#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use alloc::boxed::Box;

use embassy_executor::Spawner;
use embassy_net::{Ipv4Address, Ipv4Cidr, Runner, StackResources, StaticConfigV4};
use esp_hal::clock::CpuClock;
use esp_hal::rng::Rng;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::wifi::WifiDevice;
use log::{LevelFilter, error, info, warn};
use static_cell::StaticCell;
use zombie_core::config::ServerConfig;
use zombie_core::lstm::{CATEGORY_COUNT, LSTM_UNITS, NodeNetwork, WINDOW_CAPACITY};
use zombie_core::sensors::{BH1750Sensor, SensorBoard};
use zombie_core::storage::{CONFIG_FILE, NETWORK_FILE};
use zombie_core::{NodeConfig, NodeIo, PowerControl, Predictor, run_cycle, wake_node};
use zombie_firmware::board::{self, AdcFrontEnd, NodeStorage};
use zombie_firmware::clock::RtcClock;
use zombie_firmware::rtc_state;
use zombie_firmware::sleep::DeepSleep;
use zombie_firmware::uplink::WifiUplink;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// `config.bin` from the SD card, or the defaults if it is missing or broken.
fn load_config(storage: &NodeStorage<'_>) -> NodeConfig {
    match storage.read_file(CONFIG_FILE) {
        Ok(bytes) if bytes.is_empty() => {
            info!("No {} on SD card, using defaults", CONFIG_FILE);
            NodeConfig::default()
        }
        Ok(bytes) => NodeConfig::from_postcard(&bytes).unwrap_or_else(|e| {
            error!("Ignoring {}: {}", CONFIG_FILE, e);
            NodeConfig::default()
        }),
        Err(e) => {
            error!("Could not read {}: {}", CONFIG_FILE, e);
            NodeConfig::default()
        }
    }
}

/// `network.bin` from the SD card. Without it every record is unclassified.
fn load_network(storage: &NodeStorage<'_>) -> Option<Box<NodeNetwork>> {
    let bytes = match storage.read_file(NETWORK_FILE) {
        Ok(bytes) if bytes.is_empty() => {
            warn!("No {} on SD card, predictions disabled", NETWORK_FILE);
            return None;
        }
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Could not read {}: {}", NETWORK_FILE, e);
            return None;
        }
    };

    NodeNetwork::from_bytes(&bytes)
        .map_err(|e| error!("Ignoring {}: {}", NETWORK_FILE, e))
        .ok()
}

fn static_ip_config(server: &ServerConfig) -> embassy_net::Config {
    embassy_net::Config::ipv4_static(StaticConfigV4 {
        address: Ipv4Cidr::new(Ipv4Address::from(server.local_address), server.prefix_len),
        gateway: Some(Ipv4Address::from(server.gateway)),
        dns_servers: Default::default(),
    })
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!(LevelFilter::Info);

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let wake_kind = rtc_state::wake_kind();
    let rtc = Rtc::new(peripherals.LPWR);
    let clock = RtcClock::new(&rtc);

    let mut storage = board::init_sd_storage(
        peripherals.SPI2,
        peripherals.GPIO36,
        peripherals.GPIO37,
        peripherals.GPIO35,
        peripherals.GPIO10,
        clock,
    );

    let node_config = load_config(&storage);
    let network = load_network(&storage);
    let predictor = network.as_deref().and_then(|network| {
        Predictor::<LSTM_UNITS, CATEGORY_COUNT, WINDOW_CAPACITY>::new(network)
            .map_err(|e| error!("Network does not fit the input window: {}", e))
            .ok()
    });

    let snapshot = rtc_state::load();
    let (mut state, _) =
        wake_node::<LSTM_UNITS, WINDOW_CAPACITY, _>(wake_kind, &snapshot, &mut storage);

    // Radio and network stack. The radio stays off until the cycle connects.
    static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio_init =
        RADIO.init(esp_radio::init().expect("Failed to initialize Wi-Fi/BLE controller"));
    let (wifi_controller, interfaces) =
        esp_radio::wifi::new(radio_init, peripherals.WIFI, Default::default())
            .expect("Failed to initialize Wi-Fi controller");

    static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        interfaces.sta,
        static_ip_config(&node_config.server),
        RESOURCES.init(StackResources::new()),
        seed,
    );
    spawner.spawn(net_task(runner).expect("Failed to spawn network task"));

    let uplink = WifiUplink::new(
        wifi_controller,
        stack,
        clock,
        &node_config.server,
        &node_config.internet,
    )
    .expect("Failed to configure Wi-Fi station");

    let i2c = board::create_i2c_bus(peripherals.I2C0, peripherals.GPIO12, peripherals.GPIO11);
    let sensors = SensorBoard::new(
        AdcFrontEnd::new(peripherals.ADC1, peripherals.GPIO4, peripherals.GPIO1),
        BH1750Sensor::new(i2c),
    );

    let mut io = NodeIo {
        sensors,
        uplink,
        storage,
        clock,
    };

    let sleep_for = match run_cycle(&node_config, predictor.as_ref(), &mut state, &mut io).await {
        Ok(report) => {
            info!(
                "Cycle done: {:?} mode, delivery {:?}, {} buffered",
                report.mode, report.delivery, state.counters.buffered
            );
            report.sleep_for
        }
        Err(e) => {
            error!("Cycle failed: {}", e);
            node_config.sleep_duration()
        }
    };

    rtc_state::store(&state.to_bytes());
    drop(io);

    let mut deep_sleep = DeepSleep::new(rtc);
    deep_sleep.enter_low_power(sleep_for).await;
    unreachable!("deep sleep resets the chip")
}
