//! Hardware initialization for the sensor node
//!
//! Pin assignment:
//! - GPIO4 (ADC1 channel 3): capacitor voltage through the divider
//! - GPIO1 (ADC1 channel 0): voltage across the solar cell shunt
//! - GPIO12 / GPIO11: I2C SDA / SCL to the BH1750
//! - GPIO36 / GPIO37 / GPIO35 / GPIO10: SD card SCK / MOSI / MISO / CS

use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::analog::adc::{Adc, AdcCalCurve, AdcConfig, AdcPin, Attenuation};
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::peripherals::{ADC1, GPIO1, GPIO4};
use esp_hal::spi::Mode;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::{Async, Blocking};
use log::{debug, error};
use zombie_core::sensors::{
    ADC_CYCLES, AnalogFrontEnd, SensorError, capacitor_voltage_from_millivolts,
    cell_current_from_millivolts,
};
use zombie_core::storage::SdCardStorage;

use crate::clock::RtcClock;

type Adc1 = ADC1<'static>;
type Calibration = AdcCalCurve<Adc1>;

/// SPI device the SD card sits on
pub type SdSpi = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>;

/// Record log and configuration files on the SD card
pub type NodeStorage<'a> = SdCardStorage<SdSpi, Delay, RtcClock<'a>>;

/// Capacitor voltage and cell current read through ADC1
///
/// Both channels use curve-fitting calibration, so raw readings are already
/// in millivolts at the pin.
pub struct AdcFrontEnd {
    adc: Adc<'static, Adc1, Blocking>,
    capacitor: AdcPin<GPIO4<'static>, Adc1, Calibration>,
    shunt: AdcPin<GPIO1<'static>, Adc1, Calibration>,
}

impl AdcFrontEnd {
    pub fn new(adc1: Adc1, capacitor_pin: GPIO4<'static>, shunt_pin: GPIO1<'static>) -> Self {
        let mut config = AdcConfig::new();
        // The divider brings the capacitor into the 11 dB range, the shunt
        // voltage stays below 750 mV.
        let capacitor =
            config.enable_pin_with_cal::<_, Calibration>(capacitor_pin, Attenuation::_11dB);
        let shunt = config.enable_pin_with_cal::<_, Calibration>(shunt_pin, Attenuation::_0dB);

        Self {
            adc: Adc::new(adc1, config),
            capacitor,
            shunt,
        }
    }
}

/// Average of [`ADC_CYCLES`] one-shot conversions, in millivolts.
fn average_millivolts<P>(
    adc: &mut Adc<'static, Adc1, Blocking>,
    pin: &mut AdcPin<P, Adc1, Calibration>,
    operation: &'static str,
) -> Result<u32, SensorError>
where
    P: esp_hal::analog::adc::AdcChannel,
{
    let mut sum = 0u32;
    for _ in 0..ADC_CYCLES {
        let sample = nb::block!(adc.read_oneshot(pin)).map_err(|()| {
            error!("ADC1 conversion failed during {}", operation);
            SensorError::ReadFailed {
                sensor: "ADC1",
                operation,
                details: "One-shot conversion failed",
            }
        })?;
        sum += u32::from(sample);
    }

    let millivolts = sum / ADC_CYCLES;
    debug!("ADC1 {}: {} mV", operation, millivolts);
    Ok(millivolts)
}

impl AnalogFrontEnd for AdcFrontEnd {
    async fn capacitor_voltage(&mut self) -> Result<f32, SensorError> {
        let millivolts = average_millivolts(&mut self.adc, &mut self.capacitor, "capacitor")?;
        Ok(capacitor_voltage_from_millivolts(millivolts))
    }

    async fn cell_current(&mut self) -> Result<f32, SensorError> {
        let millivolts = average_millivolts(&mut self.adc, &mut self.shunt, "shunt")?;
        Ok(cell_current_from_millivolts(millivolts))
    }
}

/// Initialize the I2C bus hardware
///
/// Creates the I2C peripheral with proper configuration
pub fn create_i2c_bus(
    i2c0: esp_hal::peripherals::I2C0<'static>,
    sda: esp_hal::peripherals::GPIO12<'static>,
    scl: esp_hal::peripherals::GPIO11<'static>,
) -> I2c<'static, Async> {
    I2c::new(
        i2c0,
        I2cConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .unwrap()
    .with_sda(sda)
    .with_scl(scl)
    .into_async()
}

/// Initialize the SD card and wrap it as record storage
///
/// The card is clocked at 400 kHz, which every card accepts during
/// initialization and is fast enough for a few hundred bytes per wake.
pub fn init_sd_storage<'a>(
    spi2: esp_hal::peripherals::SPI2<'static>,
    sck: esp_hal::peripherals::GPIO36<'static>,
    mosi: esp_hal::peripherals::GPIO37<'static>,
    miso: esp_hal::peripherals::GPIO35<'static>,
    cs: esp_hal::peripherals::GPIO10<'static>,
    clock: RtcClock<'a>,
) -> NodeStorage<'a> {
    let spi_bus = Spi::new(
        spi2,
        SpiConfig::default()
            .with_frequency(Rate::from_khz(400))
            .with_mode(Mode::_0),
    )
    .unwrap()
    .with_sck(sck)
    .with_mosi(mosi)
    .with_miso(miso);

    let cs = Output::new(cs, Level::High, OutputConfig::default());
    let sd_spi = ExclusiveDevice::new(spi_bus, cs, Delay::new()).unwrap();

    let sd_card = embedded_sdmmc::SdCard::new(sd_spi, Delay::new());
    SdCardStorage::new(sd_card, clock)
}
