//! Sensor abstractions
//!
//! The node measures three quantities per wake cycle: the storage capacitor
//! voltage, the solar cell current and the illuminance. Voltage and current
//! come from an analog front end, illuminance from a digital light sensor.

#[cfg(feature = "sensor-bh1750")]
mod bh1750;

#[cfg(feature = "sensor-bh1750")]
pub use bh1750::BH1750Sensor;

use core::future::Future;

use log::debug;
use thiserror_no_std::Error;

/// Number of ADC samples averaged per analog reading
pub const ADC_CYCLES: u32 = 32;

/// Voltage divider factor between the capacitor and the ADC input
pub const CAP_VOLT_FACTOR: f32 = 2.0173;

/// Shunt resistor used to measure the solar cell current (Ω)
pub const CELL_CURR_RESISTOR: f32 = 985.0;

/// Error types for sensor operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    /// Sensor initialization failed
    #[error("Failed to initialize {sensor}: {details}")]
    InitializationFailed {
        /// Name of the sensor
        sensor: &'static str,
        /// Additional details about the failure
        details: &'static str,
    },

    /// Sensor read operation failed
    #[error("Failed to read from {sensor} during {operation}: {details}")]
    ReadFailed {
        /// Name of the sensor
        sensor: &'static str,
        /// Operation that was being performed
        operation: &'static str,
        /// Additional details about the failure
        details: &'static str,
    },

    /// Sensor operation timed out
    #[error("Timeout on {sensor} during {operation}")]
    Timeout {
        /// Name of the sensor
        sensor: &'static str,
        /// Operation that timed out
        operation: &'static str,
    },
}

/// Measurements taken in one wake cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Readings {
    /// Capacitor voltage (V)
    pub voltage: f32,
    /// Solar cell current (µA)
    pub cell_current: f32,
    /// Illuminance (lx)
    pub light: f32,
}

/// Digital light sensor
pub trait LightSensor {
    /// Take a single illuminance measurement in lux.
    fn read_lux(&mut self) -> impl Future<Output = Result<f32, SensorError>>;
}

/// Analog measurements of the energy harvesting circuit
pub trait AnalogFrontEnd {
    /// Capacitor voltage in volts.
    fn capacitor_voltage(&mut self) -> impl Future<Output = Result<f32, SensorError>>;

    /// Solar cell current in microamperes.
    fn cell_current(&mut self) -> impl Future<Output = Result<f32, SensorError>>;
}

/// Everything the wake cycle measures
pub trait MeasurementSource {
    /// Supply voltage used for the power mode decision (V).
    fn supply_voltage(&mut self) -> impl Future<Output = Result<f32, SensorError>>;

    /// Take a full set of measurements.
    fn read(&mut self) -> impl Future<Output = Result<Readings, SensorError>>;
}

/// Converts an averaged capacitor channel reading (mV at the ADC pin) to the
/// capacitor voltage in volts.
pub fn capacitor_voltage_from_millivolts(millivolts: u32) -> f32 {
    millivolts as f32 * CAP_VOLT_FACTOR / 1000.0
}

/// Converts an averaged shunt channel reading (mV across the shunt) to the
/// cell current in microamperes.
pub fn cell_current_from_millivolts(millivolts: u32) -> f32 {
    millivolts as f32 / CELL_CURR_RESISTOR * 1000.0
}

/// Analog front end plus light sensor, the sensor set of the node
pub struct SensorBoard<A, L> {
    analog: A,
    light: L,
}

impl<A: AnalogFrontEnd, L: LightSensor> SensorBoard<A, L> {
    pub fn new(analog: A, light: L) -> Self {
        Self { analog, light }
    }

    pub fn light_sensor(&mut self) -> &mut L {
        &mut self.light
    }
}

impl<A: AnalogFrontEnd, L: LightSensor> MeasurementSource for SensorBoard<A, L> {
    async fn supply_voltage(&mut self) -> Result<f32, SensorError> {
        self.analog.capacitor_voltage().await
    }

    async fn read(&mut self) -> Result<Readings, SensorError> {
        let voltage = self.analog.capacitor_voltage().await?;
        let cell_current = self.analog.cell_current().await?;
        let light = self.light.read_lux().await?;

        debug!(
            "Measured {:.3} V, {:.1} uA, {:.1} lx",
            voltage, cell_current, light
        );

        Ok(Readings {
            voltage,
            cell_current,
            light,
        })
    }
}
