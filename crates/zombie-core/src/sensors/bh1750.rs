use super::{LightSensor, SensorError};

use bh1750_embedded::{Address, Resolution, r#async::Bh1750Async};
use embedded_hal_async::i2c::I2c;
use log::{error, info};

/// BH1750 ambient light sensor on I2C
///
/// Uses one-time measurements only; the sensor drops back to power-down
/// after each one, so nothing has to be done before deep sleep.
pub struct BH1750Sensor<I> {
    sensor: Bh1750Async<I, embassy_time::Delay>,
}

impl<I: I2c> BH1750Sensor<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: Bh1750Async::<I, embassy_time::Delay>::new(
                i2c,
                embassy_time::Delay,
                Address::Low,
            ),
        }
    }
}

impl<I: I2c> LightSensor for BH1750Sensor<I> {
    async fn read_lux(&mut self) -> Result<f32, SensorError> {
        self.sensor
            .one_time_measurement(Resolution::High)
            .await
            .map(|lux| {
                info!("BH1750: Measured lux = {}", lux);
                lux
            })
            .map_err(|e| {
                error!("BH1750 one_time_measurement failed: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "BH1750",
                    operation: "one_time_measurement",
                    details: "Failed to read lux value during a single one-time measurement",
                }
            })
    }
}
