//! Measurement record sent to the server and kept in the store-and-forward log
//!
//! Binary format (little-endian), 40 bytes:
//! - voltage: 4 bytes (f32)
//! - prior_voltage: 4 bytes (f32)
//! - cell_current: 4 bytes (f32)
//! - light: 4 bytes (f32)
//! - measurement_sequence: 4 bytes (u32)
//! - secondary_count: 4 bytes (u32)
//! - timestamp: 8 bytes (i64)
//! - predicted_class: 4 bytes (i32, -1 = undefined)
//! - padding: 4 bytes

use core::fmt::Display;

use crate::lstm::Prediction;

/// Serialized size of a [`MeasurementRecord`] in bytes
pub const RECORD_SIZE: usize = 40;

/// One wake cycle's worth of telemetry
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementRecord {
    /// Capacitor voltage this cycle (V)
    pub voltage: f32,
    /// Capacitor voltage of the previous cycle (V)
    pub prior_voltage: f32,
    /// Solar cell current (µA)
    pub cell_current: f32,
    /// Illuminance (lx)
    pub light: f32,
    /// Measurement counter value for this record
    pub measurement_sequence: u32,
    /// Number of network sessions so far
    pub secondary_count: u32,
    /// Seconds since epoch
    pub timestamp: i64,
    /// Predicted class index, or -1
    pub predicted_class: i32,
    _padding: [u8; 4],
}

impl MeasurementRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        voltage: f32,
        prior_voltage: f32,
        cell_current: f32,
        light: f32,
        measurement_sequence: u32,
        secondary_count: u32,
        timestamp: i64,
        prediction: Prediction,
    ) -> Self {
        Self {
            voltage,
            prior_voltage,
            cell_current,
            light,
            measurement_sequence,
            secondary_count,
            timestamp,
            predicted_class: prediction.to_wire(),
            _padding: [0; 4],
        }
    }

    pub fn prediction(&self) -> Prediction {
        Prediction::from_wire(self.predicted_class)
    }

    /// Converts the record to its wire and storage representation.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];

        bytes[0..4].copy_from_slice(&self.voltage.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.prior_voltage.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.cell_current.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.light.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.measurement_sequence.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.secondary_count.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[32..36].copy_from_slice(&self.predicted_class.to_le_bytes());

        // Padding is already zero
        bytes
    }

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut word = [0u8; 4];
        let mut read_word = |offset: usize| {
            word.copy_from_slice(&bytes[offset..offset + 4]);
            word
        };

        let voltage = f32::from_le_bytes(read_word(0));
        let prior_voltage = f32::from_le_bytes(read_word(4));
        let cell_current = f32::from_le_bytes(read_word(8));
        let light = f32::from_le_bytes(read_word(12));
        let measurement_sequence = u32::from_le_bytes(read_word(16));
        let secondary_count = u32::from_le_bytes(read_word(20));
        let predicted_class = i32::from_le_bytes(read_word(32));

        let mut timestamp_bytes = [0u8; 8];
        timestamp_bytes.copy_from_slice(&bytes[24..32]);
        let timestamp = i64::from_le_bytes(timestamp_bytes);

        Self {
            voltage,
            prior_voltage,
            cell_current,
            light,
            measurement_sequence,
            secondary_count,
            timestamp,
            predicted_class,
            _padding: [0; 4],
        }
    }
}

impl Display for MeasurementRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Record #{}] t: {}, voltage: {:.3} V (prior {:.3} V), cell: {:.1} µA, light: {:.1} lx, sessions: {}, class: {}",
            self.measurement_sequence,
            self.timestamp,
            self.voltage,
            self.prior_voltage,
            self.cell_current,
            self.light,
            self.secondary_count,
            self.prediction()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MeasurementRecord {
        MeasurementRecord::new(
            3.42,
            3.38,
            152.5,
            480.0,
            17,
            4,
            1_700_000_000,
            Prediction::Class(2),
        )
    }

    #[test]
    fn test_record_size() {
        assert_eq!(core::mem::size_of::<MeasurementRecord>(), RECORD_SIZE);
    }

    #[test]
    fn test_record_layout() {
        let bytes = sample().to_bytes();

        assert_eq!(&bytes[0..4], &3.42_f32.to_le_bytes());
        assert_eq!(&bytes[16..20], &17u32.to_le_bytes());
        assert_eq!(&bytes[24..32], &1_700_000_000i64.to_le_bytes());
        assert_eq!(&bytes[32..36], &2i32.to_le_bytes());
        assert_eq!(&bytes[36..40], &[0u8; 4]);
    }

    #[test]
    fn test_record_decodes_encoded_bytes() {
        let record = sample();
        assert_eq!(MeasurementRecord::from_bytes(&record.to_bytes()), record);
    }

    #[test]
    fn test_undefined_prediction_is_minus_one() {
        let record = MeasurementRecord::new(3.0, 0.0, 0.0, 0.0, 1, 0, 0, Prediction::Undefined);
        assert_eq!(record.predicted_class, -1);
        assert_eq!(record.prediction(), Prediction::Undefined);
        assert_eq!(&record.to_bytes()[32..36], &(-1i32).to_le_bytes());
    }
}
