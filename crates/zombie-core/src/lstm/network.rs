//! Network weight set and its binary blob format
//!
//! Weights are exported from the training notebook into a little-endian blob
//! which the firmware reads from the SD card at start-up:
//!
//! ```text
//! magic "ZLST" | version u16 | units u16 | classes u16
//! feature_width u16 | step_count u16 | table_len u16
//! val_min f32 | val_max f32
//! table: table_len x (x f32, y f32)
//! gates forget, input, output, candidate:
//!     input [U] f32 | recurrent [U][U] f32 (row j) | bias [U] f32
//! dense kernel [U][C] f32 (row i) | dense bias [C] f32
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::ptr;

use super::activation::{LookupEntry, MAX_TABLE_LEN, TanhTable};
use super::cell::{CellWeights, GateWeights};
use super::dense::DenseLayer;
use super::window::{ScaleBounds, WindowShape};
use super::ModelError;

/// Magic number at the start of every network blob
pub const NETWORK_MAGIC: [u8; 4] = *b"ZLST";

/// Current network blob format version
pub const NETWORK_VERSION: u16 = 1;

/// Size of the fixed blob header in bytes
pub const NETWORK_HEADER_SIZE: usize = 4 + 6 * 2 + 2 * 4;

/// Complete model: LSTM layer, dense head, activation table, input scaling
/// and the window shape it was trained on.
#[derive(Debug, Clone, PartialEq)]
pub struct Network<const U: usize, const C: usize> {
    pub cell: CellWeights<U>,
    pub dense: DenseLayer<U, C>,
    pub table: TanhTable,
    pub bounds: ScaleBounds,
    pub shape: WindowShape,
}

impl<const U: usize, const C: usize> Network<U, C> {
    /// A network with all weights zero and the default tanh table.
    pub fn zeroed(shape: WindowShape, bounds: ScaleBounds) -> Self {
        Self {
            cell: CellWeights::zeroed(),
            dense: DenseLayer::zeroed(),
            table: TanhTable::default(),
            bounds,
            shape,
        }
    }

    /// A zeroed network allocated directly on the heap.
    ///
    /// The weight arrays are too large for the firmware's main task stack, so
    /// they are never materialised outside the allocation.
    pub fn boxed_zeroed(shape: WindowShape, bounds: ScaleBounds, table: TanhTable) -> Box<Self> {
        let mut network = Box::<Self>::new_uninit();
        let slot = network.as_mut_ptr();
        // SAFETY: every field is written before `assume_init`. `cell` and
        // `dense` consist only of `f32` arrays, for which all-zero bytes are
        // a valid `0.0`.
        unsafe {
            ptr::write_bytes(&raw mut (*slot).cell, 0, 1);
            ptr::write_bytes(&raw mut (*slot).dense, 0, 1);
            ptr::write(&raw mut (*slot).table, table);
            ptr::write(&raw mut (*slot).bounds, bounds);
            ptr::write(&raw mut (*slot).shape, shape);
            network.assume_init()
        }
    }

    /// Blob length for a table of `table_len` entries.
    pub const fn blob_len(table_len: usize) -> usize {
        NETWORK_HEADER_SIZE
            + table_len * 8
            + 4 * GateWeights::<U>::weight_count() * 4
            + (U * C + C) * 4
    }

    /// Decode and validate a network blob.
    pub fn from_bytes(bytes: &[u8]) -> Result<Box<Self>, ModelError> {
        if bytes.len() < NETWORK_HEADER_SIZE {
            return Err(ModelError::Truncated {
                expected: NETWORK_HEADER_SIZE,
                found: bytes.len(),
            });
        }

        let mut reader = BlobReader::new(bytes);

        if reader.bytes4() != NETWORK_MAGIC {
            return Err(ModelError::BadMagic);
        }

        let version = reader.u16();
        if version != NETWORK_VERSION {
            return Err(ModelError::UnsupportedVersion { version });
        }

        let units = reader.u16() as usize;
        if units != U {
            return Err(ModelError::DimensionMismatch {
                what: "units",
                expected: U,
                found: units,
            });
        }

        let classes = reader.u16() as usize;
        if classes != C {
            return Err(ModelError::DimensionMismatch {
                what: "classes",
                expected: C,
                found: classes,
            });
        }

        let shape = WindowShape::new(reader.u16() as usize, reader.u16() as usize);
        if shape.feature_width == 0 || shape.step_count == 0 {
            return Err(ModelError::ShapeMismatch {
                feature_width: shape.feature_width,
                step_count: shape.step_count,
                capacity: shape.capacity(),
            });
        }

        let table_len = reader.u16() as usize;
        if table_len == 0 {
            return Err(ModelError::EmptyTable);
        }
        if table_len > MAX_TABLE_LEN {
            return Err(ModelError::TableTooLong { max: MAX_TABLE_LEN });
        }

        let expected = Self::blob_len(table_len);
        if bytes.len() != expected {
            return Err(ModelError::Truncated {
                expected,
                found: bytes.len(),
            });
        }

        let bounds = ScaleBounds::new(reader.f32(), reader.f32())?;

        let mut entries = [LookupEntry::new(0.0, 0.0); MAX_TABLE_LEN];
        for entry in entries.iter_mut().take(table_len) {
            *entry = LookupEntry::new(reader.f32(), reader.f32());
        }
        let table = TanhTable::new(&entries[..table_len])?;

        let mut network = Self::boxed_zeroed(shape, bounds, table);

        for gate in network.cell.gates_mut() {
            reader.fill(&mut gate.input);
            for row in gate.recurrent.iter_mut() {
                reader.fill(row);
            }
            reader.fill(&mut gate.bias);
        }

        for row in network.dense.kernel.iter_mut() {
            reader.fill(row);
        }
        reader.fill(&mut network.dense.bias);

        Ok(network)
    }

    /// Encode the network into the blob format read by [`Self::from_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let entries = self.table.entries();
        let mut bytes = Vec::with_capacity(Self::blob_len(entries.len()));

        bytes.extend_from_slice(&NETWORK_MAGIC);
        for value in [
            NETWORK_VERSION,
            U as u16,
            C as u16,
            self.shape.feature_width as u16,
            self.shape.step_count as u16,
            entries.len() as u16,
        ] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes.extend_from_slice(&self.bounds.min.to_le_bytes());
        bytes.extend_from_slice(&self.bounds.max.to_le_bytes());

        for entry in entries {
            bytes.extend_from_slice(&entry.x.to_le_bytes());
            bytes.extend_from_slice(&entry.y.to_le_bytes());
        }

        for gate in self.cell.gates() {
            write_f32s(&mut bytes, &gate.input);
            for row in &gate.recurrent {
                write_f32s(&mut bytes, row);
            }
            write_f32s(&mut bytes, &gate.bias);
        }

        for row in &self.dense.kernel {
            write_f32s(&mut bytes, row);
        }
        write_f32s(&mut bytes, &self.dense.bias);

        bytes
    }
}

fn write_f32s(bytes: &mut Vec<u8>, values: &[f32]) {
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
}

/// Sequential little-endian reader over a blob whose length has already
/// been checked against its header.
struct BlobReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> BlobReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn bytes4(&mut self) -> [u8; 4] {
        let mut value = [0u8; 4];
        value.copy_from_slice(&self.bytes[self.offset..self.offset + 4]);
        self.offset += 4;
        value
    }

    fn u16(&mut self) -> u16 {
        let mut value = [0u8; 2];
        value.copy_from_slice(&self.bytes[self.offset..self.offset + 2]);
        self.offset += 2;
        u16::from_le_bytes(value)
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.bytes4())
    }

    fn fill(&mut self, values: &mut [f32]) {
        for value in values {
            *value = self.f32();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_network() -> Network<3, 2> {
        let mut network = Network::<3, 2>::zeroed(
            WindowShape::new(2, 3),
            ScaleBounds::new(-5.0, 125.0).unwrap(),
        );

        let mut value = 0.0_f32;
        for gate in network.cell.gates_mut() {
            for w in gate.input.iter_mut() {
                value += 0.01;
                *w = value;
            }
            for row in gate.recurrent.iter_mut() {
                for w in row.iter_mut() {
                    value -= 0.003;
                    *w = value;
                }
            }
            gate.bias = [0.1, -0.2, 0.3];
        }
        network.dense.kernel = [[1.0, -1.0], [0.5, 0.25], [-0.75, 2.0]];
        network.dense.bias = [0.05, -0.05];
        network
    }

    #[test]
    fn test_blob_round_trip() {
        let network = sample_network();
        let bytes = network.to_bytes();

        assert_eq!(bytes.len(), Network::<3, 2>::blob_len(26));
        assert_eq!(&bytes[0..4], b"ZLST");

        let decoded = Network::<3, 2>::from_bytes(&bytes).unwrap();
        assert_eq!(*decoded, network);
    }

    #[test]
    fn test_boxed_zeroed_matches_zeroed() {
        let shape = WindowShape::new(2, 3);
        let bounds = ScaleBounds::new(0.0, 10.0).unwrap();

        let boxed = Network::<32, 4>::boxed_zeroed(shape, bounds, TanhTable::default());
        assert_eq!(*boxed, Network::<32, 4>::zeroed(shape, bounds));
        assert!(
            boxed
                .cell
                .gates()
                .iter()
                .all(|gate| gate.recurrent.iter().flatten().all(|w| *w == 0.0))
        );
    }

    #[test]
    fn test_gate_order_in_blob() {
        let mut network = Network::<1, 1>::zeroed(
            WindowShape::new(1, 1),
            ScaleBounds::new(0.0, 1.0).unwrap(),
        );
        network.cell.forget.bias = [1.0];
        network.cell.candidate.bias = [4.0];
        let bytes = network.to_bytes();

        let gates_start = NETWORK_HEADER_SIZE + 26 * 8;
        let gate_len = GateWeights::<1>::weight_count() * 4;
        let forget_bias = gates_start + gate_len - 4;
        let candidate_bias = gates_start + 4 * gate_len - 4;

        assert_eq!(&bytes[forget_bias..forget_bias + 4], &1.0_f32.to_le_bytes());
        assert_eq!(&bytes[candidate_bias..candidate_bias + 4], &4.0_f32.to_le_bytes());
    }

    #[test]
    fn test_rejects_bad_magic_and_version() {
        let mut bytes = sample_network().to_bytes();
        bytes[0] = b'X';
        assert_eq!(Network::<3, 2>::from_bytes(&bytes), Err(ModelError::BadMagic));

        let mut bytes = sample_network().to_bytes();
        bytes[4..6].copy_from_slice(&7u16.to_le_bytes());
        assert_eq!(
            Network::<3, 2>::from_bytes(&bytes),
            Err(ModelError::UnsupportedVersion { version: 7 })
        );
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let bytes = sample_network().to_bytes();

        assert_eq!(
            Network::<4, 2>::from_bytes(&bytes),
            Err(ModelError::DimensionMismatch {
                what: "units",
                expected: 4,
                found: 3,
            })
        );
        assert_eq!(
            Network::<3, 3>::from_bytes(&bytes),
            Err(ModelError::DimensionMismatch {
                what: "classes",
                expected: 3,
                found: 2,
            })
        );
    }

    #[test]
    fn test_rejects_truncated_blob() {
        let bytes = sample_network().to_bytes();

        assert_eq!(
            Network::<3, 2>::from_bytes(&bytes[..10]),
            Err(ModelError::Truncated {
                expected: NETWORK_HEADER_SIZE,
                found: 10,
            })
        );
        assert_eq!(
            Network::<3, 2>::from_bytes(&bytes[..bytes.len() - 1]),
            Err(ModelError::Truncated {
                expected: bytes.len(),
                found: bytes.len() - 1,
            })
        );
    }

    #[test]
    fn test_rejects_invalid_bounds_and_table() {
        let mut bytes = sample_network().to_bytes();
        // val_max := val_min
        bytes[20..24].copy_from_slice(&(-5.0_f32).to_le_bytes());
        assert_eq!(Network::<3, 2>::from_bytes(&bytes), Err(ModelError::InvalidBounds));

        let mut bytes = sample_network().to_bytes();
        // Second table entry's x := 0.0, duplicating the first
        let second_x = NETWORK_HEADER_SIZE + 8;
        bytes[second_x..second_x + 4].copy_from_slice(&0.0_f32.to_le_bytes());
        assert_eq!(
            Network::<3, 2>::from_bytes(&bytes),
            Err(ModelError::UnorderedTable { index: 1 })
        );
    }
}
