//! Lookup-table activation functions.
//!
//! tanh is evaluated by linear interpolation in a small table of
//! `(x, tanh(x))` pairs for `x >= 0`, mirrored for negative inputs and
//! saturated to ±1 beyond the last entry. The sigmoid is derived from it via
//! `sigmoid(x) = (1 + tanh(x / 2)) / 2`.
//!
//! The interpolation is evaluated as `y_i + dy * (a - x_i) / dx`, in that
//! order. Reference outputs of the exported model depend on this rounding
//! behaviour, so the expression must not be rearranged.

use heapless::Vec;

use super::ModelError;

/// Maximum number of entries a lookup table may hold
pub const MAX_TABLE_LEN: usize = 64;

/// One `(x, y)` sample of the approximated function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookupEntry {
    pub x: f32,
    pub y: f32,
}

impl LookupEntry {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// tanh sampled at 0.0, 0.1, ..., 2.5 and rounded to five decimals.
pub const DEFAULT_TANH_TABLE: [LookupEntry; 26] = [
    LookupEntry::new(0.00000, 0.00000),
    LookupEntry::new(0.10000, 0.09967),
    LookupEntry::new(0.20000, 0.19738),
    LookupEntry::new(0.30000, 0.29131),
    LookupEntry::new(0.40000, 0.37995),
    LookupEntry::new(0.50000, 0.46212),
    LookupEntry::new(0.60000, 0.53705),
    LookupEntry::new(0.70000, 0.60437),
    LookupEntry::new(0.80000, 0.66404),
    LookupEntry::new(0.90000, 0.71630),
    LookupEntry::new(1.00000, 0.76159),
    LookupEntry::new(1.10000, 0.80050),
    LookupEntry::new(1.20000, 0.83365),
    LookupEntry::new(1.30000, 0.86172),
    LookupEntry::new(1.40000, 0.88535),
    LookupEntry::new(1.50000, 0.90515),
    LookupEntry::new(1.60000, 0.92167),
    LookupEntry::new(1.70000, 0.93541),
    LookupEntry::new(1.80000, 0.94681),
    LookupEntry::new(1.90000, 0.95624),
    LookupEntry::new(2.00000, 0.96403),
    LookupEntry::new(2.10000, 0.97045),
    LookupEntry::new(2.20000, 0.97574),
    LookupEntry::new(2.30000, 0.98010),
    LookupEntry::new(2.40000, 0.98367),
    LookupEntry::new(2.50000, 0.98661),
];

/// Validated tanh lookup table
///
/// Entries are non-empty, start at `x >= 0` and are strictly ascending in `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct TanhTable {
    entries: Vec<LookupEntry, MAX_TABLE_LEN>,
}

impl TanhTable {
    /// Build a table from the given entries, validating their ordering.
    pub fn new(entries: &[LookupEntry]) -> Result<Self, ModelError> {
        if entries.is_empty() {
            return Err(ModelError::EmptyTable);
        }

        if entries[0].x < 0.0 || entries[0].x.is_nan() {
            return Err(ModelError::UnorderedTable { index: 0 });
        }

        // `!(a < b)` also rejects NaN
        if let Some(index) = entries
            .windows(2)
            .position(|pair| !(pair[0].x < pair[1].x))
        {
            return Err(ModelError::UnorderedTable { index: index + 1 });
        }

        let entries = Vec::from_slice(entries).map_err(|_| ModelError::TableTooLong {
            max: MAX_TABLE_LEN,
        })?;

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[LookupEntry] {
        &self.entries
    }

    /// Largest `x` covered by the table; inputs beyond it saturate.
    pub fn saturation_point(&self) -> f32 {
        self.last().x
    }

    fn last(&self) -> LookupEntry {
        // Non-empty by construction
        self.entries[self.entries.len() - 1]
    }

    /// Approximate `tanh(x)`.
    pub fn tanh(&self, x: f32) -> f32 {
        if x.is_nan() {
            return x;
        }

        let sign = if x >= 0.0 { 1.0 } else { -1.0 };
        let abs_x = sign * x;
        let last = self.last();

        if abs_x > last.x {
            return sign;
        }

        // Scan for the segment whose upper end lies above `abs_x`. Inputs
        // below the first entry fall into the first segment.
        for pair in self.entries.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            if abs_x < upper.x {
                let dx = upper.x - lower.x;
                let dy = upper.y - lower.y;

                return sign * (lower.y + dy * (abs_x - lower.x) / dx);
            }
        }

        // `abs_x` sits exactly on the last breakpoint, or the table has a
        // single entry and `abs_x` does not exceed it.
        sign * last.y
    }

    /// Approximate the logistic sigmoid via `(1 + tanh(x / 2)) / 2`.
    pub fn sigmoid(&self, x: f32) -> f32 {
        (1.0 + self.tanh(x / 2.0)) / 2.0
    }
}

impl Default for TanhTable {
    fn default() -> Self {
        let mut entries = Vec::new();
        for entry in DEFAULT_TANH_TABLE {
            // DEFAULT_TANH_TABLE is shorter than MAX_TABLE_LEN
            let _ = entries.push(entry);
        }
        Self { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_valid() {
        let table = TanhTable::new(&DEFAULT_TANH_TABLE).unwrap();
        assert_eq!(table, TanhTable::default());
        assert_eq!(table.saturation_point(), 2.5);
    }

    #[test]
    fn test_saturates_beyond_last_entry() {
        let table = TanhTable::default();

        for x in [2.5001_f32, 3.0, 10.0, 1.0e6, f32::INFINITY] {
            assert_eq!(table.tanh(x), 1.0, "tanh({x}) should saturate to 1");
            assert_eq!(table.tanh(-x), -1.0, "tanh({}) should saturate to -1", -x);
        }
    }

    #[test]
    fn test_breakpoints_are_exact() {
        let table = TanhTable::default();

        for entry in DEFAULT_TANH_TABLE {
            assert_eq!(table.tanh(entry.x), entry.y, "at x = {}", entry.x);
            if entry.x > 0.0 {
                assert_eq!(table.tanh(-entry.x), -entry.y, "at x = {}", -entry.x);
            }
        }
    }

    #[test]
    fn test_interpolates_between_breakpoints() {
        let table = TanhTable::default();

        let expected = 0.46212_f32 + (0.53705_f32 - 0.46212) * (0.55_f32 - 0.5) / (0.6 - 0.5);
        assert_eq!(table.tanh(0.55), expected);
        assert_eq!(table.tanh(-0.55), -expected);

        let value = table.tanh(1.05);
        assert!(value > 0.76159 && value < 0.80050);
    }

    #[test]
    fn test_sigmoid_midpoint() {
        let table = TanhTable::default();
        assert_eq!(table.sigmoid(0.0), 0.5);
        assert_eq!(table.sigmoid(100.0), 1.0);
        assert_eq!(table.sigmoid(-100.0), 0.0);
    }

    #[test]
    fn test_is_odd_and_deterministic() {
        let table = TanhTable::default();

        for i in 0..300 {
            let x = i as f32 * 0.01;
            assert_eq!(table.tanh(-x), -table.tanh(x));
            assert_eq!(table.tanh(x).to_bits(), table.tanh(x).to_bits());
        }
    }

    #[test]
    fn test_below_first_entry_uses_first_segment() {
        // A table that does not start at zero leaves a gap below its first x.
        let table =
            TanhTable::new(&[LookupEntry::new(0.5, 0.5), LookupEntry::new(1.0, 0.75)]).unwrap();

        // First segment has slope 0.5, extrapolated down to x = 0.
        assert_eq!(table.tanh(0.0), 0.25);
        assert_eq!(table.tanh(0.25), 0.375);
        assert_eq!(table.tanh(-0.25), -0.375);
        assert_eq!(table.tanh(1.0), 0.75);
        assert_eq!(table.tanh(1.5), 1.0);
    }

    #[test]
    fn test_single_entry_table() {
        let table = TanhTable::new(&[LookupEntry::new(1.0, 0.8)]).unwrap();
        assert_eq!(table.tanh(0.5), 0.8);
        assert_eq!(table.tanh(1.0), 0.8);
        assert_eq!(table.tanh(1.5), 1.0);
    }

    #[test]
    fn test_nan_propagates() {
        let table = TanhTable::default();
        assert!(table.tanh(f32::NAN).is_nan());
        assert!(table.sigmoid(f32::NAN).is_nan());
    }

    #[test]
    fn test_rejects_invalid_tables() {
        assert_eq!(TanhTable::new(&[]), Err(ModelError::EmptyTable));
        assert_eq!(
            TanhTable::new(&[LookupEntry::new(-0.1, 0.0), LookupEntry::new(1.0, 0.7)]),
            Err(ModelError::UnorderedTable { index: 0 })
        );
        assert_eq!(
            TanhTable::new(&[
                LookupEntry::new(0.0, 0.0),
                LookupEntry::new(1.0, 0.7),
                LookupEntry::new(1.0, 0.8),
            ]),
            Err(ModelError::UnorderedTable { index: 2 })
        );

        let long = [LookupEntry::new(0.0, 0.0); MAX_TABLE_LEN + 1];
        let mut ascending = long;
        for (i, entry) in ascending.iter_mut().enumerate() {
            entry.x = i as f32;
        }
        assert_eq!(
            TanhTable::new(&ascending),
            Err(ModelError::TableTooLong { max: MAX_TABLE_LEN })
        );
    }
}
