//! Input scaling and the persistent circular input window

use super::ModelError;

/// Shape of the inference input drawn from the window
///
/// A prediction replays `feature_width` time-steps spaced `step_count`
/// samples apart, so the window has to hold `feature_width * step_count`
/// samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowShape {
    pub feature_width: usize,
    pub step_count: usize,
}

impl WindowShape {
    pub const fn new(feature_width: usize, step_count: usize) -> Self {
        Self {
            feature_width,
            step_count,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.feature_width * self.step_count
    }

    /// Check that the shape is usable with a window of capacity `W`.
    pub fn validate_for<const W: usize>(&self) -> Result<(), ModelError> {
        if self.feature_width == 0 || self.step_count == 0 || self.capacity() != W {
            return Err(ModelError::ShapeMismatch {
                feature_width: self.feature_width,
                step_count: self.step_count,
                capacity: W,
            });
        }
        Ok(())
    }
}

/// Min/max scaling applied to raw sensor readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleBounds {
    pub min: f32,
    pub max: f32,
}

impl ScaleBounds {
    pub fn new(min: f32, max: f32) -> Result<Self, ModelError> {
        // Also rejects NaN bounds
        if !(min < max) {
            return Err(ModelError::InvalidBounds);
        }
        Ok(Self { min, max })
    }

    /// Map a raw reading into the training range. Values outside
    /// `[min, max]` are not clamped.
    pub fn scale(&self, raw: f32) -> f32 {
        (raw - self.min) / (self.max - self.min)
    }
}

/// Circular buffer of the last `W` scaled inputs
///
/// The slot for measurement `sequence` (1-based) is `(sequence - 1) % W`, so
/// the window content is fully determined by the measurement counter and
/// survives deep sleep alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct SlidingWindow<const W: usize> {
    values: [f32; W],
}

impl<const W: usize> Default for SlidingWindow<W> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const W: usize> SlidingWindow<W> {
    pub const fn zeroed() -> Self {
        Self { values: [0.0; W] }
    }

    pub fn from_values(values: [f32; W]) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32; W] {
        &self.values
    }

    /// Slot written by measurement `sequence`. Sequence 0 maps to slot 0.
    pub fn write_index(sequence: u32) -> usize {
        sequence.saturating_sub(1) as usize % W
    }

    /// Whether `W` samples precede measurement `sequence`, i.e. the window
    /// has wrapped at least once.
    pub fn is_warm(sequence: u32) -> bool {
        sequence.saturating_sub(1) as usize >= W
    }

    pub fn push(&mut self, scaled: f32, sequence: u32) {
        self.values[Self::write_index(sequence)] = scaled;
    }

    /// All `W` values, oldest first, newest (`sequence`) last.
    pub fn ordered_view(&self, sequence: u32) -> impl Iterator<Item = f32> + '_ {
        let start = (Self::write_index(sequence) + 1) % W;
        (0..W).map(move |offset| self.values[(start + offset) % W])
    }

    /// The inference inputs for measurement `sequence`: `feature_width`
    /// values spaced `step_count` apart, ending with the newest sample.
    pub fn replay_view(&self, sequence: u32, shape: WindowShape) -> impl Iterator<Item = f32> + '_ {
        let start = (Self::write_index(sequence) + shape.step_count) % W;
        (0..shape.feature_width).map(move |k| self.values[(start + k * shape.step_count) % W])
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::vec::Vec;

    use super::*;

    #[test]
    fn test_scale_is_unclamped() {
        let bounds = ScaleBounds::new(0.0, 10.0).unwrap();
        assert_eq!(bounds.scale(5.0), 0.5);
        assert_eq!(bounds.scale(-10.0), -1.0);
        assert_eq!(bounds.scale(20.0), 2.0);
    }

    #[test]
    fn test_rejects_degenerate_bounds() {
        assert_eq!(ScaleBounds::new(1.0, 1.0), Err(ModelError::InvalidBounds));
        assert_eq!(ScaleBounds::new(2.0, 1.0), Err(ModelError::InvalidBounds));
        assert_eq!(ScaleBounds::new(f32::NAN, 1.0), Err(ModelError::InvalidBounds));
    }

    #[test]
    fn test_shape_validation() {
        assert!(WindowShape::new(20, 6).validate_for::<120>().is_ok());
        assert!(WindowShape::new(2, 3).validate_for::<6>().is_ok());
        assert_eq!(
            WindowShape::new(2, 3).validate_for::<8>(),
            Err(ModelError::ShapeMismatch {
                feature_width: 2,
                step_count: 3,
                capacity: 8,
            })
        );
        assert!(WindowShape::new(0, 3).validate_for::<0>().is_err());
    }

    #[test]
    fn test_is_warm_boundary() {
        assert!(!SlidingWindow::<6>::is_warm(0));
        assert!(!SlidingWindow::<6>::is_warm(1));
        assert!(!SlidingWindow::<6>::is_warm(6));
        assert!(SlidingWindow::<6>::is_warm(7));
        assert!(SlidingWindow::<6>::is_warm(1000));
    }

    #[test]
    fn test_write_index_wraps() {
        assert_eq!(SlidingWindow::<6>::write_index(0), 0);
        assert_eq!(SlidingWindow::<6>::write_index(1), 0);
        assert_eq!(SlidingWindow::<6>::write_index(6), 5);
        assert_eq!(SlidingWindow::<6>::write_index(7), 0);
        assert_eq!(SlidingWindow::<6>::write_index(13), 0);
    }

    #[test]
    fn test_ordered_view_across_wrap() {
        const W: usize = 6;
        let mut window = SlidingWindow::<W>::zeroed();

        for sequence in 1..=(2 * W as u32) {
            window.push(sequence as f32, sequence);

            let view: Vec<f32> = window.ordered_view(sequence).collect();
            assert_eq!(view.len(), W);

            // Newest last, and every retained sample in measurement order.
            assert_eq!(view[W - 1], sequence as f32);
            let retained = (sequence as usize).min(W);
            let expected: Vec<f32> = ((sequence as usize + 1 - retained)..=sequence as usize)
                .map(|s| s as f32)
                .collect();
            assert_eq!(&view[W - retained..], expected.as_slice());
        }
    }

    #[test]
    fn test_replay_view_ends_with_newest_sample() {
        let shape = WindowShape::new(2, 3);
        let mut window = SlidingWindow::<6>::zeroed();
        for sequence in 1..=7 {
            window.push(sequence as f32, sequence);
        }

        // Slot 0 holds 7; replay starts at (0 + 3) % 6 = 3 which holds 4.
        let replay: Vec<f32> = window.replay_view(7, shape).collect();
        assert_eq!(replay, [4.0, 7.0]);

        window.push(8.0, 8);
        let replay: Vec<f32> = window.replay_view(8, shape).collect();
        assert_eq!(replay, [5.0, 8.0]);
    }

    #[test]
    fn test_replay_view_node_shape() {
        const W: usize = 120;
        let shape = WindowShape::new(20, 6);
        let mut window = SlidingWindow::<W>::zeroed();
        for sequence in 1..=250 {
            window.push(sequence as f32, sequence);
        }

        let replay: Vec<f32> = window.replay_view(250, shape).collect();
        assert_eq!(replay.len(), 20);
        assert_eq!(replay[19], 250.0);
        for pair in replay.windows(2) {
            assert_eq!(pair[1] - pair[0], 6.0);
        }
    }
}
