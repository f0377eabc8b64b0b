//! Dense classifier head

/// Fully-connected projection from `U` hidden units to `C` class scores
///
/// `kernel[i][c]` is the weight from hidden unit `i` to class `c`.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseLayer<const U: usize, const C: usize> {
    pub kernel: [[f32; C]; U],
    pub bias: [f32; C],
}

impl<const U: usize, const C: usize> DenseLayer<U, C> {
    pub const fn zeroed() -> Self {
        Self {
            kernel: [[0.0; C]; U],
            bias: [0.0; C],
        }
    }

    /// Raw class scores for a hidden state.
    pub fn scores(&self, hidden: &[f32; U]) -> [f32; C] {
        let mut scores = self.bias;
        for (c, score) in scores.iter_mut().enumerate() {
            for (i, h) in hidden.iter().enumerate() {
                *score += self.kernel[i][c] * h;
            }
        }
        scores
    }

    /// Index of the highest score.
    ///
    /// The running maximum starts at zero and only a strictly greater score
    /// replaces it, so ties keep the lowest index and a hidden state whose
    /// scores are all non-positive classifies as class 0. Deployed models are
    /// trained against this behaviour.
    pub fn classify(&self, hidden: &[f32; U]) -> usize {
        let mut best = 0;
        let mut max = 0.0_f32;
        for (c, score) in self.scores(hidden).into_iter().enumerate() {
            if score > max {
                max = score;
                best = c;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(bias: [f32; 3]) -> DenseLayer<2, 3> {
        DenseLayer {
            kernel: [[1.0, 0.0, -1.0], [0.0, 2.0, 0.5]],
            bias,
        }
    }

    #[test]
    fn test_scores_accumulate_bias_then_kernel() {
        let dense = layer([0.1, 0.2, 0.3]);
        let scores = dense.scores(&[0.5, -0.25]);

        assert_eq!(scores[0], 0.1 + 1.0 * 0.5 + 0.0 * -0.25);
        assert_eq!(scores[1], 0.2 + 0.0 * 0.5 + 2.0 * -0.25);
        assert_eq!(scores[2], 0.3 + -1.0 * 0.5 + 0.5 * -0.25);
    }

    #[test]
    fn test_picks_highest_score() {
        let dense = layer([0.0, 0.0, 0.0]);
        assert_eq!(dense.classify(&[1.0, 0.0]), 0);
        assert_eq!(dense.classify(&[0.0, 1.0]), 1);
        assert_eq!(dense.classify(&[-1.0, 0.0]), 2);
    }

    #[test]
    fn test_ties_keep_lowest_index() {
        let dense = layer([0.0, 0.7, 0.7]);
        assert_eq!(dense.classify(&[0.0, 0.0]), 1);

        let dense = layer([0.4, 0.4, 0.4]);
        assert_eq!(dense.classify(&[0.0, 0.0]), 0);
    }

    #[test]
    fn test_all_non_positive_scores_yield_class_zero() {
        let dense = layer([-0.5, -0.1, -0.2]);
        assert_eq!(dense.classify(&[0.0, 0.0]), 0);

        let dense = DenseLayer::<2, 3>::zeroed();
        assert_eq!(dense.classify(&[0.3, -0.3]), 0);
    }
}
