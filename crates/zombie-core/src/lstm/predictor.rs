//! End-to-end prediction pass over the persistent window

use core::fmt;

use log::debug;

use super::cell::RecurrentState;
use super::network::Network;
use super::window::SlidingWindow;
use super::ModelError;

/// Result of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prediction {
    /// Not enough history yet, or no network loaded
    Undefined,
    /// Index of the winning class
    Class(usize),
}

impl Prediction {
    /// Wire value used in measurement records: the class index, or -1.
    pub fn to_wire(self) -> i32 {
        match self {
            Prediction::Undefined => -1,
            Prediction::Class(class) => class as i32,
        }
    }

    pub fn from_wire(value: i32) -> Self {
        if value < 0 {
            Prediction::Undefined
        } else {
            Prediction::Class(value as usize)
        }
    }

    pub fn category(self) -> Option<IlluminationCategory> {
        match self {
            Prediction::Undefined => None,
            Prediction::Class(class) => IlluminationCategory::from_class(class),
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prediction::Undefined => write!(f, "undefined"),
            Prediction::Class(class) => match IlluminationCategory::from_class(*class) {
                Some(category) => write!(f, "{}", category.label()),
                None => write!(f, "class {}", class),
            },
        }
    }
}

/// Light trend categories the deployed model distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlluminationCategory {
    /// Periodic dark phases of 90 minutes
    Dark90Min,
    /// Constant artificial light
    Constant,
    /// Daylight through a window
    Window,
}

impl IlluminationCategory {
    pub fn from_class(class: usize) -> Option<Self> {
        match class {
            0 => Some(Self::Dark90Min),
            1 => Some(Self::Constant),
            2 => Some(Self::Window),
            _ => None,
        }
    }

    pub fn class(self) -> usize {
        self as usize
    }

    /// Label used in the training data set
    pub fn label(self) -> &'static str {
        match self {
            Self::Dark90Min => "90mindark",
            Self::Constant => "const",
            Self::Window => "window",
        }
    }
}

/// Inference state that has to survive deep sleep
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceState<const U: usize, const W: usize> {
    pub recurrent: RecurrentState<U>,
    pub window: SlidingWindow<W>,
}

impl<const U: usize, const W: usize> Default for InferenceState<U, W> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const U: usize, const W: usize> InferenceState<U, W> {
    pub const fn zeroed() -> Self {
        Self {
            recurrent: RecurrentState::zeroed(),
            window: SlidingWindow::zeroed(),
        }
    }
}

/// Runs a network over an [`InferenceState`] with window capacity `W`
pub struct Predictor<'a, const U: usize, const C: usize, const W: usize> {
    network: &'a Network<U, C>,
}

impl<'a, const U: usize, const C: usize, const W: usize> Predictor<'a, U, C, W> {
    /// Bind a network to a window capacity, checking the network was trained
    /// for a window of exactly `W` samples.
    pub fn new(network: &'a Network<U, C>) -> Result<Self, ModelError> {
        network.shape.validate_for::<W>()?;
        Ok(Self { network })
    }

    pub fn network(&self) -> &Network<U, C> {
        self.network
    }

    /// Record a raw reading as measurement `sequence` and classify the
    /// window ending with it.
    ///
    /// The reading is always stored. Until the window has wrapped once the
    /// result is [`Prediction::Undefined`] and the recurrent state is left
    /// untouched. Otherwise the recurrent state is reset and the sampled
    /// window replayed through the cell, with the classifier evaluated after
    /// every step.
    pub fn predict(
        &self,
        raw: f32,
        sequence: u32,
        state: &mut InferenceState<U, W>,
    ) -> Prediction {
        let network = self.network;

        state.window.push(network.bounds.scale(raw), sequence);

        if !SlidingWindow::<W>::is_warm(sequence) {
            debug!(
                "Window not warm yet ({}/{} samples)",
                sequence.min(W as u32),
                W
            );
            return Prediction::Undefined;
        }

        state.recurrent.reset();

        let mut class = 0;
        for input in state.window.replay_view(sequence, network.shape) {
            state.recurrent.step(input, &network.cell, &network.table);
            class = network.dense.classify(&state.recurrent.hidden);
        }

        Prediction::Class(class)
    }
}

#[cfg(test)]
mod tests {
    use super::super::window::{ScaleBounds, WindowShape};
    use super::*;

    fn zero_network() -> Network<4, 3> {
        Network::zeroed(WindowShape::new(2, 3), ScaleBounds::new(0.0, 10.0).unwrap())
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(Prediction::Undefined.to_wire(), -1);
        assert_eq!(Prediction::Class(2).to_wire(), 2);
        assert_eq!(Prediction::from_wire(-1), Prediction::Undefined);
        assert_eq!(Prediction::from_wire(1), Prediction::Class(1));
        assert_eq!(
            Prediction::Class(0).category(),
            Some(IlluminationCategory::Dark90Min)
        );
        assert_eq!(IlluminationCategory::Window.label(), "window");
        assert_eq!(IlluminationCategory::Constant.class(), 1);
    }

    #[test]
    fn test_rejects_shape_mismatch() {
        let network = zero_network();
        assert!(Predictor::<4, 3, 6>::new(&network).is_ok());
        assert_eq!(
            Predictor::<4, 3, 8>::new(&network).err(),
            Some(ModelError::ShapeMismatch {
                feature_width: 2,
                step_count: 3,
                capacity: 8,
            })
        );
    }

    #[test]
    fn test_undefined_until_warm() {
        let network = zero_network();
        let predictor = Predictor::<4, 3, 6>::new(&network).unwrap();
        let mut state = InferenceState::<4, 6>::zeroed();

        for sequence in 1..=6 {
            let prediction = predictor.predict(sequence as f32, sequence, &mut state);
            assert_eq!(prediction, Prediction::Undefined);
        }

        // Scaled into [0, 10]
        assert_eq!(state.window.values(), &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(
            predictor.predict(7.0, 7, &mut state),
            Prediction::Class(0)
        );
    }

    #[test]
    fn test_sequence_zero_is_never_warm() {
        let network = zero_network();
        let predictor = Predictor::<4, 3, 6>::new(&network).unwrap();
        let mut state = InferenceState::<4, 6>::zeroed();

        assert_eq!(predictor.predict(5.0, 0, &mut state), Prediction::Undefined);
        assert_eq!(state.window.values()[0], 0.5);
    }

    #[test]
    fn test_recurrent_state_reset_before_replay() {
        let mut network = zero_network();
        network.cell.candidate.input = [1.0; 4];
        network.cell.input.bias = [2.0; 4];
        network.dense.bias = [0.0, 0.0, 0.1];
        let predictor = Predictor::<4, 3, 6>::new(&network).unwrap();

        let mut state = InferenceState::<4, 6>::zeroed();
        for sequence in 1..=7 {
            predictor.predict(sequence as f32, sequence, &mut state);
        }
        let first = state.recurrent.clone();

        // Garbage left behind in the recurrent state must not leak into the
        // next pass.
        let mut dirty = state.clone();
        dirty.recurrent.cell = [9.0; 4];
        dirty.recurrent.hidden = [-9.0; 4];

        let clean_result = predictor.predict(8.0, 8, &mut state);
        let dirty_result = predictor.predict(8.0, 8, &mut dirty);
        assert_eq!(clean_result, dirty_result);
        assert_eq!(state.recurrent, dirty.recurrent);
        assert_ne!(state.recurrent, first);
    }

    #[test]
    fn test_classifier_follows_last_step() {
        let mut network = zero_network();
        // Hidden state turns positive for positive input, and class 1 wins
        // whenever hidden[0] is positive.
        network.cell.candidate.input = [1.0, 0.0, 0.0, 0.0];
        network.dense.kernel[0] = [0.0, 1.0, 0.0];
        let predictor = Predictor::<4, 3, 6>::new(&network).unwrap();

        let mut state = InferenceState::<4, 6>::zeroed();
        for sequence in 1..=6 {
            predictor.predict(5.0, sequence, &mut state);
        }
        assert_eq!(predictor.predict(5.0, 7, &mut state), Prediction::Class(1));
        assert!(state.recurrent.hidden[0] > 0.0);
    }
}
