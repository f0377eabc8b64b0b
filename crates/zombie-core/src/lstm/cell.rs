//! LSTM cell weights and the single time-step update

use super::activation::TanhTable;

/// Weights of one LSTM gate
///
/// `recurrent[j][i]` connects hidden unit `j` of the previous step to unit
/// `i` of this gate, matching the row layout of exported Keras kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct GateWeights<const U: usize> {
    pub input: [f32; U],
    pub recurrent: [[f32; U]; U],
    pub bias: [f32; U],
}

impl<const U: usize> GateWeights<U> {
    pub const fn zeroed() -> Self {
        Self {
            input: [0.0; U],
            recurrent: [[0.0; U]; U],
            bias: [0.0; U],
        }
    }

    /// Number of weights in one gate
    pub const fn weight_count() -> usize {
        U + U * U + U
    }

    /// Pre-activation of unit `i` for a scalar input and the previous hidden
    /// state.
    ///
    /// Accumulates `input * W[i] + b[i]` first, then `h[j] * U[j][i]` for `j`
    /// ascending.
    #[inline]
    fn pre_activation(&self, i: usize, input: f32, hidden: &[f32; U]) -> f32 {
        let mut acc = input * self.input[i] + self.bias[i];
        for (j, h) in hidden.iter().enumerate() {
            acc += h * self.recurrent[j][i];
        }
        acc
    }
}

/// The four gates of an LSTM layer
#[derive(Debug, Clone, PartialEq)]
pub struct CellWeights<const U: usize> {
    pub forget: GateWeights<U>,
    pub input: GateWeights<U>,
    pub output: GateWeights<U>,
    pub candidate: GateWeights<U>,
}

impl<const U: usize> CellWeights<U> {
    pub const fn zeroed() -> Self {
        Self {
            forget: GateWeights::zeroed(),
            input: GateWeights::zeroed(),
            output: GateWeights::zeroed(),
            candidate: GateWeights::zeroed(),
        }
    }

    /// Gates in blob order
    pub fn gates(&self) -> [&GateWeights<U>; 4] {
        [&self.forget, &self.input, &self.output, &self.candidate]
    }

    pub fn gates_mut(&mut self) -> [&mut GateWeights<U>; 4] {
        [
            &mut self.forget,
            &mut self.input,
            &mut self.output,
            &mut self.candidate,
        ]
    }
}

/// Cell and hidden state carried between time-steps
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentState<const U: usize> {
    pub cell: [f32; U],
    pub hidden: [f32; U],
}

impl<const U: usize> Default for RecurrentState<U> {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl<const U: usize> RecurrentState<U> {
    pub const fn zeroed() -> Self {
        Self {
            cell: [0.0; U],
            hidden: [0.0; U],
        }
    }

    pub fn reset(&mut self) {
        self.cell = [0.0; U];
        self.hidden = [0.0; U];
    }

    /// Advance the state by one time-step with a scalar input.
    ///
    /// Every gate of every unit is evaluated against the hidden state from
    /// before this step; cell and hidden state are only written afterwards.
    pub fn step(&mut self, input: f32, weights: &CellWeights<U>, table: &TanhTable) {
        let mut forget = [0.0_f32; U];
        let mut input_gate = [0.0_f32; U];
        let mut output = [0.0_f32; U];
        let mut candidate = [0.0_f32; U];

        for i in 0..U {
            forget[i] = table.sigmoid(weights.forget.pre_activation(i, input, &self.hidden));
            input_gate[i] = table.sigmoid(weights.input.pre_activation(i, input, &self.hidden));
            output[i] = table.sigmoid(weights.output.pre_activation(i, input, &self.hidden));
            candidate[i] = table.tanh(weights.candidate.pre_activation(i, input, &self.hidden));
        }

        for i in 0..U {
            self.cell[i] = forget[i] * self.cell[i] + input_gate[i] * candidate[i];
            self.hidden[i] = output[i] * table.tanh(self.cell[i]);
        }
    }
}
