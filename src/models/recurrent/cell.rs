//! Recurrent cells and the dense readout
//!
//! Both cell kinds share the same initialization scheme: gate weights
//! drawn from Uniform(-1/sqrt(hidden), 1/sqrt(hidden)), biases zero
//! except the LSTM forget gate, which starts at one so early training
//! retains state.

use ndarray::{Array1, Array2};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use serde::{Deserialize, Serialize};

/// Which recurrent cell a layer stack is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Lstm,
    Gru,
}

impl CellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellKind::Lstm => "lstm",
            CellKind::Gru => "gru",
        }
    }
}

/// Hidden state carried between time steps; the cell slot is only
/// populated for LSTM layers.
#[derive(Debug, Clone)]
pub struct LayerState {
    pub hidden: Array1<f64>,
    cell: Option<Array1<f64>>,
}

/// One recurrent layer of either kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecurrentLayer {
    Lstm(LstmCell),
    Gru(GruCell),
}

impl RecurrentLayer {
    pub fn new(kind: CellKind, input_size: usize, hidden_size: usize) -> Self {
        match kind {
            CellKind::Lstm => RecurrentLayer::Lstm(LstmCell::new(input_size, hidden_size)),
            CellKind::Gru => RecurrentLayer::Gru(GruCell::new(input_size, hidden_size)),
        }
    }

    /// Zeroed state for the start of a sequence
    pub fn init_state(&self) -> LayerState {
        match self {
            RecurrentLayer::Lstm(cell) => LayerState {
                hidden: Array1::zeros(cell.hidden_size),
                cell: Some(Array1::zeros(cell.hidden_size)),
            },
            RecurrentLayer::Gru(cell) => LayerState {
                hidden: Array1::zeros(cell.hidden_size),
                cell: None,
            },
        }
    }

    /// Advance the layer one time step, updating the state in place
    pub fn step(&self, x: &Array1<f64>, state: &mut LayerState) {
        match self {
            RecurrentLayer::Lstm(cell) => {
                let carry = state
                    .cell
                    .take()
                    .unwrap_or_else(|| Array1::zeros(cell.hidden_size));
                let (hidden, carry) = cell.step(x, &state.hidden, &carry);
                state.hidden = hidden;
                state.cell = Some(carry);
            }
            RecurrentLayer::Gru(cell) => {
                state.hidden = cell.step(x, &state.hidden);
            }
        }
    }
}

/// LSTM cell with input, forget, candidate and output gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmCell {
    pub input_size: usize,
    pub hidden_size: usize,

    // input gate
    w_ii: Array2<f64>,
    w_hi: Array2<f64>,
    b_i: Array1<f64>,

    // forget gate
    w_if: Array2<f64>,
    w_hf: Array2<f64>,
    b_f: Array1<f64>,

    // cell candidate
    w_ig: Array2<f64>,
    w_hg: Array2<f64>,
    b_g: Array1<f64>,

    // output gate
    w_io: Array2<f64>,
    w_ho: Array2<f64>,
    b_o: Array1<f64>,
}

impl LstmCell {
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let input_weights = || Array2::random((hidden_size, input_size), Uniform::new(-limit, limit));
        let hidden_weights =
            || Array2::random((hidden_size, hidden_size), Uniform::new(-limit, limit));

        Self {
            input_size,
            hidden_size,
            w_ii: input_weights(),
            w_hi: hidden_weights(),
            b_i: Array1::zeros(hidden_size),
            w_if: input_weights(),
            w_hf: hidden_weights(),
            // Forget bias starts at one
            b_f: Array1::from_elem(hidden_size, 1.0),
            w_ig: input_weights(),
            w_hg: hidden_weights(),
            b_g: Array1::zeros(hidden_size),
            w_io: input_weights(),
            w_ho: hidden_weights(),
            b_o: Array1::zeros(hidden_size),
        }
    }

    /// One time step: returns the new hidden and cell states
    pub fn step(
        &self,
        x: &Array1<f64>,
        h_prev: &Array1<f64>,
        c_prev: &Array1<f64>,
    ) -> (Array1<f64>, Array1<f64>) {
        // i = sigmoid(W_ii x + W_hi h + b_i)
        let i_gate = sigmoid(&(self.w_ii.dot(x) + self.w_hi.dot(h_prev) + &self.b_i));
        // f = sigmoid(W_if x + W_hf h + b_f)
        let f_gate = sigmoid(&(self.w_if.dot(x) + self.w_hf.dot(h_prev) + &self.b_f));
        // g = tanh(W_ig x + W_hg h + b_g)
        let g = tanh(&(self.w_ig.dot(x) + self.w_hg.dot(h_prev) + &self.b_g));
        // o = sigmoid(W_io x + W_ho h + b_o)
        let o_gate = sigmoid(&(self.w_io.dot(x) + self.w_ho.dot(h_prev) + &self.b_o));

        // c' = f * c + i * g, h' = o * tanh(c')
        let c_next = &f_gate * c_prev + &i_gate * &g;
        let h_next = &o_gate * &tanh(&c_next);

        (h_next, c_next)
    }
}

/// GRU cell with update and reset gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GruCell {
    pub input_size: usize,
    pub hidden_size: usize,

    // update gate
    w_iz: Array2<f64>,
    w_hz: Array2<f64>,
    b_z: Array1<f64>,

    // reset gate
    w_ir: Array2<f64>,
    w_hr: Array2<f64>,
    b_r: Array1<f64>,

    // candidate
    w_in: Array2<f64>,
    w_hn: Array2<f64>,
    b_n: Array1<f64>,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize) -> Self {
        let limit = (1.0 / hidden_size as f64).sqrt();
        let input_weights = || Array2::random((hidden_size, input_size), Uniform::new(-limit, limit));
        let hidden_weights =
            || Array2::random((hidden_size, hidden_size), Uniform::new(-limit, limit));

        Self {
            input_size,
            hidden_size,
            w_iz: input_weights(),
            w_hz: hidden_weights(),
            b_z: Array1::zeros(hidden_size),
            w_ir: input_weights(),
            w_hr: hidden_weights(),
            b_r: Array1::zeros(hidden_size),
            w_in: input_weights(),
            w_hn: hidden_weights(),
            b_n: Array1::zeros(hidden_size),
        }
    }

    /// One time step: returns the new hidden state
    pub fn step(&self, x: &Array1<f64>, h_prev: &Array1<f64>) -> Array1<f64> {
        // z = sigmoid(W_iz x + W_hz h + b_z)
        let z_gate = sigmoid(&(self.w_iz.dot(x) + self.w_hz.dot(h_prev) + &self.b_z));
        // r = sigmoid(W_ir x + W_hr h + b_r)
        let r_gate = sigmoid(&(self.w_ir.dot(x) + self.w_hr.dot(h_prev) + &self.b_r));
        // n = tanh(W_in x + W_hn (r * h) + b_n)
        let candidate = tanh(&(self.w_in.dot(x) + self.w_hn.dot(&(&r_gate * h_prev)) + &self.b_n));

        // h' = (1 - z) * n + z * h
        let one_minus_z: Array1<f64> = z_gate.mapv(|v| 1.0 - v);
        &one_minus_z * &candidate + &z_gate * h_prev
    }
}

/// Linear readout layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dense {
    pub weights: Array2<f64>,
    pub biases: Array1<f64>,
}

impl Dense {
    pub fn new(input_size: usize, output_size: usize) -> Self {
        let limit = (1.0 / input_size as f64).sqrt();
        Self {
            weights: Array2::random((output_size, input_size), Uniform::new(-limit, limit)),
            biases: Array1::zeros(output_size),
        }
    }

    pub fn forward(&self, x: &Array1<f64>) -> Array1<f64> {
        self.weights.dot(x) + &self.biases
    }
}

fn sigmoid(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

fn tanh(x: &Array1<f64>) -> Array1<f64> {
    x.mapv(|v| v.tanh())
}
