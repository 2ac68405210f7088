//! Recurrent cells and their packed-state codec.

mod cell;
mod state;

use std::str::FromStr;

use anyhow::{ensure, Result};
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub use cell::{GruCell, LstmCell};
pub use state::CellState;

/// Which recurrent cell variant a decoder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Gru,
    Lstm,
}

impl CellType {
    /// How many state tensors the cell carries (1 for GRU, 2 for LSTM).
    pub fn n_states(&self) -> usize {
        match self {
            CellType::Gru => 1,
            CellType::Lstm => 2,
        }
    }
}

impl FromStr for CellType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gru" => Ok(CellType::Gru),
            "lstm" => Ok(CellType::Lstm),
            _ => Err(format!("unknown rnn cell type: {}", s)),
        }
    }
}

/// A recurrent cell, dispatched over the closed set of variants.
pub enum RnnCell {
    Gru(GruCell),
    Lstm(LstmCell),
}

impl RnnCell {
    pub fn random<R: Rng>(
        cell_type: CellType,
        input_size: usize,
        hidden_size: usize,
        rng: &mut R,
    ) -> Self {
        match cell_type {
            CellType::Gru => RnnCell::Gru(GruCell::random(input_size, hidden_size, rng)),
            CellType::Lstm => RnnCell::Lstm(LstmCell::random(input_size, hidden_size, rng)),
        }
    }

    pub fn cell_type(&self) -> CellType {
        match self {
            RnnCell::Gru(_) => CellType::Gru,
            RnnCell::Lstm(_) => CellType::Lstm,
        }
    }

    pub fn input_size(&self) -> usize {
        match self {
            RnnCell::Gru(c) => c.input_size(),
            RnnCell::Lstm(c) => c.input_size(),
        }
    }

    pub fn hidden_size(&self) -> usize {
        match self {
            RnnCell::Gru(c) => c.hidden_size(),
            RnnCell::Lstm(c) => c.hidden_size(),
        }
    }

    /// Advances the cell by one step, consuming the previous native state.
    pub fn step(&self, input: &Array2<f32>, state: &CellState) -> Result<CellState> {
        ensure!(
            input.ncols() == self.input_size(),
            "cell expects {} input features, got {}",
            self.input_size(),
            input.ncols()
        );
        ensure!(
            input.nrows() == state.batch(),
            "cell input batch {} does not match state batch {}",
            input.nrows(),
            state.batch()
        );

        match (self, state) {
            (RnnCell::Gru(cell), CellState::Single(h)) => {
                Ok(CellState::Single(cell.step(input, h)))
            }
            (RnnCell::Lstm(cell), CellState::Dual { hidden, cell: c }) => {
                let (h_next, c_next) = cell.step(input, hidden, c);
                Ok(CellState::Dual {
                    hidden: h_next,
                    cell: c_next,
                })
            }
            _ => anyhow::bail!("state variant does not match cell type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_cell_type_from_str() {
        assert_eq!(CellType::from_str("gru").unwrap(), CellType::Gru);
        assert_eq!(CellType::from_str("LSTM").unwrap(), CellType::Lstm);
        assert!(CellType::from_str("rnn").is_err());
    }

    #[test]
    fn test_n_states() {
        assert_eq!(CellType::Gru.n_states(), 1);
        assert_eq!(CellType::Lstm.n_states(), 2);
    }

    #[test]
    fn test_step_threads_packed_state() {
        let mut rng = StdRng::seed_from_u64(3);
        for cell_type in [CellType::Gru, CellType::Lstm] {
            let cell = RnnCell::random(cell_type, 3, 4, &mut rng);
            let handle = Array2::<f32>::zeros((2, 4 * cell_type.n_states()));
            let state = CellState::unpack(&handle, cell_type, 4).unwrap();

            let input = Array2::from_elem((2, 3), 0.5);
            let next = cell.step(&input, &state).unwrap();
            let packed = next.pack();
            assert_eq!(packed.dim(), (2, 4 * cell_type.n_states()));
        }
    }

    #[test]
    fn test_mismatched_state_variant_fails() {
        let mut rng = StdRng::seed_from_u64(3);
        let cell = RnnCell::random(CellType::Lstm, 2, 2, &mut rng);
        let wrong = CellState::Single(array![[0.0f32, 0.0]]);
        assert!(cell.step(&array![[0.0f32, 0.0]], &wrong).is_err());
    }
}
