//! Packing and unpacking of recurrent state handles.
//!
//! The rest of the decoder threads a single opaque `[batch, hidden * n_states]`
//! tensor between steps. Single-state cells use it as-is; dual-state cells
//! store hidden and cell memory side by side along the feature axis, hidden
//! first.

use anyhow::{ensure, Result};
use ndarray::{concatenate, s, Array2, Axis};

use super::CellType;

/// A recurrent cell's native state, decoded from a packed handle.
#[derive(Debug, Clone)]
pub enum CellState {
    Single(Array2<f32>),
    Dual {
        hidden: Array2<f32>,
        cell: Array2<f32>,
    },
}

impl CellState {
    /// Splits a packed handle into the cell's native components.
    pub fn unpack(handle: &Array2<f32>, cell_type: CellType, hidden_size: usize) -> Result<Self> {
        let expected = hidden_size * cell_type.n_states();
        ensure!(
            handle.ncols() == expected,
            "state handle width {} does not match {} * {} states",
            handle.ncols(),
            hidden_size,
            cell_type.n_states()
        );

        match cell_type {
            CellType::Gru => Ok(CellState::Single(handle.clone())),
            CellType::Lstm => Ok(CellState::Dual {
                hidden: handle.slice(s![.., ..hidden_size]).to_owned(),
                cell: handle.slice(s![.., hidden_size..]).to_owned(),
            }),
        }
    }

    /// Concatenates the native components back into a packed handle.
    ///
    /// Exact inverse of [`CellState::unpack`].
    pub fn pack(&self) -> Array2<f32> {
        match self {
            CellState::Single(h) => h.clone(),
            CellState::Dual { hidden, cell } => {
                concatenate![Axis(1), hidden.view(), cell.view()]
            }
        }
    }

    /// The state component that drives attention and the output path.
    pub fn primary(&self) -> &Array2<f32> {
        match self {
            CellState::Single(h) => h,
            CellState::Dual { hidden, .. } => hidden,
        }
    }

    pub fn batch(&self) -> usize {
        self.primary().nrows()
    }
}
