//! Unit-hypercube rescaling of the physical parameter space.
//!
//! Kernels and hull tests operate on parameters mapped into [0, 1] using
//! per-parameter (min, max) limits, either derived from the training grid or
//! supplied externally as a prior volume.

use crate::params::EmuParam;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RescaleError {
    #[error(
        "Parameter '{0}' has zero range across the training set; unit-volume rescaling is undefined."
    )]
    DegenerateParameter(String),
}

/// Per-parameter (min, max) table, one row per selected parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterLimits {
    table: Array2<f64>,
}

impl ParameterLimits {
    /// Column-wise min/max of a parameter grid.
    pub fn from_grid(grid: ArrayView2<f64>) -> Self {
        let mut table = Array2::zeros((grid.ncols(), 2));
        for (j, column) in grid.columns().into_iter().enumerate() {
            let lo = column.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            table[[j, 0]] = lo;
            table[[j, 1]] = hi;
        }
        ParameterLimits { table }
    }

    /// Externally supplied prior volume, shape (n_params, 2).
    pub fn from_table(table: Array2<f64>) -> Self {
        assert_eq!(table.ncols(), 2, "limits table must have (min, max) columns");
        ParameterLimits { table }
    }

    pub fn n_params(&self) -> usize {
        self.table.nrows()
    }

    pub fn min(&self, j: usize) -> f64 {
        self.table[[j, 0]]
    }

    pub fn max(&self, j: usize) -> f64 {
        self.table[[j, 1]]
    }

    /// Fails if any selected parameter has `max <= min`.
    pub fn check_nondegenerate(&self, params: &[EmuParam]) -> Result<(), RescaleError> {
        for (j, param) in params.iter().enumerate() {
            if self.max(j) <= self.min(j) {
                return Err(RescaleError::DegenerateParameter(param.as_str().to_string()));
            }
        }
        Ok(())
    }

    pub fn rescale_value(&self, j: usize, x: f64) -> f64 {
        (x - self.min(j)) / (self.max(j) - self.min(j))
    }

    pub fn rescale_point(&self, point: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_iter(
            point
                .iter()
                .enumerate()
                .map(|(j, &x)| self.rescale_value(j, x)),
        )
    }

    /// Rescales every row of a grid in place.
    pub fn rescale_grid_inplace(&self, grid: &mut Array2<f64>) {
        for mut row in grid.rows_mut() {
            for (j, x) in row.iter_mut().enumerate() {
                *x = self.rescale_value(j, *x);
            }
        }
    }

    /// Inverse mapping, for diagnostics.
    pub fn unscale_point(&self, unit: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_iter(
            unit.iter()
                .enumerate()
                .map(|(j, &u)| self.min(j) + u * (self.max(j) - self.min(j))),
        )
    }
}
