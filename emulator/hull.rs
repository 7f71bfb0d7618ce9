//! Convex boundary of the training grid, used to flag extrapolation.
//!
//! The hull is held as an intersection of supporting halfspaces `a^T x <= b`
//! generated from a deterministic bank of directions: the signed coordinate
//! axes plus quasi-random unit vectors. Support offsets are taken over the
//! full training grid, so every training point is inside by construction.
//! This is an outer approximation of the exact hull, which is the right bias
//! for an advisory diagnostic: a point flagged outside is certainly outside.

use ndarray::{Array1, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HullError {
    #[error(
        "A convex hull over {points} points in {dim} dimensions is degenerate; at least {} points are required.",
        .dim + 1
    )]
    InsufficientPoints { points: usize, dim: usize },
}

/// Membership oracle over the training parameter grid.
#[derive(Debug, Clone)]
pub struct TrainingHull {
    /// Each facet as (unit normal, support offset): inside means a^T x <= b.
    facets: Vec<(Array1<f64>, f64)>,
    dim: usize,
}

impl TrainingHull {
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether the query lies inside every supporting halfspace.
    pub fn contains(&self, x: ArrayView1<f64>) -> bool {
        self.facets.iter().all(|(a, b)| a.dot(&x) <= *b + 1e-12)
    }
}

/// Builds the supporting-halfspace hull of a point grid (one row per point).
pub fn build_hull(grid: ArrayView2<f64>) -> Result<TrainingHull, HullError> {
    let n = grid.nrows();
    let dim = grid.ncols();
    if n < dim + 1 {
        return Err(HullError::InsufficientPoints { points: n, dim });
    }

    let mut facets = Vec::new();
    for direction in direction_bank(dim, 8 * dim) {
        let support = grid
            .rows()
            .into_iter()
            .map(|row| direction.dot(&row))
            .fold(f64::NEG_INFINITY, f64::max);
        facets.push((direction, support));
    }

    Ok(TrainingHull { facets, dim })
}

/// Deterministic direction bank: the signed standard basis plus `extra`
/// unit vectors drawn from a splitmix-style integer mixer.
fn direction_bank(dim: usize, extra: usize) -> Vec<Array1<f64>> {
    let mut directions = Vec::with_capacity(2 * dim + extra);
    for i in 0..dim {
        let mut plus = Array1::zeros(dim);
        plus[i] = 1.0;
        directions.push(plus);
        let mut minus = Array1::zeros(dim);
        minus[i] = -1.0;
        directions.push(minus);
    }

    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = || {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    };

    for k in 0..extra {
        let mut v = Array1::zeros(dim);
        for value in v.iter_mut() {
            // Uniform in [-1, 1).
            *value = (next() as f64) / (u64::MAX as f64) * 2.0 - 1.0;
        }
        let norm = v.dot(&v).sqrt();
        if norm > 1e-12 {
            directions.push(v / norm);
        } else {
            let mut axis = Array1::zeros(dim);
            axis[k % dim] = 1.0;
            directions.push(axis);
        }
    }
    directions
}
