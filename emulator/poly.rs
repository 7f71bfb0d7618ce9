//! Polynomial representation of a P1D measurement.
//!
//! A record's power spectrum is summarized as a degree-`d` polynomial in
//! ln k fitted to ln P1D over a wavenumber window. The same type also serves
//! as the reconstruction vehicle when the coefficients come from an emulator
//! prediction instead of a direct fit.

use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::LeastSquaresSvd;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolyFitError {
    #[error(
        "A degree-{degree} fit needs at least {needed} usable points inside the window, found {found}."
    )]
    NotEnoughPoints {
        degree: usize,
        needed: usize,
        found: usize,
    },

    #[error("Least-squares solve failed during the polynomial fit: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),
}

/// Degree-`d` polynomial in ln k describing ln P1D.
///
/// Coefficients are stored highest power first, the same convention the
/// linear-interpolation emulator assembles its predicted vectors in.
#[derive(Debug, Clone)]
pub struct P1dPolynomial {
    coeffs: Array1<f64>,
    kmin_mpc: f64,
}

impl P1dPolynomial {
    /// Fits ln P1D against ln k over `[kmin_mpc, kmax_mpc]`. Only points with
    /// positive wavenumber and positive power enter the fit.
    pub fn fit(
        k_mpc: ArrayView1<f64>,
        p1d_mpc: ArrayView1<f64>,
        kmin_mpc: f64,
        kmax_mpc: f64,
        degree: usize,
    ) -> Result<Self, PolyFitError> {
        let mut ln_k = Vec::new();
        let mut ln_p = Vec::new();
        for (&k, &p) in k_mpc.iter().zip(p1d_mpc.iter()) {
            if k > 0.0 && p > 0.0 && k >= kmin_mpc && k <= kmax_mpc {
                ln_k.push(k.ln());
                ln_p.push(p.ln());
            }
        }

        let needed = degree + 1;
        if ln_k.len() < needed {
            return Err(PolyFitError::NotEnoughPoints {
                degree,
                needed,
                found: ln_k.len(),
            });
        }

        // Vandermonde design, highest power first.
        let design = Array2::from_shape_fn((ln_k.len(), needed), |(i, j)| {
            ln_k[i].powi((degree - j) as i32)
        });
        let rhs = Array1::from_vec(ln_p);
        let solution = design.least_squares(&rhs)?.solution;

        Ok(P1dPolynomial {
            coeffs: solution,
            kmin_mpc,
        })
    }

    /// Reconstruction mode: wraps a coefficient vector produced elsewhere
    /// (typically an emulator prediction), highest power first.
    pub fn from_coefficients(coeffs: Array1<f64>, kmin_mpc: f64) -> Self {
        P1dPolynomial { coeffs, kmin_mpc }
    }

    /// Fitted coefficients, highest power first.
    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coeffs.view()
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Lower edge of the fit window.
    pub fn kmin_mpc(&self) -> f64 {
        self.kmin_mpc
    }

    fn ln_p1d(&self, ln_k: f64) -> f64 {
        // Horner evaluation, highest power first.
        self.coeffs.iter().fold(0.0, |acc, &c| acc * ln_k + c)
    }

    /// Reconstructs `P1D(k) = exp(poly(ln k))` at the requested wavenumbers.
    /// Valid input domain is the positive reals.
    pub fn p1d_mpc(&self, k_mpc: ArrayView1<f64>) -> Array1<f64> {
        k_mpc.mapv(|k| self.ln_p1d(k.ln()).exp())
    }
}
