//! Natural cubic spline on an ascending knot grid.
//!
//! Used to carry per-bin predictions (and their uncertainties) from the fixed
//! training wavenumber grid onto arbitrary requested wavenumbers. Queries
//! beyond the knot range evaluate the end segment's cubic, so k-space
//! extrapolation stays non-fatal.

use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SplineError {
    #[error("A cubic spline needs at least 2 knots, found {0}.")]
    TooFewKnots(usize),

    #[error("Spline knots must be strictly ascending.")]
    NonAscendingKnots,

    #[error("Spline knot and value sequences differ in length ({n_x} vs {n_y}).")]
    MismatchedLengths { n_x: usize, n_y: usize },
}

#[derive(Debug, Clone)]
pub struct CubicSpline {
    x: Array1<f64>,
    y: Array1<f64>,
    /// Second derivatives at the knots; zero at both ends (natural spline).
    y2: Array1<f64>,
}

impl CubicSpline {
    pub fn fit(x: ArrayView1<f64>, y: ArrayView1<f64>) -> Result<Self, SplineError> {
        let n = x.len();
        if n != y.len() {
            return Err(SplineError::MismatchedLengths {
                n_x: n,
                n_y: y.len(),
            });
        }
        if n < 2 {
            return Err(SplineError::TooFewKnots(n));
        }
        if x.windows(2).into_iter().any(|w| w[1] <= w[0]) {
            return Err(SplineError::NonAscendingKnots);
        }

        let mut y2 = Array1::zeros(n);
        if n > 2 {
            // Tridiagonal solve for the interior second derivatives.
            let mut sub = vec![0.0; n];
            let mut diag = vec![0.0; n];
            let mut sup = vec![0.0; n];
            let mut rhs = vec![0.0; n];
            for i in 1..n - 1 {
                let h_lo = x[i] - x[i - 1];
                let h_hi = x[i + 1] - x[i];
                sub[i] = h_lo;
                diag[i] = 2.0 * (h_lo + h_hi);
                sup[i] = h_hi;
                rhs[i] = 6.0 * ((y[i + 1] - y[i]) / h_hi - (y[i] - y[i - 1]) / h_lo);
            }
            // Thomas forward sweep over rows 1..n-1.
            for i in 2..n - 1 {
                let w = sub[i] / diag[i - 1];
                diag[i] -= w * sup[i - 1];
                rhs[i] -= w * rhs[i - 1];
            }
            y2[n - 2] = rhs[n - 2] / diag[n - 2];
            for i in (1..n - 2).rev() {
                y2[i] = (rhs[i] - sup[i] * y2[i + 1]) / diag[i];
            }
        }

        Ok(CubicSpline {
            x: x.to_owned(),
            y: y.to_owned(),
            y2,
        })
    }

    /// Evaluates the spline; out-of-range queries use the end segment.
    pub fn eval(&self, xq: f64) -> f64 {
        let n = self.x.len();
        // Segment index: last i with x[i] <= xq, clamped to [0, n-2].
        let below = self.x.iter().take_while(|&&v| v <= xq).count();
        let seg = below.saturating_sub(1).min(n - 2);
        let h = self.x[seg + 1] - self.x[seg];
        let a = (self.x[seg + 1] - xq) / h;
        let b = (xq - self.x[seg]) / h;
        a * self.y[seg]
            + b * self.y[seg + 1]
            + ((a * a * a - a) * self.y2[seg] + (b * b * b - b) * self.y2[seg + 1]) * h * h / 6.0
    }

    pub fn eval_many(&self, xq: ArrayView1<f64>) -> Array1<f64> {
        xq.mapv(|v| self.eval(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn spline_reproduces_knot_values() {
        let x = array![0.1, 0.4, 0.9, 1.7, 2.2];
        let y = array![3.0, 1.5, 0.8, 0.4, 0.3];
        let spline = CubicSpline::fit(x.view(), y.view()).unwrap();
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            assert_abs_diff_eq!(spline.eval(xi), yi, epsilon = 1e-12);
        }
    }

    #[test]
    fn spline_is_exact_on_linear_data() {
        let x = Array1::linspace(0.0, 4.0, 9);
        let y = x.mapv(|v| 2.5 * v - 1.0);
        let spline = CubicSpline::fit(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(spline.eval(1.3), 2.5 * 1.3 - 1.0, epsilon = 1e-10);
        assert_abs_diff_eq!(spline.eval(3.9), 2.5 * 3.9 - 1.0, epsilon = 1e-10);
    }

    #[test]
    fn out_of_range_queries_use_the_end_segment() {
        let x = array![0.0, 1.0, 2.0];
        let y = array![0.0, 1.0, 2.0];
        let spline = CubicSpline::fit(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(spline.eval(2.5), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn two_knots_degenerate_to_linear_interpolation() {
        let spline = CubicSpline::fit(array![0.0, 2.0].view(), array![1.0, 5.0].view()).unwrap();
        assert_abs_diff_eq!(spline.eval(1.0), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn unsorted_knots_are_rejected() {
        let err =
            CubicSpline::fit(array![0.0, 2.0, 1.0].view(), array![1.0, 2.0, 3.0].view())
                .unwrap_err();
        assert!(matches!(err, SplineError::NonAscendingKnots));
    }
}
