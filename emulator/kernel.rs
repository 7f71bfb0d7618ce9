//! Composite covariance for the Gaussian-process emulator.
//!
//! The kernel is a sum of a linear term and a squared-exponential (RBF) term,
//! each with either one shared scale or one scale per input dimension when
//! the asymmetric option is enabled. Hyperparameters travel in two forms: a
//! flat natural-space vector (the persisted representation) and its
//! elementwise logarithm (the optimizer's search space).

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Hyperparameter vector has {found} entries, expected {expected}.")]
    HyperparameterCount { expected: usize, found: usize },

    #[error("Hyperparameter '{0}' must be positive and finite.")]
    NonPositiveHyperparameter(&'static str),
}

/// Linear + RBF covariance with observation noise.
#[derive(Debug, Clone)]
pub struct CompositeKernel {
    /// Linear-term variances: one entry, or one per dimension.
    linear_variances: Array1<f64>,
    rbf_variance: f64,
    /// RBF length scales: one entry, or one per dimension.
    rbf_lengthscales: Array1<f64>,
    noise_var: f64,
    dim: usize,
    asymmetric: bool,
}

impl CompositeKernel {
    /// Unit variances and length scales; the usual pre-training state.
    pub fn initial(dim: usize, asymmetric: bool, noise_var: f64) -> Self {
        let scale_count = if asymmetric { dim } else { 1 };
        CompositeKernel {
            linear_variances: Array1::ones(scale_count),
            rbf_variance: 1.0,
            rbf_lengthscales: Array1::ones(scale_count),
            noise_var,
            dim,
            asymmetric,
        }
    }

    pub fn noise_var(&self) -> f64 {
        self.noise_var
    }

    /// Flat vector length for a given dimensionality and symmetry choice.
    pub fn n_hyperparams(dim: usize, asymmetric: bool) -> usize {
        let scale_count = if asymmetric { dim } else { 1 };
        2 * scale_count + 2
    }

    /// Natural-space layout: linear variances, RBF variance, RBF length
    /// scales, noise variance.
    pub fn to_vector(&self) -> Array1<f64> {
        let mut packed = Vec::with_capacity(Self::n_hyperparams(self.dim, self.asymmetric));
        packed.extend(self.linear_variances.iter());
        packed.push(self.rbf_variance);
        packed.extend(self.rbf_lengthscales.iter());
        packed.push(self.noise_var);
        Array1::from_vec(packed)
    }

    pub fn from_vector(
        packed: ArrayView1<f64>,
        dim: usize,
        asymmetric: bool,
    ) -> Result<Self, KernelError> {
        let expected = Self::n_hyperparams(dim, asymmetric);
        if packed.len() != expected {
            return Err(KernelError::HyperparameterCount {
                expected,
                found: packed.len(),
            });
        }
        let scale_count = if asymmetric { dim } else { 1 };
        let linear_variances = packed.slice(ndarray::s![..scale_count]).to_owned();
        let rbf_variance = packed[scale_count];
        let rbf_lengthscales = packed
            .slice(ndarray::s![scale_count + 1..2 * scale_count + 1])
            .to_owned();
        let noise_var = packed[2 * scale_count + 1];

        if linear_variances.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(KernelError::NonPositiveHyperparameter("linear variance"));
        }
        if !rbf_variance.is_finite() || rbf_variance <= 0.0 {
            return Err(KernelError::NonPositiveHyperparameter("rbf variance"));
        }
        if rbf_lengthscales.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(KernelError::NonPositiveHyperparameter("rbf length scale"));
        }
        if !noise_var.is_finite() || noise_var <= 0.0 {
            return Err(KernelError::NonPositiveHyperparameter("noise variance"));
        }

        Ok(CompositeKernel {
            linear_variances,
            rbf_variance,
            rbf_lengthscales,
            noise_var,
            dim,
            asymmetric,
        })
    }

    pub fn to_log_vector(&self) -> Array1<f64> {
        self.to_vector().mapv(f64::ln)
    }

    /// Rebuilds from the optimizer's log-space point. Entries are clamped
    /// before exponentiation so the result is always positive and finite;
    /// the length is trusted from `to_log_vector`.
    pub fn from_log_vector(log_packed: ArrayView1<f64>, dim: usize, asymmetric: bool) -> Self {
        let packed = log_packed.mapv(|v| v.clamp(-700.0, 700.0).exp());
        Self::from_vector(packed.view(), dim, asymmetric)
            .expect("clamped log-space vector is positive and finite by construction")
    }

    fn scale(values: &Array1<f64>, i: usize) -> f64 {
        if values.len() == 1 { values[0] } else { values[i] }
    }

    /// Covariance between two points, noise excluded.
    pub fn value(&self, x: ArrayView1<f64>, y: ArrayView1<f64>) -> f64 {
        let mut linear = 0.0;
        let mut sq_dist = 0.0;
        for i in 0..self.dim {
            linear += Self::scale(&self.linear_variances, i) * x[i] * y[i];
            let scaled = (x[i] - y[i]) / Self::scale(&self.rbf_lengthscales, i);
            sq_dist += scaled * scaled;
        }
        linear + self.rbf_variance * (-0.5 * sq_dist).exp()
    }

    pub fn diag_value(&self, x: ArrayView1<f64>) -> f64 {
        self.value(x, x)
    }

    /// Training covariance matrix, with noise on the diagonal.
    pub fn matrix(&self, grid: ArrayView2<f64>) -> Array2<f64> {
        let n = grid.nrows();
        let mut k = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let v = self.value(grid.row(i), grid.row(j));
                k[[i, j]] = v;
                k[[j, i]] = v;
            }
            k[[i, i]] += self.noise_var;
        }
        k
    }

    /// Covariance vector between every training row and one query point.
    pub fn cross(&self, grid: ArrayView2<f64>, x: ArrayView1<f64>) -> Array1<f64> {
        Array1::from_iter(grid.rows().into_iter().map(|row| self.value(row, x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, array};

    #[test]
    fn vector_roundtrip_preserves_hyperparameters() {
        let kernel = CompositeKernel::initial(3, true, 1e-3);
        let packed = kernel.to_vector();
        assert_eq!(packed.len(), CompositeKernel::n_hyperparams(3, true));
        let rebuilt = CompositeKernel::from_vector(packed.view(), 3, true).unwrap();
        assert_abs_diff_eq!(rebuilt.noise_var(), 1e-3, epsilon = 1e-15);
        assert_eq!(rebuilt.to_vector(), packed);
    }

    #[test]
    fn log_space_roundtrip() {
        let kernel = CompositeKernel::initial(2, false, 1e-3);
        let rebuilt = CompositeKernel::from_log_vector(kernel.to_log_vector().view(), 2, false);
        for (&a, &b) in kernel.to_vector().iter().zip(rebuilt.to_vector().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn wrong_length_vector_is_rejected() {
        let err = CompositeKernel::from_vector(array![1.0, 1.0].view(), 3, true).unwrap_err();
        match err {
            KernelError::HyperparameterCount { expected, found } => {
                assert_eq!(expected, 8);
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn matrix_is_symmetric_with_noise_on_diagonal() {
        let grid = arr2(&[[0.0, 0.0], [0.5, 0.2], [1.0, 1.0]]);
        let kernel = CompositeKernel::initial(2, false, 0.01);
        let k = kernel.matrix(grid.view());
        for i in 0..3 {
            for j in 0..3 {
                assert_abs_diff_eq!(k[[i, j]], k[[j, i]], epsilon = 1e-14);
            }
            assert_abs_diff_eq!(
                k[[i, i]],
                kernel.diag_value(grid.row(i)) + 0.01,
                epsilon = 1e-14
            );
        }
    }

    #[test]
    fn rbf_term_decays_with_distance() {
        let kernel = CompositeKernel::initial(1, false, 1e-3);
        let near = kernel.value(array![0.0].view(), array![0.1].view());
        let far = kernel.value(array![0.0].view(), array![0.9].view());
        // Linear term vanishes at the origin, so this is pure RBF decay.
        assert!(near > far);
    }
}
