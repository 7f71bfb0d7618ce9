//! # Gaussian-Process P1D Emulator
//!
//! Trains a GP regression over an archive of simulated P1D measurements and
//! predicts the power spectrum (with uncertainty) for new parameter points.
//! Construction assembles the training grid, rescales it to the unit
//! hypercube and builds the convex-hull diagnostic; `train` optimizes the
//! composite-kernel hyperparameters against the GP marginal likelihood with
//! the same BFGS machinery used elsewhere in the stack; prediction rescales
//! the query through the stored limits, evaluates the posterior and undoes
//! the median normalization of the targets.

use crate::archive::{Archive, ArchiveError, ArchiveFilters};
use crate::hull::{HullError, TrainingHull, build_hull};
use crate::kernel::{CompositeKernel, KernelError};
use crate::params::{EmuParam, ModelPoint, ParamError, TargetRepresentation};
use crate::persist::{self, EmulatorFingerprint, PersistError, SaveOutcome};
use crate::poly::{P1dPolynomial, PolyFitError};
use crate::rescale::{ParameterLimits, RescaleError};
use crate::spline::{CubicSpline, SplineError};
use ndarray::{Array1, Array2, ArrayView1, aview1};
use ndarray_linalg::{Cholesky, Inverse, UPLO};
use std::path::{Path, PathBuf};
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Degree of the per-record polynomial fit backing the polyfit targets.
const POLYFIT_DEGREE: usize = 4;
/// Lower edge of the polynomial fit window, in 1/Mpc.
const POLYFIT_KMIN_MPC: f64 = 1e-3;

/// Cost returned to the optimizer when a trial kernel is not positive
/// definite or the likelihood is otherwise unusable.
const UNUSABLE_COST: f64 = 1e10;
/// Log-space clamp keeping trial hyperparameters in a sane range.
const LOG_HYPERPARAM_BOUND: f64 = 10.0;

/// A comprehensive error type for emulator construction, training,
/// prediction and persistence.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Rescale(#[from] RescaleError),

    #[error(transparent)]
    Hull(#[from] HullError),

    #[error(transparent)]
    PolyFit(#[from] PolyFitError),

    #[error(transparent)]
    Spline(#[from] SplineError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("A linear algebra routine failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error("The predictor has not been trained; call train() or load a saved state first.")]
    Untrained,

    #[error(
        "The predictor is already trained; construct a fresh emulator to retrain or reload."
    )]
    AlreadyTrained,

    #[error(
        "Emulators built on caller-supplied or size-capped archives cannot be {0}; the exact training set is not reproducible from the base directory."
    )]
    NonStandardArchive(&'static str),

    #[error("Fewer than two wavenumber bins lie below kmax = {0} 1/Mpc.")]
    NoUsableBins(f64),

    #[error("Record {index} has {found} wavenumber bins, but the training grid needs {needed}.")]
    ShortRecord {
        index: usize,
        needed: usize,
        found: usize,
    },

    #[error("An ensemble needs at least one member emulator.")]
    EmptyEnsemble,
}

/// Construction-time configuration for [`GpEmulator`].
#[derive(Debug, Clone)]
pub struct GpConfig {
    /// Wavenumber cutoff for the training grid, in 1/Mpc.
    pub kmax_mpc: f64,
    pub emu_type: TargetRepresentation,
    /// Initial observation-noise variance of the GP.
    pub noise_var: f64,
    /// Per-dimension kernel scales instead of one shared scale.
    pub asymmetric_kernel: bool,
    /// Log a warning when a query falls outside the training hull.
    pub check_hulls: bool,
    pub param_list: Vec<EmuParam>,
    /// Externally supplied prior volume; derived from the grid when absent.
    pub param_limits: Option<ParameterLimits>,
}

impl Default for GpConfig {
    fn default() -> Self {
        GpConfig {
            kmax_mpc: 10.0,
            emu_type: TargetRepresentation::KBin,
            noise_var: 1e-3,
            asymmetric_kernel: false,
            check_hulls: false,
            param_list: EmuParam::default_list(),
            param_limits: None,
        }
    }
}

/// Posterior mean and standard deviation, de-normalized to target units.
#[derive(Debug, Clone)]
pub struct GpPrediction {
    pub values: Array1<f64>,
    pub uncertainties: Array1<f64>,
}

#[derive(Debug)]
struct TrainedGp {
    kernel: CompositeKernel,
    kinv: Array2<f64>,
    /// K^-1 Y for the normalized targets, one column per target.
    alpha: Array2<f64>,
}

#[derive(Debug)]
enum GpState {
    Untrained,
    Trained(TrainedGp),
}

/// Gaussian-process emulator over a training archive.
///
/// Each instance owns its grid, limits, hull and predictor exclusively;
/// multi-redshift ensembles construct one instance per redshift.
#[derive(Debug)]
pub struct GpEmulator {
    config: GpConfig,
    filters: ArchiveFilters,
    basedir: Option<PathBuf>,
    standard_archive: bool,
    archive: Archive,
    k_bin: usize,
    training_k_bins: Array1<f64>,
    /// Rescaled parameter grid, one row per record.
    grid: Array2<f64>,
    limits: ParameterLimits,
    /// Column-wise medians of the raw targets.
    scalefactors: Array1<f64>,
    /// Targets divided by their scalefactor, minus one.
    ynorm: Array2<f64>,
    kernel: CompositeKernel,
    hull: TrainingHull,
    state: GpState,
}

impl GpEmulator {
    /// Builds an emulator from the archive found under `basedir`.
    pub fn from_basedir(
        basedir: &Path,
        p1d_label: &str,
        skewers_label: &str,
        filters: ArchiveFilters,
        config: GpConfig,
    ) -> Result<Self, EmulatorError> {
        let archive = Archive::load(basedir, p1d_label, skewers_label, filters)?;
        let standard = archive.is_standard();
        Self::build(config, Some(basedir.to_path_buf()), standard, archive)
    }

    /// Builds an emulator on a caller-supplied archive. The result refuses
    /// to save or load persisted hyperparameters.
    pub fn from_archive(archive: Archive, config: GpConfig) -> Result<Self, EmulatorError> {
        Self::build(config, None, false, archive)
    }

    fn build(
        config: GpConfig,
        basedir: Option<PathBuf>,
        standard_archive: bool,
        archive: Archive,
    ) -> Result<Self, EmulatorError> {
        let records = archive.records();
        let n = records.len();

        // Wavenumber truncation shared by all records: keep the bins below
        // the largest index with k < kmax, exclusive of that index.
        let below = records[0]
            .k_mpc
            .iter()
            .filter(|&&k| k < config.kmax_mpc)
            .count();
        if below < 3 {
            return Err(EmulatorError::NoUsableBins(config.kmax_mpc));
        }
        let k_bin = below - 1;
        for (index, record) in records.iter().enumerate() {
            if record.k_mpc.len() < k_bin {
                return Err(EmulatorError::ShortRecord {
                    index,
                    needed: k_bin,
                    found: record.k_mpc.len(),
                });
            }
        }
        let training_k_bins = Array1::from(records[0].k_mpc[..k_bin].to_vec());

        // Target matrix: raw truncated spectra, or polynomial coefficients.
        let targets = match config.emu_type {
            TargetRepresentation::KBin => {
                Array2::from_shape_fn((n, k_bin), |(i, j)| records[i].p1d_mpc[j])
            }
            TargetRepresentation::PolyFit => {
                let mut coeffs = Array2::zeros((n, POLYFIT_DEGREE + 1));
                for (i, record) in records.iter().enumerate() {
                    let fit = P1dPolynomial::fit(
                        aview1(&record.k_mpc),
                        aview1(&record.p1d_mpc),
                        POLYFIT_KMIN_MPC,
                        config.kmax_mpc,
                        POLYFIT_DEGREE,
                    )?;
                    coeffs.row_mut(i).assign(&fit.coefficients());
                }
                coeffs
            }
        };

        // Parameter grid in the order of the configured list.
        let dim = config.param_list.len();
        let mut grid = Array2::zeros((n, dim));
        for (i, record) in records.iter().enumerate() {
            let point = record.model_point();
            for (j, param) in config.param_list.iter().enumerate() {
                grid[[i, j]] = param.value_in(&point);
            }
        }

        let limits = match &config.param_limits {
            Some(limits) => limits.clone(),
            None => ParameterLimits::from_grid(grid.view()),
        };
        limits.check_nondegenerate(&config.param_list)?;
        limits.rescale_grid_inplace(&mut grid);
        log::info!("Rescaled {n} training points to the unit hypercube");

        // Median normalization of the targets.
        let scalefactors = internal::column_medians(&targets);
        let mut ynorm = targets;
        for (j, mut column) in ynorm.columns_mut().into_iter().enumerate() {
            column.mapv_inplace(|v| v / scalefactors[j] - 1.0);
        }

        let hull = build_hull(grid.view())?;
        let kernel = CompositeKernel::initial(dim, config.asymmetric_kernel, config.noise_var);
        let filters = archive.filters().clone();

        Ok(GpEmulator {
            config,
            filters,
            basedir,
            standard_archive,
            archive,
            k_bin,
            training_k_bins,
            grid,
            limits,
            scalefactors,
            ynorm,
            kernel,
            hull,
            state: GpState::Untrained,
        })
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, GpState::Trained(_))
    }

    pub fn training_k_bins(&self) -> ArrayView1<'_, f64> {
        self.training_k_bins.view()
    }

    pub fn param_list(&self) -> &[EmuParam] {
        &self.config.param_list
    }

    pub fn limits(&self) -> &ParameterLimits {
        &self.limits
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Logs the per-parameter prior volume at info level.
    pub fn log_prior_volume(&self) {
        for (j, param) in self.config.param_list.iter().enumerate() {
            log::info!(
                "{}: [{:.6}, {:.6}]",
                param,
                self.limits.min(j),
                self.limits.max(j)
            );
        }
    }

    /// The physical parameters of training record `i` as a query model.
    pub fn training_point_model(&self, i: usize) -> Option<ModelPoint> {
        self.archive.records().get(i).map(|r| r.model_point())
    }

    /// Optimizes the kernel hyperparameters against the GP marginal
    /// likelihood. Optimizer failure is logged, not raised: the emulator
    /// falls back to its initial hyperparameters and is still usable.
    pub fn train(&mut self) -> Result<(), EmulatorError> {
        if self.is_trained() {
            return Err(EmulatorError::AlreadyTrained);
        }
        log::info!("Training GP on {} points", self.grid.nrows());

        let dim = self.grid.ncols();
        let asymmetric = self.config.asymmetric_kernel;
        let grid = self.grid.clone();
        let ynorm = self.ynorm.clone();
        let initial = self.kernel.to_log_vector();

        let cost_value = move |log_theta: &Array1<f64>| -> f64 {
            let safe = log_theta.mapv(|v| v.clamp(-LOG_HYPERPARAM_BOUND, LOG_HYPERPARAM_BOUND));
            let kernel = CompositeKernel::from_log_vector(safe.view(), dim, asymmetric);
            match internal::neg_log_marginal(&grid, &ynorm, &kernel) {
                Some(cost) if cost.is_finite() => cost,
                _ => UNUSABLE_COST,
            }
        };
        let cost_and_grad = move |log_theta: &Array1<f64>| -> (f64, Array1<f64>) {
            let cost = cost_value(log_theta);
            // Central finite differences in log space.
            let step = 1e-4;
            let mut grad = Array1::zeros(log_theta.len());
            for i in 0..log_theta.len() {
                let mut hi = log_theta.clone();
                hi[i] += step;
                let mut lo = log_theta.clone();
                lo[i] -= step;
                grad[i] = (cost_value(&hi) - cost_value(&lo)) / (2.0 * step);
            }
            (cost, grad)
        };

        let best = match Bfgs::new(initial.clone(), cost_and_grad)
            .with_tolerance(1e-6)
            .with_max_iterations(500)
            .run()
        {
            Ok(BfgsSolution {
                final_point,
                final_value,
                iterations,
                ..
            }) => {
                log::info!(
                    "GP hyperparameter optimization finished in {iterations} iterations (objective {final_value:.6})"
                );
                final_point
            }
            Err(e) => {
                log::warn!(
                    "GP hyperparameter optimization did not converge ({e:?}); keeping initial hyperparameters"
                );
                initial
            }
        };
        let best = best.mapv(|v| v.clamp(-LOG_HYPERPARAM_BOUND, LOG_HYPERPARAM_BOUND));
        let kernel = CompositeKernel::from_log_vector(best.view(), dim, asymmetric);
        self.finalize(kernel)
    }

    /// Injects a flat natural-space hyperparameter vector, transitioning an
    /// untrained emulator to trained without optimization. The vector must
    /// have been optimized in the same unit volume as this training grid.
    pub fn load_hyperparams(&mut self, hyperparams: Array1<f64>) -> Result<(), EmulatorError> {
        if self.is_trained() {
            return Err(EmulatorError::AlreadyTrained);
        }
        let kernel = CompositeKernel::from_vector(
            hyperparams.view(),
            self.grid.ncols(),
            self.config.asymmetric_kernel,
        )?;
        self.finalize(kernel)
    }

    fn finalize(&mut self, kernel: CompositeKernel) -> Result<(), EmulatorError> {
        let kxx = kernel.matrix(self.grid.view());
        let kinv = kxx.inv()?;
        let alpha = kinv.dot(&self.ynorm);
        self.state = GpState::Trained(TrainedGp {
            kernel,
            kinv,
            alpha,
        });
        Ok(())
    }

    /// Rescales the query through the stored limits, reading each parameter
    /// by name in the configured order.
    fn unit_point(&self, model: &ModelPoint) -> Array1<f64> {
        Array1::from_iter(
            self.config
                .param_list
                .iter()
                .enumerate()
                .map(|(j, param)| self.limits.rescale_value(j, param.value_in(model))),
        )
    }

    /// Posterior mean and standard deviation at the training targets
    /// (k bins or polynomial coefficients, depending on the representation).
    pub fn predict(&self, model: &ModelPoint) -> Result<GpPrediction, EmulatorError> {
        let GpState::Trained(trained) = &self.state else {
            return Err(EmulatorError::Untrained);
        };
        let point = self.unit_point(model);
        if self.config.check_hulls && !self.hull.contains(point.view()) {
            log::warn!("Query point lies outside the training hull: {model:?}");
        }

        let kstar = trained.kernel.cross(self.grid.view(), point.view());
        let mean = trained.alpha.t().dot(&kstar);
        let variance = (trained.kernel.diag_value(point.view()) + trained.kernel.noise_var()
            - kstar.dot(&trained.kinv.dot(&kstar)))
        .max(0.0);
        let sigma = variance.sqrt();

        let values = (&mean + 1.0) * &self.scalefactors;
        let uncertainties = self.scalefactors.mapv(|s| sigma * s);
        Ok(GpPrediction {
            values,
            uncertainties,
        })
    }

    /// Predicted P1D at arbitrary wavenumbers.
    pub fn emulate_p1d(
        &self,
        model: &ModelPoint,
        k_mpc: ArrayView1<f64>,
    ) -> Result<Array1<f64>, EmulatorError> {
        self.emulate_inner(model, k_mpc, false)
            .map(|(values, _)| values)
    }

    /// Predicted P1D plus a fully correlated covariance: the outer product
    /// of the per-point standard deviations, a simplifying assumption
    /// rather than a derived covariance.
    pub fn emulate_p1d_with_covariance(
        &self,
        model: &ModelPoint,
        k_mpc: ArrayView1<f64>,
    ) -> Result<(Array1<f64>, Array2<f64>), EmulatorError> {
        let (values, covariance) = self.emulate_inner(model, k_mpc, true)?;
        let covariance =
            covariance.expect("covariance is always computed when requested");
        Ok((values, covariance))
    }

    fn emulate_inner(
        &self,
        model: &ModelPoint,
        k_mpc: ArrayView1<f64>,
        with_covariance: bool,
    ) -> Result<(Array1<f64>, Option<Array2<f64>>), EmulatorError> {
        let kmax_train = self.training_k_bins[self.k_bin - 1];
        if k_mpc.iter().any(|&k| k > kmax_train) {
            log::warn!(
                "Requested wavenumbers extend beyond the training grid (max {kmax_train:.4} 1/Mpc); extrapolating in k."
            );
        }
        let prediction = self.predict(model)?;

        match self.config.emu_type {
            TargetRepresentation::KBin => {
                let spline =
                    CubicSpline::fit(self.training_k_bins.view(), prediction.values.view())?;
                let values = spline.eval_many(k_mpc);
                let covariance = if with_covariance {
                    let sigma_spline = CubicSpline::fit(
                        self.training_k_bins.view(),
                        prediction.uncertainties.view(),
                    )?;
                    let sigma = sigma_spline.eval_many(k_mpc);
                    Some(internal::outer(&sigma, &sigma))
                } else {
                    None
                };
                Ok((values, covariance))
            }
            TargetRepresentation::PolyFit => {
                let poly =
                    P1dPolynomial::from_coefficients(prediction.values.clone(), POLYFIT_KMIN_MPC);
                let values = poly.p1d_mpc(k_mpc);
                let covariance = if with_covariance {
                    // Fixed first-order combination over the leading four
                    // coefficient errors; kept as documented behavior.
                    let e = prediction.uncertainties.mapv(f64::abs);
                    let sigma = values.mapv(|p| {
                        e[0] * p.powi(4) + e[1] * p.powi(3) + e[2] * p.powi(2) + e[3] * p
                    });
                    Some(internal::outer(&sigma, &sigma))
                } else {
                    None
                };
                Ok((values, covariance))
            }
        }
    }

    /// Euclidean distance, in rescaled parameter space, from the query to
    /// the closest training row. Linear scan; the grids are small.
    pub fn nearest_training_distance(&self, model: &ModelPoint) -> f64 {
        let point = self.unit_point(model);
        self.grid
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(point.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt()
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// The configuration fingerprint identifying persisted states.
    pub fn fingerprint(&self) -> EmulatorFingerprint {
        EmulatorFingerprint {
            k_bin: self.k_bin,
            emu_type: self.config.emu_type,
            emu_noise: self.config.noise_var,
            drop_tau_rescalings: self.filters.drop_tau_rescalings,
            drop_temp_rescalings: self.filters.drop_temp_rescalings,
            keep_every_other_rescaling: self.filters.keep_every_other_rescaling,
            undersample_z: self.filters.undersample_z,
            param_list: self.config.param_list.clone(),
            asymmetric_kernel: self.config.asymmetric_kernel,
            z_max: self.filters.z_max,
        }
    }

    /// Persists the trained hyperparameters next to the archive, unless an
    /// identical configuration is already saved.
    pub fn save(&self) -> Result<SaveOutcome, EmulatorError> {
        if !self.standard_archive {
            return Err(EmulatorError::NonStandardArchive("saved"));
        }
        let GpState::Trained(trained) = &self.state else {
            return Err(EmulatorError::Untrained);
        };
        let basedir = self
            .basedir
            .as_ref()
            .ok_or(EmulatorError::NonStandardArchive("saved"))?;
        let outcome = persist::save_emulator(
            basedir,
            &self.fingerprint(),
            trained.kernel.to_vector().view(),
        )?;
        Ok(outcome)
    }

    /// Loads persisted hyperparameters whose fingerprint exactly matches the
    /// current configuration. Returns `false` when none match; the caller
    /// decides whether to train fresh.
    pub fn load_saved(&mut self) -> Result<bool, EmulatorError> {
        if !self.standard_archive {
            return Err(EmulatorError::NonStandardArchive("loaded"));
        }
        if self.is_trained() {
            return Err(EmulatorError::AlreadyTrained);
        }
        let basedir = self
            .basedir
            .clone()
            .ok_or(EmulatorError::NonStandardArchive("loaded"))?;
        match persist::load_emulator(&basedir, &self.fingerprint())? {
            Some(hyperparams) => {
                self.load_hyperparams(hyperparams)?;
                log::info!("Loaded emulator hyperparameters from '{}'", basedir.display());
                Ok(true)
            }
            None => {
                log::info!("No saved emulator matches the current configuration");
                Ok(false)
            }
        }
    }
}

mod internal {
    use super::*;

    /// Column-wise medians, averaging the middle pair for even counts.
    pub(super) fn column_medians(matrix: &Array2<f64>) -> Array1<f64> {
        Array1::from_iter(matrix.columns().into_iter().map(|column| {
            let mut sorted: Vec<f64> = column.to_vec();
            sorted.sort_by(f64::total_cmp);
            let n = sorted.len();
            if n % 2 == 1 {
                sorted[n / 2]
            } else {
                0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
            }
        }))
    }

    pub(super) fn outer(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
        Array2::from_shape_fn((a.len(), b.len()), |(i, j)| a[i] * b[j])
    }

    /// Negative log marginal likelihood of the normalized targets, summed
    /// over target columns (shared kernel, shared noise). `None` when the
    /// trial covariance is not positive definite.
    pub(super) fn neg_log_marginal(
        grid: &Array2<f64>,
        ynorm: &Array2<f64>,
        kernel: &CompositeKernel,
    ) -> Option<f64> {
        let kxx = kernel.matrix(grid.view());
        let chol = kxx.cholesky(UPLO::Lower).ok()?;
        let log_det = 2.0 * chol.diag().mapv(f64::ln).sum();
        let kinv = kxx.inv().ok()?;
        let alpha = kinv.dot(ynorm);
        let data_fit = (ynorm * &alpha).sum();
        let (n, m) = ynorm.dim();
        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        Some(0.5 * data_fit + 0.5 * m as f64 * log_det + 0.5 * (n * m) as f64 * ln_2pi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TrainingRecord;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn record(delta2_p: f64) -> TrainingRecord {
        let k_mpc: Vec<f64> = (1..=10).map(|i| 0.1 * i as f64).collect();
        let p1d_mpc: Vec<f64> = k_mpc.iter().map(|k| delta2_p * 10.0 / k).collect();
        TrainingRecord {
            z: 3.0,
            mean_flux: 0.66,
            delta2_p,
            n_p: -2.3,
            alpha_p: -0.21,
            sig_t_mpc: 0.13,
            f_p: 0.97,
            kf_mpc: 10.5,
            gamma: 1.4,
            k_mpc,
            p1d_mpc,
            scale_tau: 1.0,
            scale_t0: 1.0,
            scale_gamma: 1.0,
        }
    }

    fn small_config() -> GpConfig {
        GpConfig {
            kmax_mpc: 0.85,
            param_list: vec![EmuParam::Delta2P],
            ..Default::default()
        }
    }

    fn small_emulator() -> GpEmulator {
        let records = (1..=5).map(|i| record(0.1 * i as f64)).collect();
        let archive = Archive::from_records(records, ArchiveFilters::default()).unwrap();
        GpEmulator::from_archive(archive, small_config()).unwrap()
    }

    #[test]
    fn truncation_excludes_the_last_bin_below_kmax() {
        let emu = small_emulator();
        // Bins below 0.85 are 0.1..0.8 (eight); the slice drops the last.
        assert_eq!(emu.training_k_bins().len(), 7);
        assert_abs_diff_eq!(emu.training_k_bins()[6], 0.7, epsilon = 1e-12);
    }

    #[test]
    fn predict_before_training_is_an_error() {
        let emu = small_emulator();
        let model = emu.training_point_model(2).unwrap();
        assert!(matches!(
            emu.predict(&model),
            Err(EmulatorError::Untrained)
        ));
    }

    #[test]
    fn nearest_distance_is_zero_at_a_training_point() {
        let emu = small_emulator();
        let model = emu.training_point_model(0).unwrap();
        assert_abs_diff_eq!(emu.nearest_training_distance(&model), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn load_hyperparams_checks_the_vector_length() {
        let mut emu = small_emulator();
        let err = emu.load_hyperparams(array![1.0, 1.0]).unwrap_err();
        assert!(matches!(err, EmulatorError::Kernel(_)));
        assert!(!emu.is_trained());
    }

    #[test]
    fn load_hyperparams_twice_is_rejected() {
        let mut emu = small_emulator();
        let hyperparams = array![1.0, 1.0, 1.0, 1e-3];
        emu.load_hyperparams(hyperparams.clone()).unwrap();
        assert!(emu.is_trained());
        assert!(matches!(
            emu.load_hyperparams(hyperparams),
            Err(EmulatorError::AlreadyTrained)
        ));
    }

    #[test]
    fn prediction_interpolates_near_a_training_target() {
        let mut emu = small_emulator();
        emu.load_hyperparams(array![1.0, 1.0, 1.0, 1e-3]).unwrap();
        let model = emu.training_point_model(2).unwrap();
        let prediction = emu.predict(&model).unwrap();
        // Sanity bound: the smoother must stay within the overall target
        // spread at every bin.
        for (j, &value) in prediction.values.iter().enumerate() {
            let column: Vec<f64> = emu
                .archive
                .records()
                .iter()
                .map(|r| r.p1d_mpc[j])
                .collect();
            let lo = column.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert!(value > lo * 0.9 && value < hi * 1.1, "bin {j}: {value}");
        }
        assert!(prediction.uncertainties.iter().all(|u| u.is_finite()));
    }

    #[test]
    fn extrapolated_query_still_returns_numbers() {
        let mut emu = small_emulator();
        emu.load_hyperparams(array![1.0, 1.0, 1.0, 1e-3]).unwrap();
        let mut model = emu.training_point_model(0).unwrap();
        model.delta2_p = 0.9; // outside the [0.1, 0.5] training range
        let k = array![0.15, 0.3, 0.6];
        let p1d = emu.emulate_p1d(&model, k.view()).unwrap();
        assert!(p1d.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn covariance_is_the_outer_product_of_interpolated_sigmas() {
        let mut emu = small_emulator();
        emu.load_hyperparams(array![1.0, 1.0, 1.0, 1e-3]).unwrap();
        let model = emu.training_point_model(1).unwrap();
        let k = array![0.2, 0.5];
        let (_, covariance) = emu.emulate_p1d_with_covariance(&model, k.view()).unwrap();
        assert_eq!(covariance.shape(), &[2, 2]);
        // Fully correlated model: det == 0 up to rounding.
        let det = covariance[[0, 0]] * covariance[[1, 1]]
            - covariance[[0, 1]] * covariance[[1, 0]];
        assert_abs_diff_eq!(det, 0.0, epsilon = 1e-12 * covariance[[0, 0]].abs().max(1.0));
    }

    #[test]
    fn save_on_custom_archive_is_rejected() {
        let mut emu = small_emulator();
        emu.load_hyperparams(array![1.0, 1.0, 1.0, 1e-3]).unwrap();
        assert!(matches!(
            emu.save(),
            Err(EmulatorError::NonStandardArchive("saved"))
        ));
    }

    /// ln P as a full quartic in ln k, so every fitted coefficient column is
    /// non-degenerate under the median normalization.
    fn curved_ln_p1d(delta2_p: f64, k: f64) -> f64 {
        let u: f64 = k.ln();
        (10.0 * delta2_p).ln() - u + 0.05 * u.powi(2) + 0.01 * u.powi(3) + 0.002 * u.powi(4)
    }

    #[test]
    fn polyfit_emulator_reconstructs_a_smooth_spectrum() {
        let records: Vec<TrainingRecord> = (1..=5)
            .map(|i| {
                let delta2_p = 0.1 * i as f64;
                let mut r = record(delta2_p);
                r.p1d_mpc = r
                    .k_mpc
                    .iter()
                    .map(|&k| curved_ln_p1d(delta2_p, k).exp())
                    .collect();
                r
            })
            .collect();
        let archive = Archive::from_records(records, ArchiveFilters::default()).unwrap();
        let config = GpConfig {
            emu_type: TargetRepresentation::PolyFit,
            ..small_config()
        };
        let mut emu = GpEmulator::from_archive(archive, config).unwrap();
        emu.load_hyperparams(array![1.0, 1.0, 1.0, 1e-3]).unwrap();
        let model = emu.training_point_model(2).unwrap();
        let k = array![0.2, 0.4];
        let p1d = emu.emulate_p1d(&model, k.view()).unwrap();
        // The GP smooths, so only demand the right ballpark.
        let expected = curved_ln_p1d(0.3, 0.2).exp();
        assert!((p1d[0] / expected - 1.0).abs() < 0.5, "got {}", p1d[0]);
    }
}
