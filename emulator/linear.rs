//! Linear-interpolation emulator: a lighter-weight alternative to the GP.
//!
//! Each record's spectrum is reduced to polynomial coefficients, and one
//! scattered linear interpolator is built per coefficient over the raw
//! (non-rescaled) parameter grid. Linear interpolation is undefined outside
//! the convex hull of the grid, so out-of-hull queries yield NaN rather than
//! an extrapolated guess.

use crate::archive::{Archive, ArchiveFilters};
use crate::gp::EmulatorError;
use crate::hull::{TrainingHull, build_hull};
use crate::params::{EmuParam, ModelPoint};
use crate::poly::P1dPolynomial;
use ndarray::{Array1, Array2, ArrayView1, aview1, s};
use ndarray_linalg::LeastSquaresSvd;
use std::path::Path;

/// Construction-time configuration for [`LinearEmulator`].
#[derive(Debug, Clone)]
pub struct LinearConfig {
    /// Degree of the per-record polynomial fit.
    pub degree: usize,
    pub kmin_mpc: f64,
    pub kmax_mpc: f64,
    pub param_list: Vec<EmuParam>,
}

impl Default for LinearConfig {
    fn default() -> Self {
        LinearConfig {
            degree: 4,
            kmin_mpc: 1e-3,
            kmax_mpc: 10.0,
            param_list: EmuParam::default_list(),
        }
    }
}

/// Per-coefficient N-dimensional linear interpolation over the training grid.
#[derive(Debug)]
pub struct LinearEmulator {
    config: LinearConfig,
    /// Raw physical parameter grid, one row per record.
    points: Array2<f64>,
    /// Interpolators indexed by ascending power: entry `p` carries the
    /// coefficient of (ln k)^p.
    coeff_interps: Vec<ScatteredLinearInterpolator>,
    hull: TrainingHull,
    kmin_mpc: f64,
}

impl LinearEmulator {
    pub fn from_basedir(
        basedir: &Path,
        p1d_label: &str,
        skewers_label: &str,
        filters: ArchiveFilters,
        config: LinearConfig,
    ) -> Result<Self, EmulatorError> {
        let archive = Archive::load(basedir, p1d_label, skewers_label, filters)?;
        Self::from_archive(&archive, config)
    }

    pub fn from_archive(archive: &Archive, config: LinearConfig) -> Result<Self, EmulatorError> {
        let records = archive.records();
        let n = records.len();
        let dim = config.param_list.len();

        // Smooth every record down to polynomial coefficients.
        let mut fits = Vec::with_capacity(n);
        for record in records {
            fits.push(P1dPolynomial::fit(
                aview1(&record.k_mpc),
                aview1(&record.p1d_mpc),
                config.kmin_mpc,
                config.kmax_mpc,
                config.degree,
            )?);
        }

        let mut points = Array2::zeros((n, dim));
        for (i, record) in records.iter().enumerate() {
            let model = record.model_point();
            for (j, param) in config.param_list.iter().enumerate() {
                points[[i, j]] = param.value_in(&model);
            }
        }
        let hull = build_hull(points.view())?;

        // One interpolator per power of ln k. Fit coefficients are stored
        // highest power first, so power p lives at index (degree - p).
        let mut coeff_interps = Vec::with_capacity(config.degree + 1);
        for power in 0..=config.degree {
            let values = Array1::from_iter(
                fits.iter()
                    .map(|fit| fit.coefficients()[config.degree - power]),
            );
            coeff_interps.push(ScatteredLinearInterpolator::new(points.clone(), values));
        }

        Ok(LinearEmulator {
            kmin_mpc: config.kmin_mpc,
            config,
            points,
            coeff_interps,
            hull,
        })
    }

    pub fn param_list(&self) -> &[EmuParam] {
        &self.config.param_list
    }

    fn point_from_model(&self, model: &ModelPoint) -> Array1<f64> {
        Array1::from_iter(
            self.config
                .param_list
                .iter()
                .map(|param| param.value_in(model)),
        )
    }

    /// Predicted P1D at the requested wavenumbers. Queries outside the hull
    /// of the raw grid return NaN for every bin.
    pub fn emulate_p1d(
        &self,
        model: &ModelPoint,
        k_mpc: ArrayView1<f64>,
    ) -> Result<Array1<f64>, EmulatorError> {
        let point = self.point_from_model(model);
        if !self.hull.contains(point.view()) {
            log::warn!(
                "Query point lies outside the hull of the training grid; linear interpolation is undefined there."
            );
            return Ok(Array1::from_elem(k_mpc.len(), f64::NAN));
        }

        // Interpolators run in ascending-power order; the evaluator wants
        // highest power first, so the assembled vector is filled in reverse.
        let n_coeffs = self.coeff_interps.len();
        let mut coeffs = Array1::zeros(n_coeffs);
        for (power, interp) in self.coeff_interps.iter().enumerate() {
            coeffs[n_coeffs - power - 1] = interp.interpolate(point.view())?;
        }

        let poly = P1dPolynomial::from_coefficients(coeffs, self.kmin_mpc);
        Ok(poly.p1d_mpc(k_mpc))
    }

    /// Number of training points backing the interpolators.
    pub fn n_training_points(&self) -> usize {
        self.points.nrows()
    }
}

/// Scattered-data linear interpolation by local affine fit.
///
/// The value at a query is the plane through its nearest neighbors,
/// evaluated at the query; a query coinciding with a training point returns
/// that point's value exactly.
#[derive(Debug)]
struct ScatteredLinearInterpolator {
    points: Array2<f64>,
    values: Array1<f64>,
}

impl ScatteredLinearInterpolator {
    fn new(points: Array2<f64>, values: Array1<f64>) -> Self {
        ScatteredLinearInterpolator { points, values }
    }

    fn interpolate(&self, query: ArrayView1<f64>) -> Result<f64, EmulatorError> {
        let n = self.points.nrows();
        let dim = self.points.ncols();

        let mut order: Vec<usize> = (0..n).collect();
        let dist2 = |i: usize| -> f64 {
            self.points
                .row(i)
                .iter()
                .zip(query.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum()
        };
        order.sort_by(|&a, &b| dist2(a).total_cmp(&dist2(b)));

        // Exact hit on a training point.
        if dist2(order[0]) < 1e-24 {
            return Ok(self.values[order[0]]);
        }

        let k = (2 * (dim + 1)).min(n);
        let mut design = Array2::zeros((k, dim + 1));
        let mut rhs = Array1::zeros(k);
        for (row, &i) in order.iter().take(k).enumerate() {
            design[[row, 0]] = 1.0;
            design
                .slice_mut(s![row, 1..])
                .assign(&self.points.row(i));
            rhs[row] = self.values[i];
        }
        let coeffs = design.least_squares(&rhs)?.solution;

        let mut value = coeffs[0];
        for j in 0..dim {
            value += coeffs[j + 1] * query[j];
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::TrainingRecord;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Spectra with ln P linear in the parameters, so every fitted
    /// coefficient is an exactly linear function of the grid and scattered
    /// linear interpolation reproduces it.
    fn record(delta2_p: f64, sig_t_mpc: f64) -> TrainingRecord {
        let amplitude = (0.5 + 2.0 * delta2_p + sig_t_mpc).exp();
        let k_mpc: Vec<f64> = (1..=12).map(|i| 0.1 * i as f64).collect();
        let p1d_mpc: Vec<f64> = k_mpc.iter().map(|k| amplitude / k).collect();
        TrainingRecord {
            z: 3.0,
            mean_flux: 0.66,
            delta2_p,
            n_p: -2.3,
            alpha_p: -0.21,
            sig_t_mpc,
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

    fn grid_archive() -> Archive {
        let mut records = Vec::new();
        for &d in &[0.1, 0.3, 0.5] {
            for &s in &[0.10, 0.15, 0.20] {
                records.push(record(d, s));
            }
        }
        Archive::from_records(records, ArchiveFilters::default()).unwrap()
    }

    fn small_config() -> LinearConfig {
        LinearConfig {
            degree: 1,
            param_list: vec![EmuParam::Delta2P, EmuParam::SigTMpc],
            ..Default::default()
        }
    }

    #[test]
    fn training_point_is_reproduced() {
        let archive = grid_archive();
        let emu = LinearEmulator::from_archive(&archive, small_config()).unwrap();
        let model = archive.records()[4].model_point();
        let k = array![0.2, 0.5, 1.0];
        let p1d = emu.emulate_p1d(&model, k.view()).unwrap();
        let amplitude = (0.5 + 2.0 * model.delta2_p + model.sig_t_mpc).exp();
        for (&ki, &pi) in k.iter().zip(p1d.iter()) {
            assert_abs_diff_eq!(pi, amplitude / ki, epsilon = 1e-6 * (amplitude / ki));
        }
    }

    #[test]
    fn interior_query_interpolates_linearly() {
        let archive = grid_archive();
        let emu = LinearEmulator::from_archive(&archive, small_config()).unwrap();
        let mut model = archive.records()[0].model_point();
        model.delta2_p = 0.2;
        model.sig_t_mpc = 0.125;
        let k = array![0.4];
        let p1d = emu.emulate_p1d(&model, k.view()).unwrap();
        let amplitude = (0.5 + 2.0 * 0.2 + 0.125).exp();
        assert_abs_diff_eq!(p1d[0], amplitude / 0.4, epsilon = 1e-6 * (amplitude / 0.4));
    }

    #[test]
    fn out_of_hull_query_yields_nan() {
        let archive = grid_archive();
        let emu = LinearEmulator::from_archive(&archive, small_config()).unwrap();
        let mut model = archive.records()[0].model_point();
        model.delta2_p = 5.0;
        let p1d = emu.emulate_p1d(&model, array![0.3].view()).unwrap();
        assert!(p1d[0].is_nan());
    }

    #[test]
    fn reversed_assembly_matches_the_evaluator_convention() {
        // With degree 1 the stored fits are [slope, intercept] (highest
        // first); interpolator 0 carries the intercept, interpolator 1 the
        // slope. A correct reversal reconstructs ln P = intercept - ln k.
        let archive = grid_archive();
        let emu = LinearEmulator::from_archive(&archive, small_config()).unwrap();
        let model = archive.records()[0].model_point();
        let amplitude = (0.5 + 2.0 * model.delta2_p + model.sig_t_mpc).exp();
        let p1d = emu.emulate_p1d(&model, array![1.0].view()).unwrap();
        // At k = 1, ln k = 0, so only the constant coefficient survives.
        assert_abs_diff_eq!(p1d[0], amplitude, epsilon = 1e-6 * amplitude);
    }

    #[test]
    fn emulator_counts_its_training_points() {
        let emu = LinearEmulator::from_archive(&grid_archive(), small_config()).unwrap();
        assert_eq!(emu.n_training_points(), 9);
    }
}
