//! Multi-redshift dispatch over per-redshift emulators.
//!
//! Emulator instances are independent; an analysis spanning several
//! redshifts holds one per snapshot and routes each query to the member
//! whose redshift is nearest the requested one.

use crate::gp::{EmulatorError, GpEmulator, GpPrediction};
use crate::params::ModelPoint;
use ndarray::{Array1, ArrayView1};

/// An ordered dispatch table from redshift to emulator.
#[derive(Debug)]
pub struct RedshiftEnsemble {
    /// Members sorted by ascending redshift.
    members: Vec<(f64, GpEmulator)>,
}

impl RedshiftEnsemble {
    pub fn new(mut members: Vec<(f64, GpEmulator)>) -> Result<Self, EmulatorError> {
        if members.is_empty() {
            return Err(EmulatorError::EmptyEnsemble);
        }
        members.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(RedshiftEnsemble { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn redshifts(&self) -> Vec<f64> {
        self.members.iter().map(|(z, _)| *z).collect()
    }

    /// Trains every untrained member in redshift order.
    pub fn train_all(&mut self) -> Result<(), EmulatorError> {
        for (z, emulator) in &mut self.members {
            if !emulator.is_trained() {
                log::info!("Training ensemble member at z = {z:.3}");
                emulator.train()?;
            }
        }
        Ok(())
    }

    /// The member with redshift nearest to `z` (exact matches win trivially).
    pub fn nearest(&self, z: f64) -> &GpEmulator {
        let (_, emulator) = self
            .members
            .iter()
            .min_by(|a, b| (a.0 - z).abs().total_cmp(&(b.0 - z).abs()))
            .expect("ensemble is non-empty by construction");
        emulator
    }

    pub fn predict(&self, z: f64, model: &ModelPoint) -> Result<GpPrediction, EmulatorError> {
        self.nearest(z).predict(model)
    }

    pub fn emulate_p1d(
        &self,
        z: f64,
        model: &ModelPoint,
        k_mpc: ArrayView1<f64>,
    ) -> Result<Array1<f64>, EmulatorError> {
        self.nearest(z).emulate_p1d(model, k_mpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Archive, ArchiveFilters, TrainingRecord};
    use crate::gp::GpConfig;
    use crate::params::EmuParam;

    fn record(z: f64, delta2_p: f64) -> TrainingRecord {
        let k_mpc: Vec<f64> = (1..=10).map(|i| 0.1 * i as f64).collect();
        let p1d_mpc: Vec<f64> = k_mpc.iter().map(|k| (1.0 + z) * delta2_p / k).collect();
        TrainingRecord {
            z,
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

    fn member(z: f64) -> (f64, GpEmulator) {
        let records = (1..=5).map(|i| record(z, 0.1 * i as f64)).collect();
        let archive = Archive::from_records(records, ArchiveFilters::default()).unwrap();
        let config = GpConfig {
            kmax_mpc: 0.85,
            param_list: vec![EmuParam::Delta2P],
            ..Default::default()
        };
        (z, GpEmulator::from_archive(archive, config).unwrap())
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(matches!(
            RedshiftEnsemble::new(Vec::new()),
            Err(EmulatorError::EmptyEnsemble)
        ));
    }

    #[test]
    fn members_are_sorted_and_nearest_lookup_dispatches() {
        let ensemble = RedshiftEnsemble::new(vec![member(4.0), member(2.0), member(3.0)]).unwrap();
        assert_eq!(ensemble.redshifts(), vec![2.0, 3.0, 4.0]);
        assert_eq!(ensemble.len(), 3);

        // Nearest-or-exact selection, identified through the member's records.
        let near = ensemble.nearest(2.9);
        assert_eq!(
            near.archive().records()[0].z,
            3.0,
            "z = 2.9 should dispatch to the z = 3 member"
        );
        assert_eq!(ensemble.nearest(9.0).archive().records()[0].z, 4.0);
    }

    #[test]
    fn dispatch_forwards_prediction_errors_from_untrained_members() {
        let ensemble = RedshiftEnsemble::new(vec![member(2.0)]).unwrap();
        let model = ensemble.nearest(2.0).training_point_model(0).unwrap();
        assert!(matches!(
            ensemble.predict(2.0, &model),
            Err(EmulatorError::Untrained)
        ));
    }
}
