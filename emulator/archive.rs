//! # Training Archive Loading and Validation
//!
//! This module is the exclusive entry point for simulation-derived training
//! data. It reads per-suite JSON record files, validates them against a strict
//! schema, applies the configured selection filters, and exposes the result as
//! a read-only sequence of typed records.
//!
//! The archive is an ownership boundary: emulators receive it at construction
//! and never mutate it. How the records were produced (the simulation suite
//! itself) is not this crate's concern.

use crate::params::ModelPoint;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One simulation snapshot/skewer configuration with its measured P1D.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRecord {
    /// Snapshot redshift.
    pub z: f64,
    #[serde(rename = "mF")]
    pub mean_flux: f64,
    #[serde(rename = "Delta2_p")]
    pub delta2_p: f64,
    pub n_p: f64,
    pub alpha_p: f64,
    #[serde(rename = "sigT_Mpc")]
    pub sig_t_mpc: f64,
    pub f_p: f64,
    #[serde(rename = "kF_Mpc")]
    pub kf_mpc: f64,
    pub gamma: f64,
    /// Ascending wavenumbers, in 1/Mpc.
    #[serde(rename = "k_Mpc")]
    pub k_mpc: Vec<f64>,
    /// Measured flux power at `k_mpc`, parallel sequence.
    #[serde(rename = "p1d_Mpc")]
    pub p1d_mpc: Vec<f64>,
    /// Optical-depth rescaling factor applied in post-processing (1 = none).
    #[serde(default = "unity")]
    pub scale_tau: f64,
    /// Temperature rescaling factor (1 = none).
    #[serde(rename = "scale_T0", default = "unity")]
    pub scale_t0: f64,
    /// Temperature-density-slope rescaling factor (1 = none).
    #[serde(default = "unity")]
    pub scale_gamma: f64,
}

fn unity() -> f64 {
    1.0
}

impl TrainingRecord {
    /// The record's physical parameters as a query model.
    pub fn model_point(&self) -> ModelPoint {
        ModelPoint {
            mean_flux: self.mean_flux,
            delta2_p: self.delta2_p,
            n_p: self.n_p,
            alpha_p: self.alpha_p,
            sig_t_mpc: self.sig_t_mpc,
            f_p: self.f_p,
            kf_mpc: self.kf_mpc,
            gamma: self.gamma,
        }
    }

    pub fn is_tau_rescaled(&self) -> bool {
        self.scale_tau != 1.0
    }

    pub fn is_temp_rescaled(&self) -> bool {
        self.scale_t0 != 1.0 || self.scale_gamma != 1.0
    }

    fn validate(&self, index: usize) -> Result<(), ArchiveError> {
        if self.k_mpc.len() != self.p1d_mpc.len() {
            return Err(ArchiveError::MismatchedBins {
                index,
                n_k: self.k_mpc.len(),
                n_p1d: self.p1d_mpc.len(),
            });
        }
        if self.k_mpc.is_empty() {
            return Err(ArchiveError::MismatchedBins {
                index,
                n_k: 0,
                n_p1d: 0,
            });
        }
        if self.k_mpc[0] < 0.0 || self.k_mpc.windows(2).any(|w| w[1] <= w[0]) {
            return Err(ArchiveError::NonAscendingBins { index });
        }
        let scalars = [
            ("z", self.z),
            ("mF", self.mean_flux),
            ("Delta2_p", self.delta2_p),
            ("n_p", self.n_p),
            ("alpha_p", self.alpha_p),
            ("sigT_Mpc", self.sig_t_mpc),
            ("f_p", self.f_p),
            ("kF_Mpc", self.kf_mpc),
            ("gamma", self.gamma),
        ];
        for (field, value) in scalars {
            if !value.is_finite() {
                return Err(ArchiveError::NonFinite { index, field });
            }
        }
        if self.p1d_mpc.iter().any(|v| !v.is_finite()) {
            return Err(ArchiveError::NonFinite {
                index,
                field: "p1d_Mpc",
            });
        }
        Ok(())
    }
}

/// Selection flags applied when assembling the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFilters {
    /// Drop post-processed optical-depth rescalings, keeping `scale_tau == 1`.
    pub drop_tau_rescalings: bool,
    /// Drop temperature rescalings, keeping `scale_T0 == scale_gamma == 1`.
    pub drop_temp_rescalings: bool,
    /// Retain every other rescaled entry; unrescaled entries are always kept.
    pub keep_every_other_rescaling: bool,
    /// Keep every n-th distinct redshift (1 keeps all).
    pub undersample_z: usize,
    /// Discard snapshots above this redshift.
    pub z_max: f64,
    /// Cap on the number of records after filtering. Archives built with a
    /// cap are non-standard and cannot be persisted.
    pub max_size: Option<usize>,
}

impl Default for ArchiveFilters {
    fn default() -> Self {
        ArchiveFilters {
            drop_tau_rescalings: false,
            drop_temp_rescalings: false,
            keep_every_other_rescaling: false,
            undersample_z: 1,
            z_max: 5.0,
            max_size: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error while reading the archive: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse an archive record file as JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("No record files matching '{label}*.json' were found under '{basedir}'.")]
    NoRecordFiles { basedir: PathBuf, label: String },

    #[error("The archive is empty after applying the selection filters.")]
    EmptyAfterFilters,

    #[error("Record {index}: 'k_Mpc' has {n_k} entries but 'p1d_Mpc' has {n_p1d}.")]
    MismatchedBins {
        index: usize,
        n_k: usize,
        n_p1d: usize,
    },

    #[error("Record {index}: wavenumbers must be non-negative and strictly ascending.")]
    NonAscendingBins { index: usize },

    #[error("Record {index}: non-finite value in field '{field}'.")]
    NonFinite { index: usize, field: &'static str },
}

/// A read-only collection of training records.
///
/// Archives loaded from a base directory without a size cap are *standard*:
/// the exact training set can be reassembled from the directory and the
/// filters alone, which is what makes persisted hyperparameters trustworthy.
#[derive(Debug, Clone)]
pub struct Archive {
    records: Vec<TrainingRecord>,
    filters: ArchiveFilters,
    standard: bool,
}

impl Archive {
    /// Loads every record file named `{p1d_label}_{skewers_label}*.json`
    /// under `basedir`, in lexicographic order, then applies `filters`.
    pub fn load(
        basedir: &Path,
        p1d_label: &str,
        skewers_label: &str,
        filters: ArchiveFilters,
    ) -> Result<Self, ArchiveError> {
        let label = format!("{p1d_label}_{skewers_label}");
        let mut paths: Vec<PathBuf> = fs::read_dir(basedir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&label) && name.ends_with(".json"))
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(ArchiveError::NoRecordFiles {
                basedir: basedir.to_path_buf(),
                label,
            });
        }

        let mut records = Vec::new();
        for path in &paths {
            let mut batch: Vec<TrainingRecord> = serde_json::from_str(&fs::read_to_string(path)?)?;
            records.append(&mut batch);
        }
        log::info!(
            "Read {} records from {} file(s) under '{}'",
            records.len(),
            paths.len(),
            basedir.display()
        );

        let standard = filters.max_size.is_none();
        Self::assemble(records, filters, standard)
    }

    /// Builds an archive from caller-supplied records. The result is
    /// non-standard: emulators constructed on it refuse to persist state.
    pub fn from_records(
        records: Vec<TrainingRecord>,
        filters: ArchiveFilters,
    ) -> Result<Self, ArchiveError> {
        Self::assemble(records, filters, false)
    }

    fn assemble(
        records: Vec<TrainingRecord>,
        filters: ArchiveFilters,
        standard: bool,
    ) -> Result<Self, ArchiveError> {
        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
        }
        let records = apply_filters(records, &filters);
        if records.is_empty() {
            return Err(ArchiveError::EmptyAfterFilters);
        }
        Ok(Archive {
            records,
            filters,
            standard,
        })
    }

    pub fn records(&self) -> &[TrainingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn filters(&self) -> &ArchiveFilters {
        &self.filters
    }

    pub fn is_standard(&self) -> bool {
        self.standard
    }
}

fn apply_filters(records: Vec<TrainingRecord>, filters: &ArchiveFilters) -> Vec<TrainingRecord> {
    let mut kept: Vec<TrainingRecord> = records
        .into_iter()
        .filter(|r| r.z <= filters.z_max)
        .collect();

    if filters.drop_tau_rescalings {
        kept.retain(|r| !r.is_tau_rescaled());
    }
    if filters.drop_temp_rescalings {
        kept.retain(|r| !r.is_temp_rescaled());
    }
    if filters.keep_every_other_rescaling {
        let mut seen = 0usize;
        kept.retain(|r| {
            if r.is_tau_rescaled() || r.is_temp_rescaled() {
                seen += 1;
                (seen - 1) % 2 == 0
            } else {
                true
            }
        });
    }
    if filters.undersample_z > 1 {
        let mut redshifts: Vec<f64> = kept.iter().map(|r| r.z).collect();
        redshifts.sort_by(f64::total_cmp);
        redshifts.dedup();
        let selected: Vec<f64> = redshifts
            .iter()
            .copied()
            .step_by(filters.undersample_z)
            .collect();
        kept.retain(|r| selected.iter().any(|&z| z == r.z));
    }
    if let Some(cap) = filters.max_size {
        kept.truncate(cap);
    }
    kept
}
