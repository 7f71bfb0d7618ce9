//! Persistence of trained emulator hyperparameters.
//!
//! Each saved state is a pair of files sharing a stem with an incrementing
//! integer suffix: a human-readable TOML fingerprint of the configuration
//! that produced the hyperparameters, and a binary blob holding the flat
//! hyperparameter vector. States are matched by exact structural equality of
//! the fingerprint; a mismatch is "not found", never a near-match.

use crate::params::{EmuParam, TargetRepresentation};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SAVE_STEM: &str = "saved_emulator_";

/// Structural record of everything that shaped the training set and kernel.
/// Two emulators with equal fingerprints train on identical data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorFingerprint {
    pub k_bin: usize,
    pub emu_type: TargetRepresentation,
    pub emu_noise: f64,
    pub drop_tau_rescalings: bool,
    pub drop_temp_rescalings: bool,
    pub keep_every_other_rescaling: bool,
    pub undersample_z: usize,
    pub param_list: Vec<EmuParam>,
    pub asymmetric_kernel: bool,
    pub z_max: f64,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("IO error while accessing saved emulator state: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to serialize the emulator fingerprint: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("Failed to parse a saved emulator fingerprint: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to encode or decode the hyperparameter blob: {0}")]
    BlobError(#[from] bincode::Error),
}

/// Result of a save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new state was written at this stem.
    Written(PathBuf),
    /// An identical fingerprint already exists; nothing was written.
    AlreadySaved(PathBuf),
}

fn fingerprint_path(basedir: &Path, index: usize) -> PathBuf {
    basedir.join(format!("{SAVE_STEM}{index}.toml"))
}

fn blob_path(basedir: &Path, index: usize) -> PathBuf {
    basedir.join(format!("{SAVE_STEM}{index}.hyp"))
}

/// Writes a new saved state under `basedir`, or no-ops if a state with an
/// identical fingerprint already exists. Suffixes are scanned consecutively
/// from 1.
pub fn save_emulator(
    basedir: &Path,
    fingerprint: &EmulatorFingerprint,
    hyperparams: ArrayView1<f64>,
) -> Result<SaveOutcome, PersistError> {
    let mut index = 1;
    loop {
        let path = fingerprint_path(basedir, index);
        if !path.exists() {
            break;
        }
        let existing: EmulatorFingerprint = toml::from_str(&fs::read_to_string(&path)?)?;
        if existing == *fingerprint {
            log::info!("This emulator is already saved at '{}'", path.display());
            return Ok(SaveOutcome::AlreadySaved(path));
        }
        index += 1;
    }

    let path = fingerprint_path(basedir, index);
    fs::write(&path, toml::to_string_pretty(fingerprint)?)?;
    fs::write(
        blob_path(basedir, index),
        bincode::serialize(&hyperparams.to_vec())?,
    )?;
    log::info!("Saved emulator state at '{}'", path.display());
    Ok(SaveOutcome::Written(path))
}

/// Returns the hyperparameters of the first saved state whose fingerprint
/// exactly matches, or `None` when no state matches.
pub fn load_emulator(
    basedir: &Path,
    fingerprint: &EmulatorFingerprint,
) -> Result<Option<Array1<f64>>, PersistError> {
    let mut index = 1;
    loop {
        let path = fingerprint_path(basedir, index);
        if !path.exists() {
            return Ok(None);
        }
        let existing: EmulatorFingerprint = toml::from_str(&fs::read_to_string(&path)?)?;
        if existing == *fingerprint {
            let bytes = fs::read(blob_path(basedir, index))?;
            let values: Vec<f64> = bincode::deserialize(&bytes)?;
            return Ok(Some(Array1::from_vec(values)));
        }
        index += 1;
    }
}
