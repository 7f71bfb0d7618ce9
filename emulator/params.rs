//! Physical-parameter schema shared by every emulator.
//!
//! Query models are fixed-schema records rather than string-keyed maps:
//! parameter-name resolution happens once, at emulator construction, and the
//! same ordered list drives both training-grid assembly and query rescaling.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParamError {
    #[error(
        "Unknown emulator parameter '{0}'. Supported: mF, Delta2_p, n_p, alpha_p, sigT_Mpc, f_p, kF_Mpc, gamma."
    )]
    UnknownParameter(String),

    #[error("Unsupported target representation '{0}'. Supported: k_bin, polyfit.")]
    UnknownRepresentation(String),
}

/// What the emulator predicts: raw flux power at the training wavenumber
/// bins, or the coefficients of a polynomial fit to log P1D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetRepresentation {
    #[serde(rename = "k_bin")]
    KBin,
    #[serde(rename = "polyfit")]
    PolyFit,
}

impl TargetRepresentation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetRepresentation::KBin => "k_bin",
            TargetRepresentation::PolyFit => "polyfit",
        }
    }
}

impl FromStr for TargetRepresentation {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "k_bin" => Ok(TargetRepresentation::KBin),
            "polyfit" => Ok(TargetRepresentation::PolyFit),
            other => Err(ParamError::UnknownRepresentation(other.to_string())),
        }
    }
}

impl fmt::Display for TargetRepresentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The redshift-independent physical parameters a training record carries.
///
/// The serialized names are the archive's field names; `value_in` is the
/// named-field lookup used at query time, so grid assembly and prediction can
/// never disagree on ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmuParam {
    /// Mean transmitted flux fraction.
    #[serde(rename = "mF")]
    MeanFlux,
    /// Amplitude of the linear power at the pivot scale.
    #[serde(rename = "Delta2_p")]
    Delta2P,
    /// Slope of the linear power at the pivot scale.
    #[serde(rename = "n_p")]
    SlopeP,
    /// Running of the linear power at the pivot scale.
    #[serde(rename = "alpha_p")]
    RunningP,
    /// Thermal broadening width in comoving Mpc.
    #[serde(rename = "sigT_Mpc")]
    SigTMpc,
    /// Logarithmic growth rate at the pivot scale.
    #[serde(rename = "f_p")]
    GrowthP,
    /// Pressure-smoothing scale in 1/Mpc.
    #[serde(rename = "kF_Mpc")]
    KFMpc,
    /// Slope of the temperature-density relation.
    #[serde(rename = "gamma")]
    Gamma,
}

impl EmuParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmuParam::MeanFlux => "mF",
            EmuParam::Delta2P => "Delta2_p",
            EmuParam::SlopeP => "n_p",
            EmuParam::RunningP => "alpha_p",
            EmuParam::SigTMpc => "sigT_Mpc",
            EmuParam::GrowthP => "f_p",
            EmuParam::KFMpc => "kF_Mpc",
            EmuParam::Gamma => "gamma",
        }
    }

    /// The default parameter selection, in its canonical order.
    pub fn default_list() -> Vec<EmuParam> {
        vec![
            EmuParam::MeanFlux,
            EmuParam::Delta2P,
            EmuParam::RunningP,
            EmuParam::SigTMpc,
            EmuParam::GrowthP,
            EmuParam::SlopeP,
            EmuParam::Gamma,
            EmuParam::KFMpc,
        ]
    }

    /// Named-field lookup into a query model.
    pub fn value_in(&self, model: &ModelPoint) -> f64 {
        match self {
            EmuParam::MeanFlux => model.mean_flux,
            EmuParam::Delta2P => model.delta2_p,
            EmuParam::SlopeP => model.n_p,
            EmuParam::RunningP => model.alpha_p,
            EmuParam::SigTMpc => model.sig_t_mpc,
            EmuParam::GrowthP => model.f_p,
            EmuParam::KFMpc => model.kf_mpc,
            EmuParam::Gamma => model.gamma,
        }
    }
}

impl FromStr for EmuParam {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mF" => Ok(EmuParam::MeanFlux),
            "Delta2_p" => Ok(EmuParam::Delta2P),
            "n_p" => Ok(EmuParam::SlopeP),
            "alpha_p" => Ok(EmuParam::RunningP),
            "sigT_Mpc" => Ok(EmuParam::SigTMpc),
            "f_p" => Ok(EmuParam::GrowthP),
            "kF_Mpc" => Ok(EmuParam::KFMpc),
            "gamma" => Ok(EmuParam::Gamma),
            other => Err(ParamError::UnknownParameter(other.to_string())),
        }
    }
}

impl fmt::Display for EmuParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single query point for an emulator. Extra context the caller may hold
/// (redshift, labels) is deliberately not part of the schema; emulators only
/// read the fields selected by their parameter list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPoint {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representation_roundtrip() {
        for repr in [TargetRepresentation::KBin, TargetRepresentation::PolyFit] {
            assert_eq!(repr.as_str().parse::<TargetRepresentation>().unwrap(), repr);
        }
    }

    #[test]
    fn representation_rejects_unknown_string() {
        let err = "spectral".parse::<TargetRepresentation>().unwrap_err();
        match err {
            ParamError::UnknownRepresentation(s) => assert_eq!(s, "spectral"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn param_roundtrip_through_names() {
        for param in EmuParam::default_list() {
            assert_eq!(param.as_str().parse::<EmuParam>().unwrap(), param);
        }
    }

    #[test]
    fn param_lookup_reads_named_fields() {
        let model = ModelPoint {
            mean_flux: 0.7,
            delta2_p: 0.35,
            n_p: -2.3,
            alpha_p: -0.21,
            sig_t_mpc: 0.13,
            f_p: 0.98,
            kf_mpc: 10.5,
            gamma: 1.4,
        };
        assert_eq!(EmuParam::MeanFlux.value_in(&model), 0.7);
        assert_eq!(EmuParam::Delta2P.value_in(&model), 0.35);
        assert_eq!(EmuParam::KFMpc.value_in(&model), 10.5);
    }
}
