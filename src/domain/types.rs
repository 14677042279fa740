//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during sampling and diagnostics
//! - exported to JSON/CSV
//! - reloaded later for plotting without refitting

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which model(s) to fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSpec {
    /// Fit the whole ladder and let the comparison pick.
    Auto,
    /// Plain Poisson regression of complaints on traps.
    Poisson,
    /// Poisson with exposure offset and superintendent covariate.
    PoissonExp,
    /// Negative binomial with exposure offset (overdispersion).
    Negbin,
    /// Fit everything, report everything, still pick a winner.
    All,
}

/// Concrete fitted model kind.
///
/// The ladder mirrors how the analysis is usually built up: start with the
/// simplest Poisson regression, add the exposure offset plus a building
/// covariate, then relax the equal-mean-variance assumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Poisson,
    PoissonExposure,
    NegBinExposure,
}

impl ModelKind {
    /// Human-readable label for terminal output.
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Poisson => "Poisson",
            ModelKind::PoissonExposure => "Poisson + exposure",
            ModelKind::NegBinExposure => "NegBin + exposure",
        }
    }

    /// Number of regression coefficients (including the intercept).
    pub fn coef_len(self) -> usize {
        match self {
            ModelKind::Poisson => 2,
            ModelKind::PoissonExposure | ModelKind::NegBinExposure => 3,
        }
    }

    /// Whether the model carries a dispersion parameter (`inv_phi`).
    pub fn has_dispersion(self) -> bool {
        matches!(self, ModelKind::NegBinExposure)
    }

    /// Whether `log(exposure)` enters the linear predictor as an offset.
    pub fn uses_exposure(self) -> bool {
        !matches!(self, ModelKind::Poisson)
    }

    /// Total parameter count (coefficients + dispersion).
    pub fn param_count(self) -> usize {
        self.coef_len() + usize::from(self.has_dispersion())
    }

    /// Parameter names in sampling order.
    pub fn param_names(self) -> Vec<String> {
        let mut names: Vec<String> = match self {
            ModelKind::Poisson => vec!["alpha".into(), "beta_traps".into()],
            ModelKind::PoissonExposure | ModelKind::NegBinExposure => {
                vec!["alpha".into(), "beta_traps".into(), "beta_super".into()]
            }
        };
        if self.has_dispersion() {
            names.push("inv_phi".into());
        }
        names
    }

    /// Ladder order from simplest to most complex (used by the
    /// prefer-simpler tie-break in model comparison).
    pub const LADDER: [ModelKind; 3] = [
        ModelKind::Poisson,
        ModelKind::PoissonExposure,
        ModelKind::NegBinExposure,
    ];
}

/// A raw row of CSV inputs (covariates mostly optional).
///
/// Keeping the raw row around allows row-level validation with good error
/// messages before normalization.
#[derive(Debug, Clone)]
pub struct BuildingRow {
    pub building_id: String,
    pub month: NaiveDate,
    pub traps: f64,
    pub complaints: u64,

    /// Exposure in thousands of square feet.
    pub sq_ft: Option<f64>,
    /// Live-in superintendent flag (0/1).
    pub live_in_super: Option<f64>,
    pub age_of_building: Option<f64>,
}

/// Extra per-building fields kept for reporting only.
#[derive(Debug, Clone, Default)]
pub struct ObsMeta {
    pub age_of_building: Option<f64>,
}

/// A normalized building-month observation used for fitting.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Stable label, e.g. `B03/2017-05`.
    pub id: String,
    pub building_id: String,
    pub month: NaiveDate,

    pub traps: f64,
    pub complaints: u64,

    /// Exposure in thousands of square feet (strictly positive).
    pub exposure: f64,
    pub log_exposure: f64,

    /// Superintendent flag as a 0/1 covariate.
    pub live_in_super: f64,

    pub meta: ObsMeta,
}

/// Summary stats about the observations actually used for fitting.
#[derive(Debug, Clone)]
pub struct DatasetStats {
    pub n_obs: usize,
    pub n_buildings: usize,
    pub traps_min: f64,
    pub traps_max: f64,
    pub complaints_max: u64,
    pub complaints_mean: f64,
    pub complaints_sd: f64,
    pub prop_zero: f64,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Panel CSV. When absent, a synthetic demo panel is generated.
    pub csv_path: Option<PathBuf>,

    /// Synthetic panel shape (ignored when `csv_path` is set).
    pub buildings: usize,
    pub months: usize,
    pub sample_seed: u64,

    pub model_spec: ModelSpec,

    pub chains: usize,
    pub warmup: usize,
    pub samples: usize,

    /// Maximum posterior draws used for replicate datasets in the PPC.
    pub ppc_draws: usize,

    pub top_n: usize,
    pub plot: bool,
    pub plot_width: usize,
    pub plot_height: usize,

    pub export_results: Option<PathBuf>,
    pub export_posterior: Option<PathBuf>,
}

/// Posterior summary for a single parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub q2_5: f64,
    pub q5: f64,
    pub median: f64,
    pub q95: f64,
    pub q97_5: f64,
    pub rhat: f64,
    pub ess: f64,
    pub mcse: f64,
}

/// Fit quality diagnostics for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitQuality {
    /// Expected log pointwise predictive density (WAIC scale).
    pub elpd: f64,
    /// Effective number of parameters.
    pub p_eff: f64,
    /// Deviance-scale WAIC (`-2 * elpd`).
    pub waic: f64,
    pub max_rhat: f64,
    pub min_ess: f64,
    pub accept_rate: f64,
    pub n: usize,
}

/// Fitted model parameters and metadata (serializable summary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountModel {
    pub name: ModelKind,
    pub display_name: String,
    pub params: Vec<ParamSummary>,
}

/// Fitted grid of the posterior-mean complaint rate over a traps axis,
/// evaluated at the panel's average covariates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurveGrid {
    pub traps: Vec<f64>,
    pub mu: Vec<f64>,
}

/// A saved posterior file (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorFile {
    pub tool: String,
    pub model: CountModel,
    pub quality: FitQuality,
    pub curve: CurveGrid,
    pub rootogram: crate::ppc::Rootogram,
}

/// True parameter values used by the simulator and the recovery check.
#[derive(Debug, Clone, Copy)]
pub struct TrueParams {
    pub alpha: f64,
    pub beta_traps: f64,
    pub beta_super: f64,
    /// Reciprocal dispersion; 0 disables overdispersion in the simulator.
    pub inv_phi: f64,
}

impl Default for TrueParams {
    fn default() -> Self {
        Self {
            alpha: 2.0,
            beta_traps: -0.20,
            beta_super: -0.35,
            inv_phi: 0.5,
        }
    }
}

/// One row of the fake-data recovery table.
#[derive(Debug, Clone)]
pub struct RecoveryRow {
    pub name: String,
    pub truth: f64,
    pub mean: f64,
    pub lo90: f64,
    pub hi90: f64,
    pub inside: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_names_match_param_count() {
        for kind in ModelKind::LADDER {
            assert_eq!(kind.param_names().len(), kind.param_count());
        }
    }

    #[test]
    fn ladder_orders_by_complexity() {
        let counts: Vec<usize> = ModelKind::LADDER.iter().map(|k| k.param_count()).collect();
        assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    }
}
