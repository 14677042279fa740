//! Shared "fit pipeline" logic used by both CLI and TUI front-ends.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! load/simulate panel -> fit ladder -> selection -> residuals -> PPC
//!
//! The CLI and the TUI can then focus on presentation (printing vs widgets).

use crate::data::{generate_panel, load_panel, IngestedData, SampleConfig};
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::fit::selection::fit_and_select;
use crate::fit::FitSelection;
use crate::ppc::{run_ppc, PpcSummary};
use crate::report::{compute_residuals, rank_under_over, ObsResidual, Rankings};

/// All computed outputs of a single `roach fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub data: IngestedData,
    pub selection: FitSelection,
    pub residuals: Vec<ObsResidual>,
    pub rankings: Rankings,
    pub ppc: PpcSummary,
}

/// Load the panel named by the config (CSV, or the synthetic demo panel).
pub fn load_data(config: &FitConfig) -> Result<IngestedData, AppError> {
    match &config.csv_path {
        Some(path) => load_panel(path),
        None => generate_panel(&SampleConfig::new(
            config.buildings,
            config.months,
            config.sample_seed,
        )),
    }
}

/// Execute the full fitting pipeline and return the computed outputs.
pub fn run_fit(config: &FitConfig) -> Result<RunOutput, AppError> {
    let data = load_data(config)?;
    run_fit_with_data(config, data)
}

/// Execute the fitting pipeline with pre-loaded data.
///
/// This is useful for the TUI where we want to refit without re-reading the
/// panel from disk.
pub fn run_fit_with_data(config: &FitConfig, data: IngestedData) -> Result<RunOutput, AppError> {
    let selection = fit_and_select(&data.observations, config)?;

    let residuals = compute_residuals(&data.observations, &selection.best)?;
    let rankings = rank_under_over(&residuals, config.top_n);

    let ppc = run_ppc(
        &selection.best.posterior,
        &data.observations,
        config.ppc_draws,
        config.sample_seed,
    )?;

    Ok(RunOutput {
        data,
        selection,
        residuals,
        rankings,
        ppc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModelSpec;

    fn quick_config() -> FitConfig {
        FitConfig {
            csv_path: None,
            buildings: 5,
            months: 8,
            sample_seed: 4,
            model_spec: ModelSpec::PoissonExp,
            chains: 2,
            warmup: 150,
            samples: 150,
            ppc_draws: 60,
            top_n: 5,
            plot: false,
            plot_width: 80,
            plot_height: 20,
            export_results: None,
            export_posterior: None,
        }
    }

    #[test]
    fn run_fit_produces_consistent_outputs() {
        let run = run_fit(&quick_config()).unwrap();

        assert_eq!(run.data.stats.n_obs, 40);
        assert_eq!(run.residuals.len(), 40);
        assert!(run.rankings.under.len() <= 5);
        assert_eq!(run.ppc.stats.len(), 4);
        assert_eq!(
            run.selection.best.model.name,
            crate::domain::ModelKind::PoissonExposure
        );
    }
}
