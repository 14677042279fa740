//! Read/write posterior JSON files.
//!
//! Posterior JSON is the "portable" representation of a fitted model:
//! - model kind + per-parameter posterior summaries
//! - fit quality (WAIC, convergence, acceptance)
//! - a precomputed fitted curve and rootogram for quick plotting
//!
//! The schema is defined by `domain::PosteriorFile`; `roach plot` renders
//! these files without refitting.

use std::fs::File;
use std::path::Path;

use crate::domain::{CurveGrid, Observation, PosteriorFile};
use crate::error::AppError;
use crate::fit::selection::{fitted_curve, FitResult};
use crate::ppc::Rootogram;

/// Number of grid points in the exported fitted curve.
const CURVE_POINTS: usize = 101;

/// Write a posterior JSON file.
pub fn write_posterior_json(
    path: &Path,
    best: &FitResult,
    data: &[Observation],
    rootogram: &Rootogram,
) -> Result<(), AppError> {
    let file = File::create(path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to create posterior JSON '{}': {e}", path.display()),
        )
    })?;

    let curve = fitted_curve(best, data, CURVE_POINTS);
    let (traps, mu): (Vec<f64>, Vec<f64>) = curve.into_iter().unzip();

    let out = PosteriorFile {
        tool: "roach".to_string(),
        model: best.model.clone(),
        quality: best.quality.clone(),
        curve: CurveGrid { traps, mu },
        rootogram: rootogram.clone(),
    };

    serde_json::to_writer_pretty(file, &out)
        .map_err(|e| AppError::new(2, format!("Failed to write posterior JSON: {e}")))?;

    Ok(())
}

/// Read a posterior JSON file.
pub fn read_posterior_json(path: &Path) -> Result<PosteriorFile, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to open posterior JSON '{}': {e}", path.display()),
        )
    })?;
    let posterior: PosteriorFile = serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid posterior JSON: {e}")))?;
    Ok(posterior)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{generate_panel, SampleConfig};
    use crate::domain::{FitConfig, ModelSpec};
    use crate::fit::fit_and_select;
    use crate::ppc;

    #[test]
    fn posterior_json_round_trips() {
        let panel = generate_panel(&SampleConfig::new(5, 8, 2)).unwrap();
        let config = FitConfig {
            csv_path: None,
            buildings: 5,
            months: 8,
            sample_seed: 2,
            model_spec: ModelSpec::Poisson,
            chains: 2,
            warmup: 100,
            samples: 100,
            ppc_draws: 50,
            top_n: 5,
            plot: false,
            plot_width: 80,
            plot_height: 20,
            export_results: None,
            export_posterior: None,
        };
        let selection = fit_and_select(&panel.observations, &config).unwrap();
        let rootogram = ppc::rootogram(&selection.best.posterior, &panel.observations);

        let path = std::env::temp_dir().join("roach-counts-test-posterior.json");
        write_posterior_json(&path, &selection.best, &panel.observations, &rootogram).unwrap();
        let loaded = read_posterior_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.tool, "roach");
        assert_eq!(loaded.model.name, selection.best.model.name);
        assert_eq!(loaded.curve.traps.len(), CURVE_POINTS);
        assert_eq!(loaded.curve.mu.len(), CURVE_POINTS);
        assert_eq!(loaded.rootogram.observed.len(), rootogram.observed.len());
        assert!((loaded.quality.elpd - selection.best.quality.elpd).abs() < 1e-9);
    }

    #[test]
    fn unreadable_posterior_is_a_usage_error() {
        let path = std::env::temp_dir().join("roach-counts-test-missing.json");
        let err = read_posterior_json(&path).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
