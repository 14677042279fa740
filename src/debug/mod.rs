//! Debug bundle writer for inspecting a full run offline.
//!
//! Dumps the panel, priors, every model's posterior table, and the PPC
//! results into one timestamped markdown file under `debug/`.

use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::PathBuf;

use chrono::Local;

use crate::app::pipeline::RunOutput;
use crate::domain::FitConfig;
use crate::error::AppError;
use crate::models;

pub fn write_run_bundle(run: &RunOutput, config: &FitConfig) -> Result<PathBuf, AppError> {
    let dir = PathBuf::from("debug");
    create_dir_all(&dir).map_err(|e| AppError::new(4, format!("Failed to create debug dir: {e}")))?;

    let ts = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("roach_debug_seed{}_{}.md", config.sample_seed, ts));

    let mut file = File::create(&path)
        .map_err(|e| AppError::new(4, format!("Failed to create debug file: {e}")))?;

    write_bundle(&mut file, run, config)
        .map_err(|e| AppError::new(4, format!("Failed to write debug bundle: {e}")))?;

    Ok(path)
}

fn write_bundle(
    file: &mut File,
    run: &RunOutput,
    config: &FitConfig,
) -> Result<(), std::io::Error> {
    writeln!(file, "# roach debug bundle")?;
    writeln!(file, "- generated: {}", Local::now().to_rfc3339())?;
    writeln!(file, "- source: {}", run.data.input_spec.source)?;
    writeln!(file, "- seed: {}", config.sample_seed)?;
    writeln!(
        file,
        "- sampler: {} chains x ({} warmup + {} draws)",
        config.chains, config.warmup, config.samples
    )?;

    let s = &run.data.stats;
    writeln!(file, "\n## Panel")?;
    writeln!(file, "| n | buildings | traps | complaints mean | sd | zeros | max |")?;
    writeln!(file, "| - | - | - | - | - | - | - |")?;
    writeln!(
        file,
        "| {} | {} | [{:.0}, {:.0}] | {:.3} | {:.3} | {:.1}% | {} |",
        s.n_obs,
        s.n_buildings,
        s.traps_min,
        s.traps_max,
        s.complaints_mean,
        s.complaints_sd,
        100.0 * s.prop_zero,
        s.complaints_max
    )?;

    writeln!(file, "\n## Priors")?;
    writeln!(
        file,
        "- alpha ~ Normal({:.3}, {})",
        models::PRIOR_ALPHA.0,
        models::PRIOR_ALPHA.1
    )?;
    writeln!(
        file,
        "- beta_traps ~ Normal({}, {})",
        models::PRIOR_TRAPS.0,
        models::PRIOR_TRAPS.1
    )?;
    writeln!(
        file,
        "- beta_super ~ Normal({}, {})",
        models::PRIOR_SUPER.0,
        models::PRIOR_SUPER.1
    )?;
    writeln!(
        file,
        "- inv_phi ~ half-Normal(0, {})",
        models::PRIOR_INV_PHI_SD
    )?;

    writeln!(file, "\n## Model comparison")?;
    writeln!(file, "| model | elpd | p_eff | waic | accept | max_rhat | min_ess |")?;
    writeln!(file, "| - | - | - | - | - | - | - |")?;
    for fit in &run.selection.fits {
        let chosen = if fit.model.name == run.selection.best.model.name {
            " (chosen)"
        } else {
            ""
        };
        writeln!(
            file,
            "| {}{chosen} | {:.2} | {:.2} | {:.2} | {:.2} | {:.3} | {:.0} |",
            fit.model.display_name,
            fit.quality.elpd,
            fit.quality.p_eff,
            fit.quality.waic,
            fit.quality.accept_rate,
            fit.quality.max_rhat,
            fit.quality.min_ess
        )?;
    }
    for (kind, reason) in &run.selection.skipped {
        writeln!(file, "- skipped {}: {}", kind.display_name(), reason)?;
    }

    for fit in &run.selection.fits {
        writeln!(file, "\n## Posterior: {}", fit.model.display_name)?;
        writeln!(file, "| param | mean | sd | 5% | 50% | 95% | rhat | ess | mcse |")?;
        writeln!(file, "| - | - | - | - | - | - | - | - | - |")?;
        for p in &fit.model.params {
            writeln!(
                file,
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} | {:.3} | {:.0} | {:.4} |",
                p.name, p.mean, p.sd, p.q5, p.median, p.q95, p.rhat, p.ess, p.mcse
            )?;
        }
    }

    writeln!(file, "\n## Posterior predictive checks ({} reps)", run.ppc.n_rep)?;
    writeln!(file, "| stat | observed | rep_mean | P(rep>=obs) |")?;
    writeln!(file, "| - | - | - | - |")?;
    for stat in &run.ppc.stats {
        writeln!(
            file,
            "| {} | {:.3} | {:.3} | {:.3} |",
            stat.name, stat.observed, stat.rep_mean, stat.p_value
        )?;
    }

    writeln!(file, "\n## Rootogram")?;
    writeln!(file, "| count | observed | expected |")?;
    writeln!(file, "| - | - | - |")?;
    for (k, (obs, exp)) in run
        .ppc
        .rootogram
        .observed
        .iter()
        .zip(run.ppc.rootogram.expected.iter())
        .enumerate()
    {
        writeln!(file, "| {k} | {obs:.0} | {exp:.2} |")?;
    }

    Ok(())
}
