//! Model fitting + comparison across the ladder.
//!
//! Every enabled model is fit with the sampler and scored by WAIC computed
//! from the pointwise log-likelihood over (thinned) posterior draws:
//!
//! - `lppd = Σ_i log( mean_s exp(ll_is) )`
//! - `p_waic = Σ_i var_s(ll_is)`
//! - `elpd = lppd - p_waic`
//!
//! Selection rules:
//! 1. Exclude underdetermined models: require `n >= k + 5`
//! 2. Choose the model with maximum elpd
//! 3. If the gap to a simpler model is < 2 elpd, pick the simpler model

use crate::domain::{
    CountModel, FitConfig, FitQuality, ModelKind, ModelSpec, Observation, ParamSummary,
};
use crate::error::AppError;
use crate::fit::diagnostics;
use crate::fit::sampler::{sample_posterior, Posterior, SamplerConfig};
use crate::models::{self, NaturalParams};

/// Minimum number of extra observations beyond parameter count.
const MIN_N_BUFFER: usize = 5;

/// Maximum posterior draws used for the WAIC log-likelihood matrix.
const WAIC_MAX_DRAWS: usize = 400;

/// elpd slack within which the simpler model wins.
const PREFER_SIMPLER_MARGIN: f64 = 2.0;

/// One fitted model: serializable summary plus the raw posterior draws.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub model: CountModel,
    pub quality: FitQuality,
    pub posterior: Posterior,
}

impl FitResult {
    /// Posterior-mean parameters on the natural scale.
    pub fn posterior_mean_params(&self) -> NaturalParams {
        let p = self.model.name.coef_len();
        let coefs = self.model.params[..p].iter().map(|s| s.mean).collect();
        let inv_phi = self
            .model
            .name
            .has_dispersion()
            .then(|| self.model.params[p].mean);
        NaturalParams { coefs, inv_phi }
    }
}

/// Output of fitting + selection.
#[derive(Debug, Clone)]
pub struct FitSelection {
    pub best: FitResult,
    /// Fits for all attempted models (after guardrails).
    pub fits: Vec<FitResult>,
    /// Any models that were skipped and why (for diagnostics).
    pub skipped: Vec<(ModelKind, String)>,
}

/// Fit every enabled model and select the best.
pub fn fit_and_select(
    data: &[Observation],
    config: &FitConfig,
) -> Result<FitSelection, AppError> {
    let n = data.len();

    let model_kinds: Vec<ModelKind> = match config.model_spec {
        ModelSpec::Poisson => vec![ModelKind::Poisson],
        ModelSpec::PoissonExp => vec![ModelKind::PoissonExposure],
        ModelSpec::Negbin => vec![ModelKind::NegBinExposure],
        ModelSpec::Auto | ModelSpec::All => ModelKind::LADDER.to_vec(),
    };

    let sampler_config = SamplerConfig {
        chains: config.chains,
        warmup: config.warmup,
        samples: config.samples,
        seed: config.sample_seed,
        ..SamplerConfig::default()
    };

    let mut fits = Vec::new();
    let mut skipped = Vec::new();

    for kind in model_kinds {
        let k = kind.param_count();
        if n < k + MIN_N_BUFFER {
            skipped.push((
                kind,
                format!("Underdetermined: n={n} < k+{MIN_N_BUFFER}={}", k + MIN_N_BUFFER),
            ));
            continue;
        }

        let posterior = sample_posterior(kind, data, &sampler_config)?;
        fits.push(to_fit_result(posterior, data)?);
    }

    if fits.is_empty() {
        return Err(AppError::new(
            3,
            "Insufficient data to fit any model after guardrails.",
        ));
    }

    // If the user requested a single model, it's already the best.
    let best = if matches!(
        config.model_spec,
        ModelSpec::Poisson | ModelSpec::PoissonExp | ModelSpec::Negbin
    ) {
        fits[0].clone()
    } else {
        select_by_elpd(&fits)
    };

    Ok(FitSelection {
        best,
        fits,
        skipped,
    })
}

fn to_fit_result(posterior: Posterior, data: &[Observation]) -> Result<FitResult, AppError> {
    let params = summarize(&posterior);
    let loglik = loglik_matrix(&posterior, data);
    let (elpd, p_eff) = waic(&loglik);

    let max_rhat = params.iter().map(|p| p.rhat).fold(f64::NEG_INFINITY, f64::max);
    let min_ess = params.iter().map(|p| p.ess).fold(f64::INFINITY, f64::min);

    if !elpd.is_finite() {
        return Err(AppError::new(
            4,
            format!(
                "Non-finite WAIC for model {}.",
                posterior.kind.display_name()
            ),
        ));
    }

    Ok(FitResult {
        model: CountModel {
            name: posterior.kind,
            display_name: posterior.kind.display_name().to_string(),
            params,
        },
        quality: FitQuality {
            elpd,
            p_eff,
            waic: -2.0 * elpd,
            max_rhat,
            min_ess,
            accept_rate: posterior.accept_rate,
            n: data.len(),
        },
        posterior,
    })
}

/// Posterior summaries (moments, quantiles, convergence) per parameter.
fn summarize(posterior: &Posterior) -> Vec<ParamSummary> {
    let diags = diagnostics::diagnose(posterior);

    posterior
        .param_names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let mut values = posterior.param_column(j);
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let n = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / n;
            let sd = (values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                / (n - 1.0).max(1.0))
            .sqrt();

            ParamSummary {
                name: name.clone(),
                mean,
                sd,
                q2_5: quantile(&values, 0.025),
                q5: quantile(&values, 0.05),
                median: quantile(&values, 0.5),
                q95: quantile(&values, 0.95),
                q97_5: quantile(&values, 0.975),
                rhat: diags[j].rhat,
                ess: diags[j].ess,
                mcse: diags[j].mcse,
            }
        })
        .collect()
}

/// Linear-interpolated quantile of a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Pointwise log likelihood: `loglik[i][s]` for observation i, draw s.
fn loglik_matrix(posterior: &Posterior, data: &[Observation]) -> Vec<Vec<f64>> {
    let idx = posterior.thin_indices(WAIC_MAX_DRAWS);
    let params: Vec<NaturalParams> = idx.iter().map(|&s| posterior.params_at(s)).collect();

    data.iter()
        .map(|obs| {
            params
                .iter()
                .map(|p| models::log_lik_obs(posterior.kind, obs, p))
                .collect()
        })
        .collect()
}

/// WAIC from a pointwise log-likelihood matrix; returns `(elpd, p_waic)`.
pub fn waic(loglik: &[Vec<f64>]) -> (f64, f64) {
    let mut lppd = 0.0;
    let mut p_waic = 0.0;

    for row in loglik {
        if row.is_empty() {
            return (f64::NAN, f64::NAN);
        }
        lppd += log_mean_exp(row);

        let n = row.len() as f64;
        let mean = row.iter().sum::<f64>() / n;
        let var = row.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / (n - 1.0).max(1.0);
        p_waic += var;
    }

    (lppd - p_waic, p_waic)
}

fn log_mean_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + (sum / values.len() as f64).ln()
}

fn select_by_elpd(fits: &[FitResult]) -> FitResult {
    let mut best = &fits[0];
    for f in &fits[1..] {
        if f.quality.elpd > best.quality.elpd {
            best = f;
        }
    }

    let best_elpd = best.quality.elpd;

    // Prefer simplicity when predictive performance is a wash.
    //
    // We iterate in order of increasing complexity and pick the first fit
    // that is "close enough" to the best.
    for kind in ModelKind::LADDER {
        if let Some(f) = fits.iter().find(|f| f.model.name == kind) {
            if f.quality.elpd >= best_elpd - PREFER_SIMPLER_MARGIN {
                return f.clone();
            }
        }
    }

    best.clone()
}

/// Posterior-mean complaint rate on a traps grid, evaluated at the panel's
/// average exposure and superintendent share (for plots and exports).
pub fn fitted_curve(fit: &FitResult, data: &[Observation], n: usize) -> Vec<(f64, f64)> {
    let params = fit.posterior_mean_params();
    let n = n.max(2);

    let traps_max = data.iter().map(|o| o.traps).fold(1.0_f64, f64::max);
    let count = data.len().max(1) as f64;
    let exposure = data.iter().map(|o| o.exposure).sum::<f64>() / count;
    let super_share = data.iter().map(|o| o.live_in_super).sum::<f64>() / count;

    let reference = |traps: f64| -> Observation {
        Observation {
            id: String::new(),
            building_id: String::new(),
            month: chrono::NaiveDate::MIN,
            traps,
            complaints: 0,
            exposure,
            log_exposure: exposure.ln(),
            live_in_super: super_share,
            meta: Default::default(),
        }
    };

    (0..n)
        .map(|i| {
            let t = traps_max * i as f64 / (n - 1) as f64;
            let mu = models::predict_mean(fit.model.name, &reference(t), &params);
            (t, mu)
        })
        .collect()
}
