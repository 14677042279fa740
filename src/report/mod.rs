//! Reporting utilities: residuals, rankings, and the recovery table.

pub mod format;

pub use format::{format_ppc, format_rankings, format_recovery, format_run_summary};

use crate::domain::{Observation, RecoveryRow, TrueParams};
use crate::error::AppError;
use crate::fit::FitResult;
use crate::models;

/// A per-observation fitted result (used for ranking and exports).
#[derive(Debug, Clone)]
pub struct ObsResidual {
    pub obs: Observation,
    /// Posterior-mean complaint rate.
    pub mu: f64,
    /// Model standard deviation at `mu`.
    pub sd: f64,
    /// Standardized residual `(y - mu) / sd`.
    pub residual: f64,
}

/// Under/over-predicted rankings (top-N each side).
///
/// "Under-predicted" building-months saw many more complaints than the model
/// expected; "over-predicted" saw far fewer.
#[derive(Debug, Clone)]
pub struct Rankings {
    pub under: Vec<ObsResidual>,
    pub over: Vec<ObsResidual>,
}

/// Compute posterior-mean fits and standardized residuals for each
/// building-month.
pub fn compute_residuals(
    data: &[Observation],
    fit: &FitResult,
) -> Result<Vec<ObsResidual>, AppError> {
    let params = fit.posterior_mean_params();
    let kind = fit.model.name;

    let mut out = Vec::with_capacity(data.len());
    for obs in data {
        let mu = models::predict_mean(kind, obs, &params);
        if !mu.is_finite() {
            return Err(AppError::new(
                4,
                "Non-finite model prediction during residual computation.",
            ));
        }
        let sd = models::variance(kind, mu, &params).max(1e-12).sqrt();
        let residual = (obs.complaints as f64 - mu) / sd;
        out.push(ObsResidual {
            obs: obs.clone(),
            mu,
            sd,
            residual,
        });
    }
    Ok(out)
}

/// Rank the most under- and over-predicted building-months.
pub fn rank_under_over(residuals: &[ObsResidual], top_n: usize) -> Rankings {
    let mut sorted = residuals.to_vec();
    sorted.sort_by(|a, b| b.residual.partial_cmp(&a.residual).unwrap_or(std::cmp::Ordering::Equal));

    let under = sorted.iter().take(top_n).cloned().collect();

    let mut sorted_over = residuals.to_vec();
    sorted_over.sort_by(|a, b| a.residual.partial_cmp(&b.residual).unwrap_or(std::cmp::Ordering::Equal));
    let over = sorted_over.iter().take(top_n).cloned().collect();

    Rankings { under, over }
}

/// The fake-data check: does the posterior 90% interval cover each true
/// parameter value?
pub fn recovery_rows(truth: &TrueParams, fit: &FitResult) -> Vec<RecoveryRow> {
    fit.model
        .params
        .iter()
        .filter_map(|summary| {
            let true_value = match summary.name.as_str() {
                "alpha" => truth.alpha,
                "beta_traps" => truth.beta_traps,
                "beta_super" => truth.beta_super,
                "inv_phi" => truth.inv_phi,
                _ => return None,
            };
            Some(RecoveryRow {
                name: summary.name.clone(),
                truth: true_value,
                mean: summary.mean,
                lo90: summary.q5,
                hi90: summary.q95,
                inside: summary.q5 <= true_value && true_value <= summary.q95,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CountModel, FitQuality, ModelKind, ObsMeta, ParamSummary,
    };
    use crate::fit::sampler::Posterior;
    use chrono::NaiveDate;

    fn obs(id: &str, traps: f64, complaints: u64) -> Observation {
        Observation {
            id: id.to_string(),
            building_id: "B01".to_string(),
            month: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
            traps,
            complaints,
            exposure: 1.0,
            log_exposure: 0.0,
            live_in_super: 0.0,
            meta: ObsMeta::default(),
        }
    }

    fn summary(name: &str, mean: f64, q5: f64, q95: f64) -> ParamSummary {
        ParamSummary {
            name: name.to_string(),
            mean,
            sd: 0.1,
            q2_5: q5 - 0.05,
            q5,
            median: mean,
            q95,
            q97_5: q95 + 0.05,
            rhat: 1.0,
            ess: 500.0,
            mcse: 0.01,
        }
    }

    pub(super) fn poisson_fit(alpha: f64, beta: f64) -> FitResult {
        FitResult {
            model: CountModel {
                name: ModelKind::Poisson,
                display_name: ModelKind::Poisson.display_name().to_string(),
                params: vec![
                    summary("alpha", alpha, alpha - 0.2, alpha + 0.2),
                    summary("beta_traps", beta, beta - 0.1, beta + 0.1),
                ],
            },
            quality: FitQuality {
                elpd: -10.0,
                p_eff: 2.0,
                waic: 20.0,
                max_rhat: 1.0,
                min_ess: 500.0,
                accept_rate: 0.3,
                n: 2,
            },
            posterior: Posterior {
                kind: ModelKind::Poisson,
                param_names: ModelKind::Poisson.param_names(),
                draws: vec![vec![alpha, beta]; 10],
                draws_per_chain: 5,
                chains: 2,
                accept_rate: 0.3,
            },
        }
    }

    #[test]
    fn compute_residuals_basic() {
        // alpha = ln 4, beta = 0 -> mu = 4, sd = 2 for every row.
        let fit = poisson_fit(4.0_f64.ln(), 0.0);
        let data = vec![obs("B01/2017-01", 1.0, 4), obs("B01/2017-02", 2.0, 8)];

        let residuals = compute_residuals(&data, &fit).unwrap();
        assert_eq!(residuals.len(), 2);
        assert!(residuals[0].residual.abs() < 1e-9);
        assert!((residuals[1].residual - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rank_under_over_basic() {
        let fit = poisson_fit(4.0_f64.ln(), 0.0);
        let data = vec![
            obs("B1", 1.0, 4),
            obs("B2", 2.0, 9),
            obs("B3", 3.0, 0),
        ];
        let residuals = compute_residuals(&data, &fit).unwrap();
        let rankings = rank_under_over(&residuals, 1);

        assert_eq!(rankings.under.len(), 1);
        assert_eq!(rankings.under[0].obs.id, "B2");
        assert_eq!(rankings.over.len(), 1);
        assert_eq!(rankings.over[0].obs.id, "B3");
    }

    #[test]
    fn recovery_rows_flag_coverage() {
        let fit = poisson_fit(1.0, -0.2);
        let truth = TrueParams {
            alpha: 1.1,       // inside [0.8, 1.2]
            beta_traps: 0.5,  // outside [-0.3, -0.1]
            beta_super: 0.0,
            inv_phi: 0.0,
        };

        let rows = recovery_rows(&truth, &fit);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].inside);
        assert!(!rows[1].inside);
    }
}
