//! Posterior predictive checking.
//!
//! The fitted model is asked to re-generate the panel: for a thinned subset
//! of posterior draws we simulate a full replicate dataset and compare test
//! statistics of the replicates against the observed panel. A model that
//! cannot reproduce the observed proportion of zeros or the observed spread
//! fails these checks in plain sight, which is the point.
//!
//! The rootogram compares observed frequencies of each count value against
//! the posterior-averaged expected frequencies, on the square-root scale.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::domain::Observation;
use crate::error::AppError;
use crate::fit::sampler::Posterior;
use crate::models;

/// Maximum draws used for the rootogram's expected frequencies.
const ROOTOGRAM_MAX_DRAWS: usize = 200;

/// Largest count bin the rootogram will extend to.
const ROOTOGRAM_COUNT_CAP: u64 = 40;

/// One posterior predictive test statistic.
#[derive(Debug, Clone)]
pub struct PpcStat {
    pub name: String,
    pub observed: f64,
    /// Mean of the statistic over replicate datasets.
    pub rep_mean: f64,
    /// Tail probability `P(T_rep >= T_obs)`.
    pub p_value: f64,
}

/// Observed vs. expected frequency per count value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rootogram {
    pub max_count: u64,
    pub observed: Vec<f64>,
    pub expected: Vec<f64>,
}

/// Everything the report needs from the PPC pass.
#[derive(Debug, Clone)]
pub struct PpcSummary {
    pub stats: Vec<PpcStat>,
    pub rootogram: Rootogram,
    pub n_rep: usize,
}

/// Run the posterior predictive checks for one fitted model.
pub fn run_ppc(
    posterior: &Posterior,
    data: &[Observation],
    max_rep: usize,
    seed: u64,
) -> Result<PpcSummary, AppError> {
    if data.is_empty() {
        return Err(AppError::new(3, "No observations for the PPC."));
    }
    if posterior.n_draws() == 0 {
        return Err(AppError::new(4, "Empty posterior passed to the PPC."));
    }

    let observed: Vec<u64> = data.iter().map(|o| o.complaints).collect();
    let t_obs = test_stats(&observed);

    let idx = posterior.thin_indices(max_rep.max(1));
    let mut rep_sums = [0.0; STAT_COUNT];
    let mut rep_exceed = [0usize; STAT_COUNT];
    let mut replicate = Vec::with_capacity(data.len());

    for &s in &idx {
        let params = posterior.params_at(s);
        let mut rng = StdRng::seed_from_u64(replicate_seed(seed, s));

        replicate.clear();
        for obs in data {
            replicate.push(models::simulate_replicate(
                posterior.kind,
                obs,
                &params,
                &mut rng,
            )?);
        }

        let t_rep = test_stats(&replicate);
        for k in 0..STAT_COUNT {
            rep_sums[k] += t_rep[k];
            if t_rep[k] >= t_obs[k] {
                rep_exceed[k] += 1;
            }
        }
    }

    let n_rep = idx.len();
    let stats = STAT_NAMES
        .iter()
        .enumerate()
        .map(|(k, name)| PpcStat {
            name: (*name).to_string(),
            observed: t_obs[k],
            rep_mean: rep_sums[k] / n_rep as f64,
            p_value: rep_exceed[k] as f64 / n_rep as f64,
        })
        .collect();

    Ok(PpcSummary {
        stats,
        rootogram: rootogram(posterior, data),
        n_rep,
    })
}

const STAT_COUNT: usize = 4;
const STAT_NAMES: [&str; STAT_COUNT] = ["mean", "sd", "prop_zero", "max"];

fn test_stats(counts: &[u64]) -> [f64; STAT_COUNT] {
    let n = counts.len().max(1) as f64;
    let mean = counts.iter().sum::<u64>() as f64 / n;
    let var = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0).max(1.0);
    let zeros = counts.iter().filter(|&&c| c == 0).count() as f64 / n;
    let max = counts.iter().max().copied().unwrap_or(0) as f64;
    [mean, var.sqrt(), zeros, max]
}

/// Observed and posterior-expected frequencies per count value.
pub fn rootogram(posterior: &Posterior, data: &[Observation]) -> Rootogram {
    let observed_max = data.iter().map(|o| o.complaints).max().unwrap_or(0);
    let max_count = observed_max.max(10).min(ROOTOGRAM_COUNT_CAP);
    let bins = (max_count + 1) as usize;

    let mut observed = vec![0.0; bins];
    for o in data {
        if o.complaints <= max_count {
            observed[o.complaints as usize] += 1.0;
        }
    }

    let idx = posterior.thin_indices(ROOTOGRAM_MAX_DRAWS);
    let mut expected = vec![0.0; bins];
    for &s in &idx {
        let params = posterior.params_at(s);
        for obs in data {
            let mu = models::predict_mean(posterior.kind, obs, &params);
            for k in 0..bins {
                expected[k] +=
                    models::count_ln_pmf(posterior.kind, k as u64, mu, &params).exp();
            }
        }
    }
    let draws = idx.len().max(1) as f64;
    for e in &mut expected {
        *e /= draws;
    }

    Rootogram {
        max_count,
        observed,
        expected,
    }
}

fn replicate_seed(seed: u64, draw: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    draw.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ModelKind, ObsMeta};
    use chrono::NaiveDate;

    fn obs(traps: f64, complaints: u64) -> Observation {
        Observation {
            id: format!("B01/{traps}"),
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

    fn point_posterior(alpha: f64, beta: f64, n_draws: usize) -> Posterior {
        Posterior {
            kind: ModelKind::Poisson,
            param_names: ModelKind::Poisson.param_names(),
            draws: vec![vec![alpha, beta]; n_draws],
            draws_per_chain: n_draws / 2,
            chains: 2,
            accept_rate: 0.3,
        }
    }

    fn panel() -> Vec<Observation> {
        (0..30)
            .map(|i| {
                let traps = (i % 6) as f64;
                obs(traps, (1.2 - 0.1 * traps).exp().round() as u64)
            })
            .collect()
    }

    #[test]
    fn ppc_is_deterministic_and_bounded() {
        let data = panel();
        let posterior = point_posterior(1.2, -0.1, 50);

        let a = run_ppc(&posterior, &data, 40, 9).unwrap();
        let b = run_ppc(&posterior, &data, 40, 9).unwrap();

        assert_eq!(a.n_rep, 40);
        assert_eq!(a.stats.len(), 4);
        for (x, y) in a.stats.iter().zip(b.stats.iter()) {
            assert_eq!(x.p_value, y.p_value);
            assert_eq!(x.rep_mean, y.rep_mean);
            assert!((0.0..=1.0).contains(&x.p_value));
        }
    }

    #[test]
    fn ppc_mean_stat_tracks_the_model() {
        // Replicates from the generating parameters should put the observed
        // mean well inside the replicate distribution.
        let data = panel();
        let posterior = point_posterior(1.2, -0.1, 50);
        let ppc = run_ppc(&posterior, &data, 100, 3).unwrap();

        let mean_stat = ppc.stats.iter().find(|s| s.name == "mean").unwrap();
        assert!(
            mean_stat.p_value > 0.01 && mean_stat.p_value < 0.99,
            "p={}",
            mean_stat.p_value
        );
    }

    #[test]
    fn rootogram_observed_counts_sum_to_n() {
        let data = panel();
        let posterior = point_posterior(1.2, -0.1, 20);
        let root = rootogram(&posterior, &data);

        assert_eq!(root.observed.len(), root.max_count as usize + 1);
        assert_eq!(root.expected.len(), root.observed.len());
        let total: f64 = root.observed.iter().sum();
        assert!((total - data.len() as f64).abs() < 1e-9);
        assert!(root.expected.iter().all(|e| *e >= 0.0));
    }

    #[test]
    fn rootogram_expected_mass_is_near_n() {
        // With a cap well above the plausible counts, the expected
        // frequencies should account for nearly every observation.
        let data = panel();
        let posterior = point_posterior(1.2, -0.1, 20);
        let root = rootogram(&posterior, &data);
        let total: f64 = root.expected.iter().sum();
        assert!(
            (total - data.len() as f64).abs() < 0.5,
            "expected mass {total}"
        );
    }

    #[test]
    fn empty_panel_is_rejected() {
        let posterior = point_posterior(1.0, 0.0, 10);
        let err = run_ppc(&posterior, &[], 10, 1).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
