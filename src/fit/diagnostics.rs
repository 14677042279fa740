//! Convergence diagnostics for the Metropolis chains.
//!
//! Implements split R-hat, autocorrelation-based effective sample size
//! (ESS), and Monte Carlo standard error (MCSE). A fit is never failed on a
//! bad diagnostic; the numbers are surfaced in the report so a human can
//! judge the chains the way the workflow intends.
//!
//! Reference: Gelman et al. (2013), "Bayesian Data Analysis", Ch. 11.

use crate::fit::sampler::Posterior;

/// Per-parameter convergence summary.
#[derive(Debug, Clone, Copy)]
pub struct ParamDiagnostics {
    pub rhat: f64,
    pub ess: f64,
    pub mcse: f64,
}

/// Threshold above which a parameter is flagged in the report.
pub const RHAT_WARN: f64 = 1.05;

/// Diagnose every parameter of a posterior.
pub fn diagnose(posterior: &Posterior) -> Vec<ParamDiagnostics> {
    (0..posterior.n_params())
        .map(|j| {
            let chains: Vec<Vec<f64>> = (0..posterior.chains)
                .map(|c| posterior.chain_column(c, j))
                .collect();

            let rhat = split_rhat(&chains);
            let ess: f64 = chains.iter().map(|c| ess_autocorr(c)).sum();

            let all = posterior.param_column(j);
            let sd = sample_sd(&all);
            let mcse = if ess > 0.0 { sd / ess.sqrt() } else { f64::INFINITY };

            ParamDiagnostics { rhat, ess, mcse }
        })
        .collect()
}

/// Split R-hat: each chain is halved, then the usual between/within variance
/// ratio is computed over the resulting groups.
pub fn split_rhat(chains: &[Vec<f64>]) -> f64 {
    let mut groups: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let half = chain.len() / 2;
        if half < 2 {
            return 1.0;
        }
        groups.push(&chain[..half]);
        groups.push(&chain[chain.len() - half..]);
    }

    let n = groups[0].len() as f64;
    let m = groups.len() as f64;

    let means: Vec<f64> = groups.iter().map(|g| mean(g)).collect();
    let vars: Vec<f64> = groups
        .iter()
        .zip(means.iter())
        .map(|(g, &mu)| g.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / (n - 1.0))
        .collect();

    let w = vars.iter().sum::<f64>() / m;
    let grand = mean(&means);
    let b = n * means.iter().map(|&mu| (mu - grand) * (mu - grand)).sum::<f64>() / (m - 1.0);

    if w <= 1e-300 {
        // Degenerate chains (e.g. a point-mass posterior) are "converged".
        return 1.0;
    }

    let var_plus = (n - 1.0) / n * w + b / n;
    (var_plus / w).sqrt()
}

/// Calculate autocorrelation at a given lag.
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    let n = values.len();
    if lag >= n {
        return 0.0;
    }

    let mu = mean(values);
    let variance: f64 = values.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / n as f64;
    if variance < 1e-15 {
        return 0.0;
    }

    let covariance: f64 = values[..n - lag]
        .iter()
        .zip(values[lag..].iter())
        .map(|(x, y)| (x - mu) * (y - mu))
        .sum::<f64>()
        / n as f64;

    covariance / variance
}

/// ESS via summed autocorrelations: `n / (1 + 2 * sum(rho_k))`, truncated
/// when the autocorrelation becomes negligible.
pub fn ess_autocorr(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 4 {
        return n as f64;
    }

    let max_lag = (n / 2).min(200);
    let mut sum_rho = 0.0;
    for lag in 1..max_lag {
        let rho = autocorrelation(values, lag);
        if rho.abs() < 0.05 {
            break;
        }
        sum_rho += rho;
    }

    let tau = 1.0 + 2.0 * sum_rho;
    if tau > 0.0 {
        (n as f64 / tau).min(n as f64)
    } else {
        n as f64
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

fn sample_sd(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mu = mean(values);
    (values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / (n - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;
    use rand_distr::StandardNormal;

    fn normal_chain(seed: u64, shift: f64, len: usize) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                z + shift
            })
            .collect()
    }

    #[test]
    fn split_rhat_near_one_for_iid_chains() {
        let chains: Vec<Vec<f64>> = (0..4).map(|c| normal_chain(c, 0.0, 500)).collect();
        let rhat = split_rhat(&chains);
        assert!(rhat < 1.05, "rhat={rhat}");
    }

    #[test]
    fn split_rhat_flags_separated_chains() {
        let chains = vec![normal_chain(1, 0.0, 500), normal_chain(2, 10.0, 500)];
        let rhat = split_rhat(&chains);
        assert!(rhat > 1.5, "rhat={rhat}");
    }

    #[test]
    fn split_rhat_handles_degenerate_chains() {
        let chains = vec![vec![2.0; 100], vec![2.0; 100]];
        assert_eq!(split_rhat(&chains), 1.0);
    }

    #[test]
    fn autocorrelation_is_one_at_lag_zero() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((autocorrelation(&values, 0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ess_close_to_n_for_iid_samples() {
        let values = normal_chain(9, 0.0, 1000);
        let ess = ess_autocorr(&values);
        assert!(ess > 500.0, "ess={ess}");
        assert!(ess <= 1000.0);
    }

    #[test]
    fn ess_shrinks_for_sticky_series() {
        // Heavily autocorrelated AR(1)-style walk.
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = 0.0;
        let values: Vec<f64> = (0..1000)
            .map(|_| {
                let z: f64 = rng.sample(StandardNormal);
                x = 0.95 * x + z;
                x
            })
            .collect();
        let ess = ess_autocorr(&values);
        assert!(ess < 500.0, "ess={ess}");
    }
}
