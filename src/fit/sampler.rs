//! The MCMC engine: adaptive random-walk Metropolis.
//!
//! Given a model kind and a panel, we:
//! - find the posterior mode with IRLS and build a proposal covariance from
//!   the inverse observed information (the intercept and the traps slope are
//!   strongly correlated, so proposals must be correlated too)
//! - run several independent chains (in parallel), each with a warmup phase
//!   that tunes a global step-size factor toward a target acceptance rate
//! - return the retained draws on the natural parameter scale
//!
//! The sampler is deliberately a black box to the rest of the tool: model M
//! plus data D in, posterior draws out. Convergence is *checked* downstream
//! (split R-hat / ESS in [`crate::fit::diagnostics`]), never assumed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::domain::{ModelKind, Observation};
use crate::error::AppError;
use crate::math::{moment_inv_phi, poisson_irls};
use crate::models;
use crate::models::NaturalParams;

/// Iterations per warmup adaptation window.
const ADAPT_WINDOW: usize = 50;

/// Multiplicative step-size updates during warmup.
const ADAPT_GROW: f64 = 1.25;
const ADAPT_SHRINK: f64 = 0.8;

/// Sampler settings (chains, iteration counts, seeding).
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub chains: usize,
    pub warmup: usize,
    pub samples: usize,
    pub seed: u64,
    /// Acceptance rate the warmup adaptation steers toward.
    pub target_accept: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            warmup: 1000,
            samples: 1000,
            seed: 42,
            target_accept: 0.30,
        }
    }
}

/// Posterior draws for one model, on the natural parameter scale.
///
/// Draws are stored draw-major with chains concatenated in chain order, so
/// `draws[c * draws_per_chain + t]` is draw `t` of chain `c`.
#[derive(Debug, Clone)]
pub struct Posterior {
    pub kind: ModelKind,
    pub param_names: Vec<String>,
    pub draws: Vec<Vec<f64>>,
    pub draws_per_chain: usize,
    pub chains: usize,
    pub accept_rate: f64,
}

impl Posterior {
    pub fn n_draws(&self) -> usize {
        self.draws.len()
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    /// All draws of one parameter, across chains.
    pub fn param_column(&self, j: usize) -> Vec<f64> {
        self.draws.iter().map(|d| d[j]).collect()
    }

    /// Draws of one parameter within one chain.
    pub fn chain_column(&self, chain: usize, j: usize) -> Vec<f64> {
        let start = chain * self.draws_per_chain;
        self.draws[start..start + self.draws_per_chain]
            .iter()
            .map(|d| d[j])
            .collect()
    }

    /// Evenly spaced draw indices, at most `max` of them.
    pub fn thin_indices(&self, max: usize) -> Vec<usize> {
        let n = self.n_draws();
        if n <= max || max == 0 {
            return (0..n).collect();
        }
        (0..max).map(|i| i * n / max).collect()
    }

    /// Natural-scale parameters of one draw.
    pub fn params_at(&self, idx: usize) -> NaturalParams {
        let row = &self.draws[idx];
        let p = self.kind.coef_len();
        NaturalParams {
            coefs: row[..p].to_vec(),
            inv_phi: self.kind.has_dispersion().then(|| row[p]),
        }
    }
}

struct ChainRun {
    draws: Vec<Vec<f64>>,
    accepted: usize,
}

/// Fit one model: IRLS initialization, then parallel Metropolis chains.
pub fn sample_posterior(
    kind: ModelKind,
    data: &[Observation],
    config: &SamplerConfig,
) -> Result<Posterior, AppError> {
    if data.is_empty() {
        return Err(AppError::new(3, "No observations to fit."));
    }
    if config.chains == 0 {
        return Err(AppError::new(2, "Sampler needs at least one chain."));
    }
    if config.samples < 10 {
        return Err(AppError::new(2, "Sampler needs at least 10 retained draws."));
    }
    if !(config.target_accept > 0.0 && config.target_accept < 1.0) {
        return Err(AppError::new(2, "Invalid target acceptance rate."));
    }

    let (theta0, chol) = initialize(kind, data)?;
    if !models::log_posterior(kind, data, &theta0).is_finite() {
        return Err(AppError::new(
            4,
            "Initialization produced a non-finite posterior.",
        ));
    }

    let runs: Vec<Result<ChainRun, AppError>> = (0..config.chains)
        .into_par_iter()
        .map(|chain| {
            let seed = chain_seed(config.seed, chain, kind, data.len());
            run_chain(kind, data, &theta0, &chol, config, seed)
        })
        .collect();

    let mut draws = Vec::with_capacity(config.chains * config.samples);
    let mut accepted = 0usize;
    for run in runs {
        let run = run?;
        accepted += run.accepted;
        draws.extend(run.draws);
    }

    let total = (config.chains * config.samples).max(1);
    Ok(Posterior {
        kind,
        param_names: kind.param_names(),
        draws,
        draws_per_chain: config.samples,
        chains: config.chains,
        accept_rate: accepted as f64 / total as f64,
    })
}

/// IRLS mode + a proposal Cholesky factor from the inverse observed
/// information, extended with a moment estimate of the dispersion for the
/// negative binomial.
fn initialize(kind: ModelKind, data: &[Observation]) -> Result<(Vec<f64>, DMatrix<f64>), AppError> {
    let n = data.len();
    let p = kind.coef_len();
    let dim = kind.param_count();

    let mut design = DMatrix::<f64>::zeros(n, p);
    let mut offsets = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut row = vec![0.0; p];

    for (i, obs) in data.iter().enumerate() {
        models::fill_design_row(kind, obs, &mut row);
        for (j, v) in row.iter().enumerate() {
            design[(i, j)] = *v;
        }
        offsets.push(models::offset(kind, obs));
        y.push(obs.complaints as f64);
    }

    let irls = poisson_irls(&design, &offsets, &y, 50, 1e-8)?;

    let inv_phi0 = if kind.has_dispersion() {
        let params = NaturalParams {
            coefs: irls.coefs.clone(),
            inv_phi: None,
        };
        let mu: Vec<f64> = data
            .iter()
            .map(|obs| models::predict_mean(kind, obs, &params))
            .collect();
        Some(moment_inv_phi(&y, &mu))
    } else {
        None
    };
    let theta = models::unconstrained_from(kind, &irls.coefs, inv_phi0);

    // Proposal covariance: inverse information for the coefficient block,
    // a fixed variance for the log-dispersion coordinate.
    let mut cov = DMatrix::<f64>::zeros(dim, dim);
    match irls.info.clone().try_inverse() {
        Some(inv) => {
            for j in 0..p {
                for k in 0..p {
                    cov[(j, k)] = inv[(j, k)];
                }
            }
        }
        None => {
            for j in 0..p {
                cov[(j, j)] = irls.scales[j] * irls.scales[j];
            }
        }
    }
    if kind.has_dispersion() {
        cov[(p, p)] = 0.09;
    }

    let chol = match Cholesky::new(cov) {
        Some(c) => c.l().clone_owned(),
        None => {
            let mut diag = DMatrix::<f64>::zeros(dim, dim);
            for j in 0..p {
                diag[(j, j)] = irls.scales[j];
            }
            if kind.has_dispersion() {
                diag[(p, p)] = 0.3;
            }
            diag
        }
    };

    Ok((theta, chol))
}

fn run_chain(
    kind: ModelKind,
    data: &[Observation],
    theta0: &[f64],
    chol: &DMatrix<f64>,
    config: &SamplerConfig,
    seed: u64,
) -> Result<ChainRun, AppError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dim = theta0.len();

    let step = |rng: &mut StdRng, spread: f64| -> DVector<f64> {
        let z = DVector::<f64>::from_fn(dim, |_, _| rng.sample(StandardNormal));
        chol * z * spread
    };

    // Overdispersed starting points: jitter around the mode, shrinking the
    // jitter until the log posterior is finite.
    let mut theta = theta0.to_vec();
    let mut lp = f64::NEG_INFINITY;
    for attempt in 0..20 {
        let jitter = step(&mut rng, 2.0 / (attempt + 1) as f64);
        let candidate: Vec<f64> = (0..dim).map(|j| theta0[j] + jitter[j]).collect();
        let candidate_lp = models::log_posterior(kind, data, &candidate);
        if candidate_lp.is_finite() {
            theta = candidate;
            lp = candidate_lp;
            break;
        }
    }
    if !lp.is_finite() {
        theta = theta0.to_vec();
        lp = models::log_posterior(kind, data, &theta);
        if !lp.is_finite() {
            return Err(AppError::new(4, "Chain failed to find a finite start."));
        }
    }

    // Classic random-walk scaling for the initial step size.
    let mut factor = 2.38 / (dim as f64).sqrt();
    let mut window_accepted = 0usize;
    let mut window_total = 0usize;
    let mut accepted = 0usize;
    let mut draws = Vec::with_capacity(config.samples);
    let mut proposal = vec![0.0; dim];

    for iter in 0..config.warmup + config.samples {
        let delta = step(&mut rng, factor);
        for j in 0..dim {
            proposal[j] = theta[j] + delta[j];
        }

        let proposal_lp = models::log_posterior(kind, data, &proposal);
        let u: f64 = rng.r#gen();
        let accept = proposal_lp.is_finite() && proposal_lp - lp > u.ln();
        if accept {
            theta.copy_from_slice(&proposal);
            lp = proposal_lp;
        }

        let in_warmup = iter < config.warmup;
        if in_warmup {
            window_total += 1;
            window_accepted += usize::from(accept);
            if window_total == ADAPT_WINDOW {
                let rate = window_accepted as f64 / window_total as f64;
                factor *= if rate > config.target_accept { ADAPT_GROW } else { ADAPT_SHRINK };
                factor = factor.clamp(1e-3, 1e3);
                window_total = 0;
                window_accepted = 0;
            }
        } else {
            accepted += usize::from(accept);
            let nat = NaturalParams::from_unconstrained(kind, &theta);
            let mut row = nat.coefs;
            if let Some(inv_phi) = nat.inv_phi {
                row.push(inv_phi);
            }
            draws.push(row);
        }
    }

    Ok(ChainRun { draws, accepted })
}

/// Chain seeds mix the user seed with the chain index, the model kind, and
/// the panel size so distinct fits never share RNG streams.
fn chain_seed(seed: u64, chain: usize, kind: ModelKind, n: usize) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    chain.hash(&mut hasher);
    kind.hash(&mut hasher);
    n.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{generate_panel, SampleConfig as PanelConfig};
    use crate::fit::diagnostics;
    use crate::domain::TrueParams;

    fn quick_config() -> SamplerConfig {
        SamplerConfig {
            chains: 4,
            warmup: 300,
            samples: 300,
            seed: 7,
            target_accept: 0.30,
        }
    }

    fn demo_panel() -> Vec<Observation> {
        let mut cfg = PanelConfig::new(10, 12, 11);
        cfg.truth = TrueParams {
            inv_phi: 0.0,
            ..TrueParams::default()
        };
        generate_panel(&cfg).unwrap().observations
    }

    #[test]
    fn sampler_is_deterministic_for_a_fixed_seed() {
        let data = demo_panel();
        let config = quick_config();
        let a = sample_posterior(ModelKind::PoissonExposure, &data, &config).unwrap();
        let b = sample_posterior(ModelKind::PoissonExposure, &data, &config).unwrap();

        assert_eq!(a.n_draws(), 4 * 300);
        assert_eq!(a.draws, b.draws);
        assert_eq!(a.accept_rate, b.accept_rate);
    }

    #[test]
    fn sampler_recovers_trap_effect_on_poisson_panel() {
        let data = demo_panel();
        let posterior =
            sample_posterior(ModelKind::PoissonExposure, &data, &quick_config()).unwrap();

        assert!(posterior.accept_rate > 0.05 && posterior.accept_rate < 0.95);

        let beta: Vec<f64> = posterior.param_column(1);
        let mean = beta.iter().sum::<f64>() / beta.len() as f64;
        let truth = TrueParams::default().beta_traps;
        assert!(
            (mean - truth).abs() < 0.1,
            "posterior mean {mean:.3} too far from {truth}"
        );

        let diag = diagnostics::diagnose(&posterior);
        let max_rhat = diag.iter().map(|d| d.rhat).fold(0.0_f64, f64::max);
        assert!(max_rhat < 1.2, "max rhat {max_rhat:.3}");
    }

    #[test]
    fn negbin_posterior_keeps_dispersion_positive() {
        let data = generate_panel(&PanelConfig::new(8, 10, 3)).unwrap().observations;
        let posterior =
            sample_posterior(ModelKind::NegBinExposure, &data, &quick_config()).unwrap();

        assert_eq!(posterior.param_names.last().map(String::as_str), Some("inv_phi"));
        let inv_phi = posterior.param_column(3);
        assert!(inv_phi.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn thin_indices_are_even_and_bounded() {
        let data = demo_panel();
        let posterior =
            sample_posterior(ModelKind::Poisson, &data, &quick_config()).unwrap();
        let idx = posterior.thin_indices(100);
        assert_eq!(idx.len(), 100);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
        assert!(*idx.last().unwrap() < posterior.n_draws());
    }

    #[test]
    fn empty_panel_is_rejected() {
        let err = sample_posterior(ModelKind::Poisson, &[], &quick_config()).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
