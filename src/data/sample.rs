//! Synthetic building-month panel generation.
//!
//! The generator serves two purposes: it is the built-in demo dataset when no
//! CSV is supplied, and it is the data source for the fake-data recovery
//! check (simulate with known parameters, fit, confirm the posterior covers
//! the truth). Counts come from the gamma-Poisson mixture, so the generated
//! panel is overdispersed exactly the way the negative-binomial model
//! expects.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{Months, NaiveDate};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Gamma, Poisson};

use crate::data::ingest::{IngestedData, InputSpec};
use crate::domain::{ObsMeta, Observation, TrueParams};
use crate::error::AppError;

/// Probability that a building has a live-in superintendent.
const SUPER_PROB: f64 = 0.3;

/// Exposure range in thousands of square feet.
const EXPOSURE_RANGE: (f64, f64) = (0.6, 3.5);

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub buildings: usize,
    pub months: usize,
    pub seed: u64,
    pub truth: TrueParams,
}

impl SampleConfig {
    pub fn new(buildings: usize, months: usize, seed: u64) -> Self {
        Self {
            buildings,
            months,
            seed,
            truth: TrueParams::default(),
        }
    }
}

/// Generate a deterministic synthetic panel.
pub fn generate_panel(config: &SampleConfig) -> Result<IngestedData, AppError> {
    if config.buildings == 0 || config.months == 0 {
        return Err(AppError::new(2, "Panel shape must be at least 1x1."));
    }
    let t = &config.truth;
    if !(t.alpha.is_finite()
        && t.beta_traps.is_finite()
        && t.beta_super.is_finite()
        && t.inv_phi.is_finite()
        && t.inv_phi >= 0.0)
    {
        return Err(AppError::new(2, "Invalid true parameter settings."));
    }

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let start = NaiveDate::from_ymd_opt(2017, 1, 1)
        .ok_or_else(|| AppError::new(4, "Failed to build panel start month."))?;

    let mut observations = Vec::with_capacity(config.buildings * config.months);

    for b in 0..config.buildings {
        let building_id = format!("B{:02}", b + 1);
        let exposure = rng.gen_range(EXPOSURE_RANGE.0..=EXPOSURE_RANGE.1);
        let live_in_super = if rng.r#gen::<f64>() < SUPER_PROB { 1.0 } else { 0.0 };
        let base_traps: i64 = rng.gen_range(1..=12);
        let age_of_building = rng.gen_range(10.0..=90.0_f64).round();

        for m in 0..config.months {
            let month = start
                .checked_add_months(Months::new(m as u32))
                .ok_or_else(|| AppError::new(4, "Month arithmetic overflow."))?;

            // Trap counts drift a little month to month; pest control crews
            // add and remove bait stations.
            let traps = (base_traps + rng.gen_range(-1..=2)).clamp(0, 16) as f64;

            let log_mu = exposure.ln()
                + t.alpha
                + t.beta_traps * traps
                + t.beta_super * live_in_super;
            let mu = log_mu.clamp(-30.0, 30.0).exp();

            let complaints = draw_count(&mut rng, mu, t.inv_phi)?;

            observations.push(Observation {
                id: format!("{building_id}/{}", month.format("%Y-%m")),
                building_id: building_id.clone(),
                month,
                traps,
                complaints,
                exposure,
                log_exposure: exposure.ln(),
                live_in_super,
                meta: ObsMeta {
                    age_of_building: Some(age_of_building),
                },
            });
        }
    }

    let input_spec = InputSpec {
        source: format!(
            "synthetic panel ({}x{} months, seed {})",
            config.buildings, config.months, config.seed
        ),
        has_exposure: true,
        has_super: true,
        unit_note: None,
    };

    IngestedData::from_observations(observations, input_spec)
}

/// Gamma-Poisson count draw; `inv_phi == 0` collapses to plain Poisson.
fn draw_count(rng: &mut StdRng, mu: f64, inv_phi: f64) -> Result<u64, AppError> {
    let mu = mu.max(1e-8);
    let rate = if inv_phi > 0.0 {
        let phi = 1.0 / inv_phi;
        let gamma = Gamma::new(phi, mu / phi)
            .map_err(|e| AppError::new(4, format!("Panel gamma error: {e}")))?;
        gamma.sample(rng).max(1e-12)
    } else {
        mu
    };
    let poisson =
        Poisson::new(rate).map_err(|e| AppError::new(4, format!("Panel poisson error: {e}")))?;
    let draw: f64 = poisson.sample(rng);
    Ok(draw as u64)
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.buildings.hash(&mut hasher);
    config.months.hash(&mut hasher);
    config.seed.hash(&mut hasher);
    config.truth.alpha.to_bits().hash(&mut hasher);
    config.truth.beta_traps.to_bits().hash(&mut hasher);
    config.truth.beta_super.to_bits().hash(&mut hasher);
    config.truth.inv_phi.to_bits().hash(&mut hasher);
    hasher.finish()
}
