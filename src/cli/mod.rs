//! Command-line parsing for the count-model workbench.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the modeling/sampling code.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::ModelSpec;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "roach",
    version,
    about = "Bayesian count-regression workbench for pest-control panels"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the model ladder, print diagnostics and posterior predictive
    /// checks, and optionally plot/export.
    Fit(FitArgs),
    /// Fake-data check: simulate a panel with known parameters, fit it, and
    /// verify the posterior covers the truth.
    Check(CheckArgs),
    /// Plot a previously exported posterior JSON.
    Plot(PlotArgs),
    /// Launch the interactive TUI.
    ///
    /// This uses the same underlying fit pipeline as `roach fit`, but
    /// renders results in a terminal UI using Ratatui.
    Tui(FitArgs),
}

/// Common options for fitting.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Panel CSV (building_id, month, traps, complaints, optional sq_ft /
    /// live_in_super). When omitted, a synthetic demo panel is generated.
    #[arg(short = 'f', long)]
    pub data: Option<PathBuf>,

    /// Number of buildings in the synthetic demo panel.
    #[arg(long, default_value_t = 10)]
    pub buildings: usize,

    /// Months per building in the synthetic demo panel.
    #[arg(long, default_value_t = 12)]
    pub months: usize,

    /// Random seed (panel generation and sampler chains).
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Which model(s) to fit.
    #[arg(long, value_enum, default_value_t = ModelSpec::Auto)]
    pub model: ModelSpec,

    /// Number of MCMC chains.
    #[arg(long, default_value_t = 4)]
    pub chains: usize,

    /// Warmup iterations per chain (discarded, used for step adaptation).
    #[arg(long, default_value_t = 1000)]
    pub warmup: usize,

    /// Retained draws per chain.
    #[arg(long, default_value_t = 1000)]
    pub samples: usize,

    /// Replicate panels used for the posterior predictive checks.
    #[arg(long = "ppc-draws", default_value_t = 500)]
    pub ppc_draws: usize,

    /// Show top-N under/over-predicted building-months.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Render ASCII plots in the terminal (enabled by default).
    #[arg(long, default_value_t = true)]
    pub plot: bool,

    /// Disable the terminal plots.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export per-observation results to CSV.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the posterior (summaries + plot grids) to JSON.
    #[arg(long = "export-posterior")]
    pub export_posterior: Option<PathBuf>,
}

/// Options for the fake-data recovery check.
#[derive(Debug, Parser)]
pub struct CheckArgs {
    /// True intercept used by the simulator.
    #[arg(long, default_value_t = 2.0, allow_hyphen_values = true)]
    pub alpha: f64,

    /// True traps coefficient.
    #[arg(long = "beta-traps", default_value_t = -0.20, allow_hyphen_values = true)]
    pub beta_traps: f64,

    /// True superintendent coefficient.
    #[arg(long = "beta-super", default_value_t = -0.35, allow_hyphen_values = true)]
    pub beta_super: f64,

    /// True reciprocal dispersion (0 = pure Poisson counts).
    #[arg(long = "inv-phi", default_value_t = 0.5)]
    pub inv_phi: f64,

    /// Number of buildings to simulate.
    #[arg(long, default_value_t = 20)]
    pub buildings: usize,

    /// Months per building.
    #[arg(long, default_value_t = 12)]
    pub months: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Which model to fit against the simulated panel.
    #[arg(long, value_enum, default_value_t = ModelSpec::Negbin)]
    pub model: ModelSpec,

    /// Number of MCMC chains.
    #[arg(long, default_value_t = 4)]
    pub chains: usize,

    /// Warmup iterations per chain.
    #[arg(long, default_value_t = 1000)]
    pub warmup: usize,

    /// Retained draws per chain.
    #[arg(long, default_value_t = 1000)]
    pub samples: usize,
}

/// Options for plotting a saved posterior.
#[derive(Debug, Parser)]
pub struct PlotArgs {
    /// Posterior JSON file produced by `roach fit --export-posterior`.
    #[arg(long, value_name = "JSON")]
    pub posterior: PathBuf,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}
