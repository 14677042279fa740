//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads or simulates the panel
//! - runs sampling + model selection + posterior predictive checks
//! - prints reports/plots
//! - writes optional exports

use clap::Parser;

use crate::cli::{CheckArgs, Command, FitArgs, PlotArgs};
use crate::data::{generate_panel, SampleConfig};
use crate::domain::{FitConfig, TrueParams};
use crate::error::AppError;
use crate::fit::selection::{fit_and_select, fitted_curve};
use crate::report::{format_recovery, recovery_rows};

pub mod pipeline;

/// Entry point for the `roach` binary.
pub fn run() -> Result<(), AppError> {
    // We want `roach` and `roach -f panel.csv` to behave like `roach tui ...`.
    //
    // Clap requires a subcommand name, so we do a small, explicit rewrite of
    // the argv list before parsing. This preserves a clean clap structure
    // while retaining the requested UX.
    let argv = rewrite_args(std::env::args().collect());
    let cli = crate::cli::Cli::parse_from(argv);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Check(args) => handle_check(args),
        Command::Plot(args) => handle_plot(args),
        Command::Tui(args) => handle_tui(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = fit_config_from_args(&args);
    let run = pipeline::run_fit(&config)?;

    println!(
        "{}",
        crate::report::format_run_summary(&run.data, &run.selection, &config)
    );
    println!("{}", crate::report::format_ppc(&run.ppc));
    println!("{}", crate::report::format_rankings(&run.rankings));

    if config.plot {
        let curve = fitted_curve(
            &run.selection.best,
            &run.data.observations,
            config.plot_width.max(2),
        );
        println!(
            "{}",
            crate::plot::render_fit_plot(
                &run.residuals,
                &curve,
                config.plot_width,
                config.plot_height,
                Some(&run.rankings),
            )
        );
        println!(
            "{}",
            crate::plot::render_rootogram(
                &run.ppc.rootogram,
                config.plot_width,
                config.plot_height,
            )
        );
    }

    // Optional exports.
    if let Some(path) = &config.export_results {
        crate::io::export::write_results_csv(path, &run.residuals)?;
    }
    if let Some(path) = &config.export_posterior {
        crate::io::posterior::write_posterior_json(
            path,
            &run.selection.best,
            &run.data.observations,
            &run.ppc.rootogram,
        )?;
    }

    Ok(())
}

fn handle_check(args: CheckArgs) -> Result<(), AppError> {
    let truth = TrueParams {
        alpha: args.alpha,
        beta_traps: args.beta_traps,
        beta_super: args.beta_super,
        inv_phi: args.inv_phi,
    };

    let mut sample_config = SampleConfig::new(args.buildings, args.months, args.seed);
    sample_config.truth = truth;
    let panel = generate_panel(&sample_config)?;

    let config = FitConfig {
        csv_path: None,
        buildings: args.buildings,
        months: args.months,
        sample_seed: args.seed,
        model_spec: args.model,
        chains: args.chains,
        warmup: args.warmup,
        samples: args.samples,
        ppc_draws: 0,
        top_n: 0,
        plot: false,
        plot_width: 0,
        plot_height: 0,
        export_results: None,
        export_posterior: None,
    };

    let selection = fit_and_select(&panel.observations, &config)?;

    println!(
        "{}",
        crate::report::format_run_summary(&panel, &selection, &config)
    );
    println!(
        "{}",
        format_recovery(&recovery_rows(&truth, &selection.best))
    );

    Ok(())
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let posterior = crate::io::posterior::read_posterior_json(&args.posterior)?;

    println!(
        "{} ({})",
        posterior.model.display_name, posterior.tool
    );
    println!(
        "{}",
        crate::plot::render_fit_plot_from_file(&posterior, args.width, args.height)
    );
    println!(
        "{}",
        crate::plot::render_rootogram(&posterior.rootogram, args.width, args.height)
    );
    Ok(())
}

fn handle_tui(args: FitArgs) -> Result<(), AppError> {
    crate::tui::run(args)
}

pub fn fit_config_from_args(args: &FitArgs) -> FitConfig {
    FitConfig {
        csv_path: args.data.clone(),
        buildings: args.buildings,
        months: args.months,
        sample_seed: args.seed,
        model_spec: args.model,
        chains: args.chains,
        warmup: args.warmup,
        samples: args.samples,
        ppc_draws: args.ppc_draws,
        top_n: args.top,
        plot: args.plot && !args.no_plot,
        plot_width: args.width,
        plot_height: args.height,
        export_results: args.export.clone(),
        export_posterior: args.export_posterior.clone(),
    }
}

/// Rewrite argv so `roach` defaults to `roach tui`.
///
/// Rules:
/// - `roach`                      -> `roach tui`
/// - `roach -f panel.csv ...`     -> `roach tui -f panel.csv ...`
/// - `roach --help/--version/-h`  -> unchanged (show top-level help/version)
fn rewrite_args(mut argv: Vec<String>) -> Vec<String> {
    let Some(arg1) = argv.get(1).cloned() else {
        argv.push("tui".to_string());
        return argv;
    };

    let is_top_level_help_or_version =
        matches!(arg1.as_str(), "-h" | "--help" | "-V" | "--version" | "help");
    if is_top_level_help_or_version {
        return argv;
    }

    let is_subcommand = matches!(arg1.as_str(), "fit" | "check" | "plot" | "tui");
    if is_subcommand {
        return argv;
    }

    // If the first token is a flag, treat it as "tui flags".
    if arg1.starts_with('-') {
        argv.insert(1, "tui".to_string());
        return argv;
    }

    // Otherwise, leave as-is.
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_invocation_defaults_to_tui() {
        let argv = rewrite_args(to_argv(&["roach"]));
        assert_eq!(argv, to_argv(&["roach", "tui"]));
    }

    #[test]
    fn leading_flag_defaults_to_tui() {
        let argv = rewrite_args(to_argv(&["roach", "-f", "panel.csv"]));
        assert_eq!(argv, to_argv(&["roach", "tui", "-f", "panel.csv"]));
    }

    #[test]
    fn subcommands_and_help_pass_through() {
        let fit = rewrite_args(to_argv(&["roach", "fit", "--seed", "1"]));
        assert_eq!(fit[1], "fit");

        let help = rewrite_args(to_argv(&["roach", "--help"]));
        assert_eq!(help, to_argv(&["roach", "--help"]));
    }

    #[test]
    fn fit_config_respects_no_plot() {
        use clap::Parser;
        let cli = crate::cli::Cli::parse_from(["roach", "fit", "--no-plot"]);
        let Command::Fit(args) = cli.command else {
            panic!("expected fit subcommand");
        };
        let config = fit_config_from_args(&args);
        assert!(!config.plot);
        assert_eq!(config.chains, 4);
    }
}
