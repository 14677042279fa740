//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the sampling/diagnostic code stays clean and testable
//! - output changes are localized (important for future snapshot tests)

use crate::data::IngestedData;
use crate::domain::{FitConfig, RecoveryRow};
use crate::fit::diagnostics::RHAT_WARN;
use crate::fit::FitSelection;
use crate::ppc::PpcSummary;
use crate::report::{ObsResidual, Rankings};

/// Format the full run summary (panel stats + model comparison + posterior).
pub fn format_run_summary(
    ingest: &IngestedData,
    selection: &FitSelection,
    config: &FitConfig,
) -> String {
    let mut out = String::new();

    out.push_str("=== roach - Bayesian count-model fit ===\n");
    out.push_str(&format!("Source: {}\n", ingest.input_spec.source));
    out.push_str(&format!(
        "Panel: n={} | buildings={} | traps=[{:.0}, {:.0}]\n",
        ingest.stats.n_obs,
        ingest.stats.n_buildings,
        ingest.stats.traps_min,
        ingest.stats.traps_max,
    ));
    out.push_str(&format!(
        "Complaints: mean={:.2} sd={:.2} | zeros={:.1}% | max={}\n",
        ingest.stats.complaints_mean,
        ingest.stats.complaints_sd,
        100.0 * ingest.stats.prop_zero,
        ingest.stats.complaints_max,
    ));
    if let Some(note) = &ingest.input_spec.unit_note {
        out.push_str(&format!("Note: {note}\n"));
    }
    if !ingest.row_errors.is_empty() {
        out.push_str(&format!(
            "Skipped {} bad row(s) during ingest (first: line {}: {}).\n",
            ingest.row_errors.len(),
            ingest.row_errors[0].line,
            ingest.row_errors[0].message,
        ));
    }

    out.push_str("\nModel comparison:\n");
    for fit in &selection.fits {
        let chosen = if fit.model.name == selection.best.model.name { "*" } else { " " };
        out.push_str(&format!(
            "{chosen} {:<20} elpd={:.1} p_eff={:.1} waic={:.1}\n",
            fit.model.display_name, fit.quality.elpd, fit.quality.p_eff, fit.quality.waic,
        ));
    }
    for (kind, reason) in &selection.skipped {
        out.push_str(&format!("  (skipped {}) {reason}\n", kind.display_name()));
    }

    let best = &selection.best;
    out.push_str(&format!("\nChosen model: {}\n", best.model.display_name));
    out.push_str(&format!(
        "Sampler: {} chains x {} draws | accept={:.2} | max_rhat={:.3} | min_ess={:.0}\n",
        config.chains, config.samples, best.quality.accept_rate, best.quality.max_rhat,
        best.quality.min_ess,
    ));
    if best.quality.max_rhat > RHAT_WARN {
        out.push_str(&format!(
            "WARNING: split R-hat above {RHAT_WARN}; inspect the chains before trusting these draws.\n",
        ));
    }

    out.push_str("\nPosterior:\n");
    out.push_str(&format!(
        "{:<12} {:>9} {:>8} {:>9} {:>9} {:>9} {:>7} {:>7}\n",
        "param", "mean", "sd", "5%", "50%", "95%", "rhat", "ess"
    ));
    for p in &best.model.params {
        out.push_str(&format!(
            "{:<12} {:>9.3} {:>8.3} {:>9.3} {:>9.3} {:>9.3} {:>7.3} {:>7.0}\n",
            truncate(&p.name, 12),
            p.mean,
            p.sd,
            p.q5,
            p.median,
            p.q95,
            p.rhat,
            p.ess,
        ));
    }
    out.push('\n');

    out
}

/// Format the posterior predictive check table.
pub fn format_ppc(ppc: &PpcSummary) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "Posterior predictive checks ({} replicate panels):\n",
        ppc.n_rep
    ));
    out.push_str(&format!(
        "{:<10} {:>10} {:>10} {:>12}\n",
        "stat", "observed", "rep_mean", "P(rep>=obs)"
    ));
    for s in &ppc.stats {
        out.push_str(&format!(
            "{:<10} {:>10.3} {:>10.3} {:>12.3}\n",
            s.name, s.observed, s.rep_mean, s.p_value
        ));
    }
    out.push_str("Tail probabilities near 0 or 1 mean the model cannot reproduce that statistic.\n");

    out
}

/// Format the under/over-predicted tables.
pub fn format_rankings(rankings: &Rankings) -> String {
    let mut out = String::new();

    out.push_str("Most under-predicted building-months (positive residual):\n");
    out.push_str(&format_table(&rankings.under));
    out.push('\n');

    out.push_str("Most over-predicted building-months (negative residual):\n");
    out.push_str(&format_table(&rankings.over));

    out
}

/// Format the fake-data recovery table.
pub fn format_recovery(rows: &[RecoveryRow]) -> String {
    let mut out = String::new();

    out.push_str("Parameter recovery (truth vs. posterior 90% interval):\n");
    out.push_str(&format!(
        "{:<12} {:>9} {:>9} {:>20} {:>8}\n",
        "param", "truth", "mean", "90% interval", "covered"
    ));
    for r in rows {
        out.push_str(&format!(
            "{:<12} {:>9.3} {:>9.3} {:>20} {:>8}\n",
            truncate(&r.name, 12),
            r.truth,
            r.mean,
            format!("[{:.3}, {:.3}]", r.lo90, r.hi90),
            if r.inside { "yes" } else { "NO" },
        ));
    }

    let misses = rows.iter().filter(|r| !r.inside).count();
    if misses == 0 {
        out.push_str("All true values fall inside their 90% intervals.\n");
    } else {
        out.push_str(&format!(
            "{misses} parameter(s) fell outside their 90% intervals; rerun with more draws or a larger panel.\n",
        ));
    }

    out
}

fn format_table(rows: &[ObsResidual]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<16} {:>6} {:>11} {:>9} {:>9}\n",
            "building-month", "traps", "complaints", "mu_hat", "resid"
        )
        .trim_end(),
    );
    out.push('\n');

    out.push_str(
        format!(
            "{:-<16} {:-<6} {:-<11} {:-<9} {:-<9}\n",
            "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:<16} {:>6.0} {:>11} {:>9.2} {:>9.2}\n",
                truncate(&r.obs.id, 16),
                r.obs.traps,
                r.obs.complaints,
                r.mu,
                r.residual,
            )
            .trim_end(),
        );
        out.push('\n');
    }

    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out = String::new();
    for (i, ch) in s.chars().enumerate() {
        if i + 1 >= max {
            break;
        }
        out.push(ch);
    }
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecoveryRow, TrueParams};
    use crate::report::{compute_residuals, rank_under_over, recovery_rows, tests::poisson_fit};

    #[test]
    fn recovery_table_marks_misses() {
        let rows = vec![
            RecoveryRow {
                name: "alpha".to_string(),
                truth: 1.0,
                mean: 1.05,
                lo90: 0.8,
                hi90: 1.2,
                inside: true,
            },
            RecoveryRow {
                name: "beta_traps".to_string(),
                truth: 0.5,
                mean: -0.2,
                lo90: -0.3,
                hi90: -0.1,
                inside: false,
            },
        ];
        let text = format_recovery(&rows);
        assert!(text.contains("NO"));
        assert!(text.contains("outside their 90% intervals"));
    }

    #[test]
    fn recovery_table_all_covered() {
        let fit = poisson_fit(1.0, -0.2);
        let truth = TrueParams {
            alpha: 1.0,
            beta_traps: -0.2,
            beta_super: 0.0,
            inv_phi: 0.0,
        };
        let text = format_recovery(&recovery_rows(&truth, &fit));
        assert!(text.contains("All true values"));
    }

    #[test]
    fn ranking_table_lists_ids() {
        use crate::domain::ObsMeta;
        use crate::domain::Observation;
        use chrono::NaiveDate;

        let fit = poisson_fit(4.0_f64.ln(), 0.0);
        let data = vec![Observation {
            id: "B07/2017-03".to_string(),
            building_id: "B07".to_string(),
            month: NaiveDate::from_ymd_opt(2017, 3, 1).unwrap(),
            traps: 3.0,
            complaints: 9,
            exposure: 1.0,
            log_exposure: 0.0,
            live_in_super: 0.0,
            meta: ObsMeta::default(),
        }];
        let residuals = compute_residuals(&data, &fit).unwrap();
        let text = format_rankings(&rank_under_over(&residuals, 3));
        assert!(text.contains("B07/2017-03"));
        assert!(text.contains("under-predicted"));
    }
}
