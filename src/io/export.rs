//! Export per-observation results to CSV.
//!
//! The export is meant to be easy to consume in spreadsheets or downstream
//! scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::AppError;
use crate::report::ObsResidual;

/// Write per-observation results to a CSV file.
pub fn write_results_csv(path: &Path, residuals: &[ObsResidual]) -> Result<(), AppError> {
    let mut file = File::create(path).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to create export CSV '{}': {e}", path.display()),
        )
    })?;

    writeln!(
        file,
        "id,building_id,month,traps,exposure_kft2,live_in_super,age_of_building,complaints,mu_hat,sd,std_residual"
    )
    .map_err(|e| AppError::new(2, format!("Failed to write export CSV header: {e}")))?;

    for r in residuals {
        let o = &r.obs;
        writeln!(
            file,
            "{},{},{},{:.4},{:.4},{:.0},{},{},{:.6},{:.6},{:.6}",
            o.id,
            o.building_id,
            o.month.format("%Y-%m"),
            o.traps,
            o.exposure,
            o.live_in_super,
            o.meta
                .age_of_building
                .map(|v| format!("{v:.0}"))
                .unwrap_or_default(),
            o.complaints,
            r.mu,
            r.sd,
            r.residual,
        )
        .map_err(|e| AppError::new(2, format!("Failed to write export CSV row: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObsMeta, Observation};
    use chrono::NaiveDate;

    #[test]
    fn export_round_trips_through_csv_reader() {
        let residuals = vec![ObsResidual {
            obs: Observation {
                id: "B01/2017-01".to_string(),
                building_id: "B01".to_string(),
                month: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
                traps: 5.0,
                complaints: 3,
                exposure: 1.5,
                log_exposure: 1.5_f64.ln(),
                live_in_super: 1.0,
                meta: ObsMeta::default(),
            },
            mu: 2.5,
            sd: 1.8,
            residual: 0.28,
        }];

        let path = std::env::temp_dir().join("roach-counts-test-export.csv");
        write_results_csv(&path, &residuals).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        std::fs::remove_file(&path).ok();

        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "B01/2017-01");
        assert_eq!(&rows[0][2], "2017-01");
        assert_eq!(&rows[0][7], "3");
    }
}
