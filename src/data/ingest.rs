//! CSV ingest and normalization.
//!
//! This module turns a heterogeneous building-month CSV into a clean set of
//! [`Observation`]s that are safe to fit.
//!
//! Design goals:
//! - **Strict schema** for required fields (clear errors + exit code 2)
//! - **Row-level validation** (skip bad rows, but report what happened)
//! - **Deterministic behavior** (no hidden randomness)
//! - **Separation of concerns**: no modeling logic here

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;

use crate::domain::{BuildingRow, DatasetStats, ObsMeta, Observation};
use crate::error::AppError;

/// High-level, resolved input conventions for the run.
#[derive(Debug, Clone)]
pub struct InputSpec {
    /// Where the panel came from (file path or synthetic generator label).
    pub source: String,
    pub has_exposure: bool,
    pub has_super: bool,
    /// Optional informational note about how inputs were interpreted.
    ///
    /// Example: exposure defaulted to 1.0 (thousand sq ft) because the CSV
    /// has no `sq_ft` column.
    pub unit_note: Option<String>,
}

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Ingest output: normalized observations + resolved spec + stats + row errors.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub observations: Vec<Observation>,
    pub input_spec: InputSpec,
    pub stats: DatasetStats,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
    pub rows_used: usize,
}

impl IngestedData {
    /// Wrap an already-normalized panel (used by the synthetic generator).
    pub fn from_observations(
        observations: Vec<Observation>,
        input_spec: InputSpec,
    ) -> Result<Self, AppError> {
        let rows = observations.len();
        let stats = compute_stats(&observations)
            .ok_or_else(|| AppError::new(3, "Panel is empty after generation."))?;
        Ok(Self {
            observations,
            input_spec,
            stats,
            row_errors: Vec::new(),
            rows_read: rows,
            rows_used: rows,
        })
    }
}

/// Load and normalize a panel CSV to [`Observation`]s.
pub fn load_panel(path: &Path) -> Result<IngestedData, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();

    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(&header_map)?;

    let has_exposure = exposure_column(&header_map).is_some();
    let has_super = super_column(&header_map).is_some();

    let mut input_spec = InputSpec {
        source: path.display().to_string(),
        has_exposure,
        has_super,
        unit_note: None,
    };
    if !has_exposure {
        input_spec.unit_note =
            Some("no exposure column; exposure defaulted to 1.0 (thousand sq ft)".to_string());
    }

    let mut observations = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();

    for (idx, result) in reader.records().enumerate() {
        // +2 because:
        // - records() starts at line 1 after headers
        // - CSV is 1-based line numbers
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map) {
            Ok(row) => {
                if !seen.insert((row.building_id.clone(), row.month)) {
                    row_errors.push(RowError {
                        line,
                        id: Some(row.building_id.clone()),
                        message: format!(
                            "Duplicate building-month {} / {}.",
                            row.building_id, row.month
                        ),
                    });
                    continue;
                }
                match normalize_row(&row) {
                    Ok(obs) => observations.push(obs),
                    Err(message) => row_errors.push(RowError {
                        line,
                        id: Some(row.building_id),
                        message,
                    }),
                }
            }
            Err(message) => row_errors.push(RowError {
                line,
                id: None,
                message,
            }),
        }
    }

    let rows_used = observations.len();
    if rows_used == 0 {
        return Err(AppError::new(
            3,
            "No valid rows remain after normalization.",
        ));
    }

    let stats = compute_stats(&observations)
        .ok_or_else(|| AppError::new(3, "No valid observations remain after normalization."))?;

    Ok(IngestedData {
        observations,
        input_spec,
        stats,
        row_errors,
        rows_read,
        rows_used,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Excel and other tools sometimes emit UTF-8 CSVs with a BOM prefix on the
    // first header (e.g. "﻿building_id"). If we don't strip it, schema
    // validation will incorrectly report missing columns.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_required_columns_exist(header_map: &HashMap<String, usize>) -> Result<(), AppError> {
    for required in ["building_id", "month", "traps", "complaints"] {
        if !header_map.contains_key(required) {
            return Err(AppError::new(
                2,
                format!("Missing required column: `{required}`"),
            ));
        }
    }
    Ok(())
}

fn exposure_column(header_map: &HashMap<String, usize>) -> Option<usize> {
    ["sq_ft", "sq_footage", "total_sq_ft"]
        .iter()
        .find_map(|name| header_map.get(*name).copied())
}

fn super_column(header_map: &HashMap<String, usize>) -> Option<usize> {
    ["live_in_super", "super"]
        .iter()
        .find_map(|name| header_map.get(*name).copied())
}

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
) -> Result<BuildingRow, String> {
    let building_id = get_required(record, header_map, "building_id")?.to_string();
    let month = parse_month(get_required(record, header_map, "month")?)?;

    let traps = parse_f64(get_required(record, header_map, "traps")?, "traps")?;
    let complaints = parse_count(get_required(record, header_map, "complaints")?)?;

    let sq_ft = exposure_column(header_map)
        .and_then(|idx| non_empty(record.get(idx)))
        .map(|s| parse_f64(s, "sq_ft"))
        .transpose()?;
    let live_in_super = super_column(header_map)
        .and_then(|idx| non_empty(record.get(idx)))
        .map(|s| parse_f64(s, "live_in_super"))
        .transpose()?;
    let age_of_building = header_map
        .get("age_of_building")
        .and_then(|&idx| non_empty(record.get(idx)))
        .map(|s| parse_f64(s, "age_of_building"))
        .transpose()?;

    Ok(BuildingRow {
        building_id,
        month,
        traps,
        complaints,
        sq_ft,
        live_in_super,
        age_of_building,
    })
}

fn normalize_row(row: &BuildingRow) -> Result<Observation, String> {
    if !(row.traps.is_finite() && row.traps >= 0.0) {
        return Err(format!("Invalid traps value {}.", row.traps));
    }

    let exposure = row.sq_ft.unwrap_or(1.0);
    if !(exposure.is_finite() && exposure > 0.0) {
        return Err(format!("Exposure must be positive, got {exposure}."));
    }

    let live_in_super = match row.live_in_super {
        None => 0.0,
        Some(v) if v == 0.0 || v == 1.0 => v,
        Some(v) => return Err(format!("`live_in_super` must be 0 or 1, got {v}.")),
    };

    Ok(Observation {
        id: format!("{}/{}", row.building_id, row.month.format("%Y-%m")),
        building_id: row.building_id.clone(),
        month: row.month,
        traps: row.traps,
        complaints: row.complaints,
        exposure,
        log_exposure: exposure.ln(),
        live_in_super,
        meta: ObsMeta {
            age_of_building: row.age_of_building,
        },
    })
}

/// Summary stats over the panel actually used for fitting.
pub fn compute_stats(observations: &[Observation]) -> Option<DatasetStats> {
    if observations.is_empty() {
        return None;
    }

    let n = observations.len();
    let buildings: HashSet<&str> = observations.iter().map(|o| o.building_id.as_str()).collect();

    let mut traps_min = f64::INFINITY;
    let mut traps_max = f64::NEG_INFINITY;
    let mut complaints_max = 0u64;
    let mut zeros = 0usize;
    let mut sum = 0.0;

    for o in observations {
        traps_min = traps_min.min(o.traps);
        traps_max = traps_max.max(o.traps);
        complaints_max = complaints_max.max(o.complaints);
        if o.complaints == 0 {
            zeros += 1;
        }
        sum += o.complaints as f64;
    }

    if !(traps_min.is_finite() && traps_max.is_finite()) {
        return None;
    }

    let mean = sum / n as f64;
    let var = observations
        .iter()
        .map(|o| {
            let d = o.complaints as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / (n.saturating_sub(1)).max(1) as f64;

    Some(DatasetStats {
        n_obs: n,
        n_buildings: buildings.len(),
        traps_min,
        traps_max,
        complaints_max,
        complaints_mean: mean,
        complaints_sd: var.sqrt(),
        prop_zero: zeros as f64 / n as f64,
    })
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    header_map
        .get(name)
        .and_then(|&idx| non_empty(record.get(idx)))
        .ok_or_else(|| format!("Missing `{name}` value."))
}

fn non_empty<'a>(value: Option<&'a str>) -> Option<&'a str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_month(s: &str) -> Result<NaiveDate, String> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d")
        .map_err(|_| format!("Invalid month '{s}' (expected YYYY-MM or YYYY-MM-DD)."))
}

fn parse_f64(s: &str, name: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .map_err(|_| format!("Invalid `{name}` value '{s}'."))
}

fn parse_count(s: &str) -> Result<u64, String> {
    s.parse::<u64>()
        .map_err(|_| format!("Invalid `complaints` value '{s}' (expected a non-negative integer)."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_temp_csv(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("roach-counts-test-{name}.csv"));
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn load_panel_parses_well_formed_rows() {
        let path = write_temp_csv(
            "ok",
            "building_id,month,traps,complaints,sq_ft,live_in_super\n\
             B01,2017-01,5,3,1.5,1\n\
             B01,2017-02,6,0,1.5,1\n\
             B02,2017-01,2,8,2.0,0\n",
        );

        let data = load_panel(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(data.rows_read, 3);
        assert_eq!(data.rows_used, 3);
        assert!(data.row_errors.is_empty());
        assert_eq!(data.stats.n_buildings, 2);
        assert!(data.input_spec.has_exposure);

        let first = &data.observations[0];
        assert_eq!(first.id, "B01/2017-01");
        assert_eq!(first.complaints, 3);
        assert!((first.log_exposure - 1.5_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn load_panel_reports_bad_rows_but_keeps_good_ones() {
        let path = write_temp_csv(
            "bad-rows",
            "building_id,month,traps,complaints\n\
             B01,2017-01,5,3\n\
             B01,not-a-month,5,3\n\
             B02,2017-01,5,-3\n\
             B01,2017-01,4,2\n",
        );

        let data = load_panel(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(data.rows_used, 1);
        // bad month, negative count, duplicate building-month
        assert_eq!(data.row_errors.len(), 3);
        assert!(data
            .row_errors
            .iter()
            .any(|e| e.message.contains("Duplicate building-month")));
    }

    #[test]
    fn load_panel_requires_schema_columns() {
        let path = write_temp_csv("missing-col", "building_id,month,traps\nB01,2017-01,5\n");
        let err = load_panel(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn load_panel_defaults_exposure_with_note() {
        let path = write_temp_csv(
            "no-exposure",
            "building_id,month,traps,complaints\nB01,2017-01,5,3\n",
        );
        let data = load_panel(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(!data.input_spec.has_exposure);
        assert!(data.input_spec.unit_note.is_some());
        assert!((data.observations[0].exposure - 1.0).abs() < 1e-12);
    }

    #[test]
    fn load_panel_strips_bom_from_first_header() {
        let path = write_temp_csv(
            "bom",
            "\u{feff}building_id,month,traps,complaints\nB01,2017-01,5,3\n",
        );
        let data = load_panel(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(data.rows_used, 1);
    }

    #[test]
    fn all_bad_rows_is_a_hard_error() {
        let path = write_temp_csv(
            "all-bad",
            "building_id,month,traps,complaints\nB01,xxxx,5,3\n",
        );
        let err = load_panel(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert_eq!(err.exit_code(), 3);
    }
}
