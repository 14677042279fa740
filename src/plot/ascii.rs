//! ASCII/Unicode plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Fit plot elements:
//! - observed building-months: `o`
//! - posterior-mean curve: `-` line
//! - optional highlights: `U` (under-predicted), `O` (over-predicted)
//!
//! Rootogram elements:
//! - observed sqrt-frequency bars: `#`
//! - expected sqrt-frequency curve: `-`

use std::collections::HashSet;

use crate::domain::PosteriorFile;
use crate::ppc::Rootogram;
use crate::report::{ObsResidual, Rankings};

/// Render the complaints-vs-traps plot for an in-memory fit.
pub fn render_fit_plot(
    residuals: &[ObsResidual],
    curve: &[(f64, f64)],
    width: usize,
    height: usize,
    rankings: Option<&Rankings>,
) -> String {
    let (t_min, t_max) = traps_range(residuals).unwrap_or((0.0, 10.0));
    render_plot(residuals, curve, t_min, t_max, width, height, rankings)
}

/// Render a plot from a saved posterior JSON file (curve only, no points).
pub fn render_fit_plot_from_file(file: &PosteriorFile, width: usize, height: usize) -> String {
    let curve: Vec<(f64, f64)> = file
        .curve
        .traps
        .iter()
        .zip(file.curve.mu.iter())
        .map(|(&t, &mu)| (t, mu))
        .collect();
    let (t_min, t_max) = curve_range(&curve).unwrap_or((0.0, 10.0));
    render_plot(&[], &curve, t_min, t_max, width, height, None)
}

fn render_plot(
    residuals: &[ObsResidual],
    curve: &[(f64, f64)],
    t_min: f64,
    t_max: f64,
    width: usize,
    height: usize,
    rankings: Option<&Rankings>,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    // Determine y-range from observed counts and curve points.
    let (y_min, y_max) = y_range(residuals, curve).unwrap_or((0.0, 1.0));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Draw the curve first (so points can overlay).
    draw_curve(&mut grid, curve, t_min, t_max, y_min, y_max);

    // Highlight sets (ids).
    let (under_ids, over_ids): (HashSet<String>, HashSet<String>) = rankings
        .map(|r| {
            (
                r.under.iter().map(|x| x.obs.id.clone()).collect(),
                r.over.iter().map(|x| x.obs.id.clone()).collect(),
            )
        })
        .unwrap_or_default();

    for r in residuals {
        let x = map_x(r.obs.traps, t_min, t_max, width);
        let y = map_y(r.obs.complaints as f64, y_min, y_max, height);

        let ch = if under_ids.contains(&r.obs.id) {
            'U'
        } else if over_ids.contains(&r.obs.id) {
            'O'
        } else {
            'o'
        };

        grid[y][x] = ch;
    }

    // Build final string. We include a small header with ranges.
    let mut out = String::new();
    out.push_str(&format!(
        "Plot: traps=[{t_min:.3}, {t_max:.3}] | complaints=[{y_min:.2}, {y_max:.2}]\n"
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

/// Render the hanging-style rootogram (square-root frequency scale).
pub fn render_rootogram(root: &Rootogram, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let bins = root.observed.len();
    let k_max = root.max_count as f64;

    let y_max = root
        .observed
        .iter()
        .chain(root.expected.iter())
        .map(|v| v.max(0.0).sqrt())
        .fold(1.0_f64, f64::max);

    let mut grid = vec![vec![' '; width]; height];

    // Observed bars.
    for (k, &freq) in root.observed.iter().enumerate() {
        let x = map_x(k as f64, 0.0, k_max, width);
        let top = map_y(freq.max(0.0).sqrt(), 0.0, y_max, height);
        if freq > 0.0 {
            for row in grid.iter_mut().take(height).skip(top) {
                row[x] = '#';
            }
        }
    }

    // Expected curve on the same sqrt scale (fills blank cells only).
    let expected: Vec<(f64, f64)> = (0..bins)
        .map(|k| (k as f64, root.expected[k].max(0.0).sqrt()))
        .collect();
    let mut prev: Option<(usize, usize)> = None;
    for &(k, v) in &expected {
        let x = map_x(k, 0.0, k_max, width);
        let y = map_y(v, 0.0, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(&mut grid, x0, y0, x, y, '-');
        } else if grid[y][x] == ' ' {
            grid[y][x] = '-';
        }
        prev = Some((x, y));
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Rootogram: counts 0..={} | sqrt-frequency [0.00, {y_max:.2}] | bars=observed, line=expected\n",
        root.max_count
    ));
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn traps_range(residuals: &[ObsResidual]) -> Option<(f64, f64)> {
    let mut min_t = f64::INFINITY;
    let mut max_t = f64::NEG_INFINITY;
    for r in residuals {
        min_t = min_t.min(r.obs.traps);
        max_t = max_t.max(r.obs.traps);
    }
    if min_t.is_finite() && max_t.is_finite() && max_t > min_t {
        Some((min_t, max_t))
    } else {
        None
    }
}

fn curve_range(curve: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut min_t = f64::INFINITY;
    let mut max_t = f64::NEG_INFINITY;
    for &(t, _) in curve {
        min_t = min_t.min(t);
        max_t = max_t.max(t);
    }
    if min_t.is_finite() && max_t.is_finite() && max_t > min_t {
        Some((min_t, max_t))
    } else {
        None
    }
}

fn y_range(residuals: &[ObsResidual], curve: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut min_y = f64::INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for r in residuals {
        min_y = min_y.min(r.obs.complaints as f64);
        max_y = max_y.max(r.obs.complaints as f64);
    }
    for &(_, y) in curve {
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    if min_y.is_finite() && max_y.is_finite() && max_y > min_y {
        Some((min_y, max_y))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(t: f64, t_min: f64, t_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let span = (t_max - t_min).max(1e-12);
    let u = ((t - t_min) / span).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let span = (y_max - y_min).max(1e-12);
    let u = ((y - y_min) / span).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(
    grid: &mut [Vec<char>],
    curve: &[(f64, f64)],
    t_min: f64,
    t_max: f64,
    y_min: f64,
    y_max: f64,
) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(t, y) in curve {
        let x = map_x(t, t_min, t_max, width);
        let yy = map_y(y, y_min, y_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, yy, '-');
        } else {
            grid[yy][x] = '-';
        }
        prev = Some((x, yy));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObsMeta, Observation};
    use chrono::NaiveDate;

    fn residual(id: &str, traps: f64, complaints: u64) -> ObsResidual {
        ObsResidual {
            obs: Observation {
                id: id.to_string(),
                building_id: "B01".to_string(),
                month: NaiveDate::from_ymd_opt(2017, 1, 1).unwrap(),
                traps,
                complaints,
                exposure: 1.0,
                log_exposure: 0.0,
                live_in_super: 0.0,
                meta: ObsMeta::default(),
            },
            mu: 4.0,
            sd: 2.0,
            residual: (complaints as f64 - 4.0) / 2.0,
        }
    }

    #[test]
    fn fit_plot_golden_snapshot_small() {
        let residuals = vec![residual("B1", 1.0, 4), residual("B2", 10.0, 15)];
        // Flat posterior-mean curve at 4 complaints.
        let curve = vec![(1.0, 4.0), (10.0, 4.0)];

        let txt = render_fit_plot(&residuals, &curve, 10, 5, None);
        let expected = concat!(
            "Plot: traps=[1.000, 10.000] | complaints=[3.45, 15.55]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn fit_plot_marks_highlights() {
        let residuals = vec![residual("B1", 1.0, 4), residual("B2", 10.0, 15)];
        let curve = vec![(1.0, 4.0), (10.0, 4.0)];
        let rankings = Rankings {
            under: vec![residuals[1].clone()],
            over: Vec::new(),
        };

        let txt = render_fit_plot(&residuals, &curve, 10, 5, Some(&rankings));
        assert!(txt.contains('U'));
    }

    #[test]
    fn rootogram_renders_bars_and_header() {
        let root = Rootogram {
            max_count: 5,
            observed: vec![6.0, 4.0, 2.0, 1.0, 0.0, 1.0],
            expected: vec![5.0, 4.5, 2.5, 1.2, 0.5, 0.2],
        };
        let txt = render_rootogram(&root, 20, 8);
        let lines: Vec<&str> = txt.lines().collect();

        assert_eq!(lines.len(), 9);
        assert!(lines[0].starts_with("Rootogram: counts 0..=5"));
        assert!(txt.contains('#'));
        assert!(txt.contains('-'));

        // The zero-frequency bin draws no bar.
        let col = map_x(4.0, 0.0, 5.0, 20);
        assert!(lines[1..].iter().all(|l| l.as_bytes()[col] != b'#'));
    }

    #[test]
    fn rootogram_tallest_bar_reaches_the_top() {
        let root = Rootogram {
            max_count: 2,
            observed: vec![9.0, 1.0, 0.0],
            expected: vec![8.0, 1.5, 0.3],
        };
        let txt = render_rootogram(&root, 12, 6);
        let first_row = txt.lines().nth(1).unwrap();
        assert!(first_row.contains('#'));
    }
}
