//! Ratatui-based terminal UI.
//!
//! The TUI provides a settings panel for choosing a model, panel shape, and
//! seed, then renders the fitted curve or the rootogram alongside the PPC
//! numbers. Refits run the same pipeline as `roach fit`.

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
    Terminal,
};

use crate::app::pipeline::RunOutput;
use crate::cli::FitArgs;
use crate::domain::ModelSpec;
use crate::error::AppError;
use crate::fit::selection::fitted_curve;

mod plotters_chart;

use plotters_chart::RoachPlottersChart;

/// Start the TUI.
pub fn run(args: FitArgs) -> Result<(), AppError> {
    let _guard = TerminalGuard::new()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)
        .map_err(|e| AppError::new(4, format!("Failed to initialize terminal: {e}")))?;

    let mut app = App::new(crate::app::fit_config_from_args(&args))?;
    app.event_loop(&mut terminal)
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::new(4, format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::new(4, format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChartView {
    Fit,
    Rootogram,
}

struct App {
    config: crate::domain::FitConfig,
    selected_field: usize,
    view: ChartView,
    status: String,
    run: Option<RunOutput>,
}

impl App {
    fn new(config: crate::domain::FitConfig) -> Result<Self, AppError> {
        let mut app = Self {
            config,
            selected_field: 0,
            view: ChartView::Fit,
            status: "Sampling...".to_string(),
            run: None,
        };
        app.refit()?;
        Ok(app)
    }

    fn event_loop<B: ratatui::backend::Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
    ) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::new(4, format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100))
                .map_err(|e| AppError::new(4, format!("Event poll error: {e}")))?
            {
                continue;
            }

            match event::read().map_err(|e| AppError::new(4, format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code)? {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => {
                    needs_redraw = true;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool, AppError> {
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Up => {
                if self.selected_field > 0 {
                    self.selected_field -= 1;
                }
            }
            KeyCode::Down => {
                if self.selected_field < 2 {
                    self.selected_field += 1;
                }
            }
            KeyCode::Left => self.adjust_field(-1)?,
            KeyCode::Right => self.adjust_field(1)?,
            KeyCode::Tab => {
                self.view = match self.view {
                    ChartView::Fit => ChartView::Rootogram,
                    ChartView::Rootogram => ChartView::Fit,
                };
                self.status = format!("view: {:?}", self.view);
            }
            KeyCode::Char('r') => {
                self.config.sample_seed = self.config.sample_seed.wrapping_add(1);
                self.refit()?;
                self.status = format!("Reseeded (seed={}).", self.config.sample_seed);
            }
            KeyCode::Char('d') => {
                if let Some(run) = &self.run {
                    match crate::debug::write_run_bundle(run, &self.config) {
                        Ok(path) => {
                            self.status = format!("Wrote debug bundle: {}", path.display());
                        }
                        Err(err) => {
                            self.status = format!("Debug write failed: {err}");
                        }
                    }
                } else {
                    self.status = "No fit available.".to_string();
                }
            }
            _ => {}
        }

        Ok(false)
    }

    fn adjust_field(&mut self, delta: i32) -> Result<(), AppError> {
        match self.selected_field {
            0 => {
                self.config.model_spec = if delta >= 0 {
                    next_model_spec(self.config.model_spec)
                } else {
                    prev_model_spec(self.config.model_spec)
                };
                self.refit()?;
                self.status = format!("model: {:?}", self.config.model_spec);
            }
            1 => {
                if self.config.csv_path.is_some() {
                    self.status = "Panel comes from a CSV; shape is fixed.".to_string();
                    return Ok(());
                }
                let next = if delta >= 0 {
                    self.config.buildings.saturating_add(1)
                } else {
                    self.config.buildings.saturating_sub(1)
                };
                self.config.buildings = next.max(1);
                self.refit()?;
                self.status = format!("buildings: {}", self.config.buildings);
            }
            2 => {
                if self.config.csv_path.is_some() {
                    self.status = "Panel comes from a CSV; shape is fixed.".to_string();
                    return Ok(());
                }
                let next = if delta >= 0 {
                    self.config.months.saturating_add(1)
                } else {
                    self.config.months.saturating_sub(1)
                };
                self.config.months = next.max(1);
                self.refit()?;
                self.status = format!("months: {}", self.config.months);
            }
            _ => {}
        }
        Ok(())
    }

    fn refit(&mut self) -> Result<(), AppError> {
        let run = crate::app::pipeline::run_fit(&self.config)?;
        self.run = Some(run);
        Ok(())
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let size = frame.area();
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(5), Constraint::Min(0), Constraint::Length(3)])
            .split(size);

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let mut lines: Vec<Line> = Vec::new();
        lines.push(Line::from(vec![
            Span::styled("roach", Style::default().fg(Color::Cyan)),
            Span::raw(" — Poisson-family complaint models"),
        ]));

        let source = self
            .run
            .as_ref()
            .map(|r| r.data.input_spec.source.clone())
            .unwrap_or_else(|| "-".to_string());
        let model_name = self
            .run
            .as_ref()
            .map(|r| r.selection.best.model.display_name.clone())
            .unwrap_or_else(|| "-".to_string());
        let n = self.run.as_ref().map(|r| r.data.stats.n_obs).unwrap_or(0);

        lines.push(Line::from(Span::styled(
            format!(
                "spec: {:?} | chosen: {model_name} | n={n} | {source}",
                self.config.model_spec,
            ),
            Style::default().fg(Color::Gray),
        )));

        if let Some(run) = &self.run {
            let q = &run.selection.best.quality;
            lines.push(Line::from(Span::styled(
                format!(
                    "elpd={:.1} | accept={:.2} | max_rhat={:.3} | min_ess={:.0}",
                    q.elpd, q.accept_rate, q.max_rhat, q.min_ess,
                ),
                Style::default().fg(Color::Gray),
            )));
        }

        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(8)])
            .split(area);

        self.draw_chart(frame, chunks[0]);
        self.draw_settings(frame, chunks[1]);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let title = match self.view {
            ChartView::Fit => "Complaints vs traps",
            ChartView::Rootogram => "Rootogram (sqrt scale)",
        };
        let block = Block::default().title(title).borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let Some(run) = &self.run else {
            let msg = Paragraph::new("Waiting for the sampler...")
                .style(Style::default().fg(Color::Yellow))
                .block(Block::default());
            frame.render_widget(msg, inner);
            return;
        };

        let series = match self.view {
            ChartView::Fit => fit_series(run),
            ChartView::Rootogram => rootogram_series(run),
        };
        let labels = match self.view {
            ChartView::Fit => ("traps", "complaints"),
            ChartView::Rootogram => ("count", "sqrt freq"),
        };

        let (chart_rect, insets) = chart_layout(inner);
        let widget = RoachPlottersChart {
            curve: &series.curve,
            points: &series.points,
            under: &series.under,
            over: &series.over,
            bars: &series.bars,
            x_bounds: series.x_bounds,
            y_bounds: series.y_bounds,
            fmt_x: fmt_axis_x,
            fmt_y: fmt_axis_y,
        };

        frame.render_widget(widget, chart_rect);
        if let Some(insets) = insets {
            draw_axis_ticks(
                frame,
                inner,
                chart_rect,
                insets,
                series.x_bounds,
                series.y_bounds,
                labels,
            );
        }
    }

    fn draw_settings(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let shape = if self.config.csv_path.is_some() {
            "(from CSV)".to_string()
        } else {
            format!("{}", self.config.buildings)
        };
        let months = if self.config.csv_path.is_some() {
            "(from CSV)".to_string()
        } else {
            format!("{}", self.config.months)
        };

        let mut items = Vec::new();
        items.push(ListItem::new(format!("Model: {:?}", self.config.model_spec)));
        items.push(ListItem::new(format!("Buildings: {shape}")));
        items.push(ListItem::new(format!("Months: {months}")));
        items.push(ListItem::new(format!("Seed: {}", self.config.sample_seed)));

        let list = List::new(items)
            .block(Block::default().title("Settings").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Black).bg(Color::White))
            .highlight_symbol("» ");

        let mut state = ratatui::widgets::ListState::default();
        state.select(Some(self.selected_field));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "↑/↓ select  ←/→ adjust  Tab view  r reseed  d debug  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Chart-ready series for one view.
struct ChartSeries {
    curve: Vec<(f64, f64)>,
    points: Vec<(f64, f64)>,
    under: Vec<(f64, f64)>,
    over: Vec<(f64, f64)>,
    bars: Vec<((f64, f64), (f64, f64))>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
}

/// Build chart series for the fit view.
fn fit_series(run: &RunOutput) -> ChartSeries {
    let mut t1 = run.data.stats.traps_max;
    if !t1.is_finite() || t1 <= 0.0 {
        t1 = 10.0;
    }
    let x_bounds = [0.0, t1];

    let points: Vec<(f64, f64)> = run
        .residuals
        .iter()
        .map(|r| (r.obs.traps, r.obs.complaints as f64))
        .collect();

    let under = run
        .rankings
        .under
        .iter()
        .map(|r| (r.obs.traps, r.obs.complaints as f64))
        .collect::<Vec<_>>();
    let over = run
        .rankings
        .over
        .iter()
        .map(|r| (r.obs.traps, r.obs.complaints as f64))
        .collect::<Vec<_>>();

    let curve = fitted_curve(&run.selection.best, &run.data.observations, 200);

    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &(_, y) in points.iter().chain(curve.iter()) {
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }
    if !y_min.is_finite() || !y_max.is_finite() || y_max <= y_min {
        y_min = 0.0;
        y_max = 1.0;
    }
    let pad = ((y_max - y_min).abs() * 0.05).max(1e-12);
    let y_bounds = [(y_min - pad).min(0.0), y_max + pad];

    ChartSeries {
        curve,
        points,
        under,
        over,
        bars: Vec::new(),
        x_bounds,
        y_bounds,
    }
}

/// Build chart series for the rootogram view.
fn rootogram_series(run: &RunOutput) -> ChartSeries {
    let root = &run.ppc.rootogram;

    let bars: Vec<((f64, f64), (f64, f64))> = root
        .observed
        .iter()
        .enumerate()
        .filter(|&(_, &freq)| freq > 0.0)
        .map(|(k, &freq)| ((k as f64, 0.0), (k as f64, freq.sqrt())))
        .collect();

    let curve: Vec<(f64, f64)> = root
        .expected
        .iter()
        .enumerate()
        .map(|(k, &freq)| (k as f64, freq.max(0.0).sqrt()))
        .collect();

    let y_max = bars
        .iter()
        .map(|&(_, (_, top))| top)
        .chain(curve.iter().map(|&(_, y)| y))
        .fold(1.0_f64, f64::max);

    ChartSeries {
        curve,
        points: Vec::new(),
        under: Vec::new(),
        over: Vec::new(),
        bars,
        x_bounds: [-0.5, root.max_count as f64 + 0.5],
        y_bounds: [0.0, y_max * 1.05],
    }
}

fn next_model_spec(cur: ModelSpec) -> ModelSpec {
    match cur {
        ModelSpec::Auto => ModelSpec::Poisson,
        ModelSpec::Poisson => ModelSpec::PoissonExp,
        ModelSpec::PoissonExp => ModelSpec::Negbin,
        ModelSpec::Negbin => ModelSpec::All,
        ModelSpec::All => ModelSpec::Auto,
    }
}

fn prev_model_spec(cur: ModelSpec) -> ModelSpec {
    match cur {
        ModelSpec::Auto => ModelSpec::All,
        ModelSpec::Poisson => ModelSpec::Auto,
        ModelSpec::PoissonExp => ModelSpec::Poisson,
        ModelSpec::Negbin => ModelSpec::PoissonExp,
        ModelSpec::All => ModelSpec::Negbin,
    }
}

fn fmt_axis_x(v: f64) -> String {
    format!("{v:.0}")
}

fn fmt_axis_y(v: f64) -> String {
    format!("{v:.1}")
}

#[derive(Debug, Clone, Copy)]
struct AxisInsets {
    left: u16,
    right: u16,
    top: u16,
    bottom: u16,
}

fn chart_layout(inner: Rect) -> (Rect, Option<AxisInsets>) {
    let insets = AxisInsets {
        left: 8,
        right: 2,
        top: 1,
        bottom: 2,
    };

    if inner.width <= insets.left + insets.right + 10
        || inner.height <= insets.top + insets.bottom + 5
    {
        return (inner, None);
    }

    let rect = Rect {
        x: inner.x + insets.left,
        y: inner.y + insets.top,
        width: inner.width - insets.left - insets.right,
        height: inner.height - insets.top - insets.bottom,
    };

    (rect, Some(insets))
}

fn draw_axis_ticks(
    frame: &mut ratatui::Frame<'_>,
    inner: Rect,
    chart: Rect,
    insets: AxisInsets,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
    labels: (&str, &str),
) {
    let ticks = 5usize;
    let style = Style::default().fg(Color::Gray);

    for i in 0..ticks {
        let u = i as f64 / (ticks as f64 - 1.0);
        let x_val = x_bounds[0] + u * (x_bounds[1] - x_bounds[0]);
        let x = chart.x + ((chart.width - 1) as f64 * u).round() as u16;
        let label = format!("{x_val:.1}");
        let label_len = label.len() as u16;
        let start = x.saturating_sub((label.len() / 2) as u16);
        let y = chart.y + chart.height;
        if y >= inner.y + inner.height - 1 {
            continue;
        }
        frame.render_widget(
            Paragraph::new(label).style(style),
            Rect {
                x: start,
                y,
                width: label_len,
                height: 1,
            },
        );
    }

    for i in 0..ticks {
        let u = i as f64 / (ticks as f64 - 1.0);
        let y_val = y_bounds[0] + u * (y_bounds[1] - y_bounds[0]);
        let y = chart.y + (chart.height - 1) - ((chart.height - 1) as f64 * u).round() as u16;
        let label = format!("{y_val:.0}");
        let label_len = label.len() as u16;
        let x = inner.x + insets.left.saturating_sub(1);
        let start = x.saturating_sub(label.len() as u16);
        if start < inner.x {
            continue;
        }
        frame.render_widget(
            Paragraph::new(label).style(style),
            Rect {
                x: start,
                y,
                width: label_len,
                height: 1,
            },
        );
    }

    let x_label = Paragraph::new(labels.0)
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::Gray));
    let x_rect = Rect {
        x: chart.x,
        y: chart.y + chart.height + 1,
        width: chart.width,
        height: 1,
    };
    if x_rect.y < inner.y + inner.height {
        frame.render_widget(x_label, x_rect);
    }

    let y_label = Paragraph::new(labels.1)
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));
    let y_rect = Rect {
        x: inner.x,
        y: inner.y,
        width: insets.left.saturating_sub(1),
        height: 1,
    };
    frame.render_widget(y_label, y_rect);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_spec_cycle_round_trips() {
        let mut spec = ModelSpec::Auto;
        for _ in 0..5 {
            spec = next_model_spec(spec);
        }
        assert_eq!(spec, ModelSpec::Auto);

        assert_eq!(prev_model_spec(next_model_spec(ModelSpec::Negbin)), ModelSpec::Negbin);
    }

    #[test]
    fn chart_layout_collapses_when_small() {
        let tiny = Rect {
            x: 0,
            y: 0,
            width: 15,
            height: 6,
        };
        let (rect, insets) = chart_layout(tiny);
        assert_eq!(rect, tiny);
        assert!(insets.is_none());
    }
}
