//! Score histogram output: plain text bars or an interactive terminal chart.

use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use ratatui::crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use ratatui::crossterm::execute;
use ratatui::crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use ratatui::symbols::Marker;
use ratatui::widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph};

use crate::error::{Error, Result};
use crate::histogram::{ChartConfig, Histogram};

const BAR_WIDTH: usize = 40;
/// Points plotted per bin so bars fill their width.
const BAR_STEPS: usize = 5;
const ZONE_ROWS: usize = 25;
const THRESHOLD_STEPS: usize = 60;
const PINK: Color = Color::Rgb(255, 182, 193);

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Write the histogram as `#` bars, one line per bin. Bins below the
/// threshold are marked `!`.
pub fn render_text(out: &mut impl Write, hist: &Histogram, config: &ChartConfig) -> io::Result<()> {
    writeln!(out, "\n--- {} ---", config.title)?;
    writeln!(out, "  x: {}, y: {}", config.x_label, config.y_label)?;
    let max_count = hist.max_count().max(1);
    let mut threshold_drawn = false;
    for bin in &hist.bins {
        let anomalous = bin.is_anomalous(config.threshold);
        if !anomalous && !threshold_drawn {
            writeln!(out, "  {:-^32}", format!(" threshold {:.3} ", config.threshold))?;
            threshold_drawn = true;
        }
        let bar = "#".repeat((bin.count as f64 / max_count as f64 * BAR_WIDTH as f64).round() as usize);
        writeln!(
            out,
            "  {:>7.3} .. {:>7.3} {} {:6} {bar}",
            bin.start,
            bin.end,
            if anomalous { '!' } else { ' ' },
            bin.count
        )?;
    }
    if !threshold_drawn {
        writeln!(out, "  {:-^32}", format!(" threshold {:.3} ", config.threshold))?;
    }
    if hist.underflow + hist.overflow > 0 {
        writeln!(out, "  outside range: {} below, {} above", hist.underflow, hist.overflow)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal chart
// ---------------------------------------------------------------------------

/// Point sets drawn by the terminal chart, back to front.
#[derive(Debug, Clone, Default)]
pub struct ChartLayers {
    /// Dots shading the region left of the threshold.
    pub zone: Vec<(f64, f64)>,
    pub normal: Vec<(f64, f64)>,
    pub anomalous: Vec<(f64, f64)>,
    /// Dashed vertical line at the threshold.
    pub threshold: Vec<(f64, f64)>,
}

impl ChartLayers {
    pub fn build(hist: &Histogram, config: &ChartConfig) -> Self {
        let (x0, x1) = config.x_view;
        let (y0, y1) = config.y_view;
        let mut layers = ChartLayers::default();

        let zone_end = config.threshold.min(x1);
        if zone_end > x0 {
            let dx = (x1 - x0) / (2 * BAR_WIDTH) as f64;
            let dy = (y1 - y0) / ZONE_ROWS as f64;
            let mut x = x0;
            while x <= zone_end {
                layers.zone.extend((0..=ZONE_ROWS).map(|r| (x, y0 + r as f64 * dy)));
                x += dx;
            }
        }

        for bin in &hist.bins {
            if bin.count == 0 {
                continue;
            }
            let target = if bin.is_anomalous(config.threshold) {
                &mut layers.anomalous
            } else {
                &mut layers.normal
            };
            let step = (bin.end - bin.start) / BAR_STEPS as f64;
            target.extend(
                (0..BAR_STEPS).map(|k| (bin.start + (k as f64 + 0.5) * step, bin.count as f64)),
            );
        }

        let dy = (y1 - y0) / THRESHOLD_STEPS as f64;
        layers.threshold = (0..=THRESHOLD_STEPS)
            .filter(|i| (i / 3) % 2 == 0)
            .map(|i| (config.threshold, y0 + i as f64 * dy))
            .collect();
        layers
    }
}

fn axis_labels((lo, hi): (f64, f64), mid: f64, precision: usize) -> Vec<Span<'static>> {
    [lo, mid, hi]
        .iter()
        .map(|v| Span::raw(format!("{v:.precision$}")))
        .collect()
}

fn draw_chart(frame: &mut Frame, layers: &ChartLayers, hist: &Histogram, config: &ChartConfig) {
    let [chart_area, help_area] =
        Layout::vertical([Constraint::Min(5), Constraint::Length(1)]).areas(frame.area());

    let datasets = vec![
        Dataset::default()
            .name("anomalous zone")
            .marker(Marker::Dot)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(PINK))
            .data(&layers.zone),
        Dataset::default()
            .name("normal")
            .marker(Marker::HalfBlock)
            .graph_type(GraphType::Bar)
            .style(Style::default().fg(Color::Cyan))
            .data(&layers.normal),
        Dataset::default()
            .name("anomalous")
            .marker(Marker::HalfBlock)
            .graph_type(GraphType::Bar)
            .style(Style::default().fg(Color::LightRed))
            .data(&layers.anomalous),
        Dataset::default()
            .name(format!("threshold {:.2}", config.threshold))
            .marker(Marker::Braille)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Red))
            .data(&layers.threshold),
    ];

    let (y0, y1) = config.y_view;
    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" {} ", config.title)),
        )
        .x_axis(
            Axis::default()
                .title(config.x_label.as_str())
                .style(Style::default().fg(Color::Gray))
                .bounds([config.x_view.0, config.x_view.1])
                .labels(axis_labels(config.x_view, config.threshold, 2)),
        )
        .y_axis(
            Axis::default()
                .title(config.y_label.as_str())
                .style(Style::default().fg(Color::Gray))
                .bounds([y0, y1])
                .labels(axis_labels(config.y_view, (y0 + y1) / 2.0, 0)),
        );
    frame.render_widget(chart, chart_area);

    let help = format!(
        " q/Esc: close   bins: {}   peak: {}   outside range: {} below, {} above",
        hist.bins.len(),
        hist.max_count(),
        hist.underflow,
        hist.overflow
    );
    frame.render_widget(Paragraph::new(help).style(Style::default().fg(Color::DarkGray)), help_area);
}

fn is_close_key(code: KeyCode, modifiers: KeyModifiers) -> bool {
    match code {
        KeyCode::Char('q') | KeyCode::Esc => true,
        KeyCode::Char('c') => modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn run_viewer<B: Backend>(
    terminal: &mut Terminal<B>,
    hist: &Histogram,
    config: &ChartConfig,
) -> io::Result<()> {
    let layers = ChartLayers::build(hist, config);
    loop {
        terminal.draw(|frame| draw_chart(frame, &layers, hist, config))?;
        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && is_close_key(key.code, key.modifiers) {
                    return Ok(());
                }
            }
        }
    }
}

fn render_error(e: io::Error) -> Error {
    Error::Render(format!("terminal: {e}"))
}

/// Show the histogram in the terminal and block until the viewer closes it.
pub fn render_tui(hist: &Histogram, config: &ChartConfig) -> Result<()> {
    if !io::stdout().is_terminal() {
        return Err(Error::Render(
            "no terminal to display the chart on (use --display text)".into(),
        ));
    }

    enable_raw_mode().map_err(render_error)?;
    let mut stdout = io::stdout();
    if let Err(e) = execute!(stdout, EnterAlternateScreen) {
        let _ = disable_raw_mode();
        return Err(render_error(e));
    }
    let result = Terminal::new(CrosstermBackend::new(stdout)).and_then(|mut terminal| {
        let shown = run_viewer(&mut terminal, hist, config);
        terminal.show_cursor()?;
        shown
    });

    // Restore the terminal whatever happened above.
    let restored = execute!(io::stdout(), LeaveAlternateScreen).and_then(|_| disable_raw_mode());
    result.and(restored).map_err(render_error)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
