use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Gauge, Paragraph, Widget, Wrap},
};

use dripwatch::estimate;
use dripwatch::session::{CalibrationLevel, InfusionSession};
use dripwatch::util::format_countdown;

use crate::{App, AppState};

const HORIZONTAL_MARGIN: u16 = 5;

/// Remaining-minute thresholds for the attention banner
const WARN_SOON_MINUTES: f64 = 10.0;
const WARN_NOW_MINUTES: f64 = 5.0;

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Setup => render_setup(self, area, buf),
            AppState::Measure => render_measure(self, area, buf),
            AppState::Timer => {
                if self.store.session().is_completed {
                    render_completed(self, area, buf)
                } else {
                    render_timer(self, area, buf)
                }
            }
        }
    }
}

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

fn centered_lines(lines: Vec<Line>, area: Rect, buf: &mut Buffer) {
    let height = lines.len() as u16;
    let top_pad = area.height.saturating_sub(height) / 2;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Length(top_pad),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(chunks[1], buf);
}

fn render_setup(app: &App, area: Rect, buf: &mut Buffer) {
    let session = app.store.session();
    let range = estimate::speed_range(session.speed_level);
    let preview = estimate::estimated_minutes(
        session.volume,
        session.drop_factor,
        session.speed_level,
        session.measured_drops_per_minute,
    );

    let mut lines = vec![
        Line::from(Span::styled("dripwatch", bold().fg(Color::Cyan))),
        Line::from(""),
        Line::from(vec![
            Span::styled("bag volume  ", dim()),
            Span::styled(
                format!("{} ({:.0} ml)", session.volume_preset, session.volume),
                bold(),
            ),
        ]),
        Line::from(vec![
            Span::styled("drip speed  ", dim()),
            Span::styled(
                format!(
                    "{} ({}-{} drops/min, avg {})",
                    session.speed_level, range.min, range.max, range.avg
                ),
                bold(),
            ),
        ]),
        Line::from(vec![
            Span::styled("drop factor ", dim()),
            Span::styled(format!("{} drops/ml", session.drop_factor), bold()),
        ]),
    ];

    if session.measured_drops_per_minute > 0 {
        lines.push(Line::from(vec![
            Span::styled("measured    ", dim()),
            Span::styled(
                format!("{} drops/min", session.measured_drops_per_minute),
                bold().fg(Color::Green),
            ),
        ]));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        format!("estimated duration ≈ {} min", preview),
        bold(),
    )));
    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "(v)olume (1/2/3) speed ([/]) drop factor (m)easure (enter) start (esc) quit",
        dim(),
    )));

    centered_lines(lines, area, buf);
}

fn render_measure(app: &App, area: Rect, buf: &mut Buffer) {
    let session = app.store.session();

    let rate_line = if session.measured_drops_per_minute > 0 {
        Line::from(Span::styled(
            format!("{} drops/min", session.measured_drops_per_minute),
            bold().fg(Color::Green),
        ))
    } else {
        Line::from(Span::styled("measuring...", dim()))
    };

    let lines = vec![
        Line::from(Span::styled("measure drip rate", bold().fg(Color::Cyan))),
        Line::from(""),
        Line::from(Span::styled(
            "press (t) each time a drop falls; the rate settles after six seconds",
            dim(),
        )),
        Line::from(""),
        Line::from(Span::styled(
            format!("taps: {}", session.tap_count),
            bold(),
        )),
        rate_line,
        Line::from(""),
        Line::from(Span::styled(
            "(t)ap (r)eset (b)ack (esc) quit",
            dim(),
        )),
    ];

    centered_lines(lines, area, buf);
}

fn render_timer(app: &App, area: Rect, buf: &mut Buffer) {
    let session = app.store.session();
    let remaining = app.store.remaining_minutes();
    let level = 1.0 - app.store.progress_ratio();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(1), // countdown
            Constraint::Length(1), // status / warning
            Constraint::Length(1), // padding
            Constraint::Length(3), // bag level gauge
            Constraint::Length(1), // padding
            Constraint::Length(1), // legend
            Constraint::Min(1),
        ])
        .split(area);

    let countdown = Paragraph::new(Span::styled(
        format!("{} remaining", format_countdown(remaining)),
        bold(),
    ))
    .alignment(Alignment::Center);
    countdown.render(chunks[1], buf);

    let status = status_line(session, remaining);
    Paragraph::new(status)
        .alignment(Alignment::Center)
        .render(chunks[2], buf);

    let gauge = Gauge::default()
        .gauge_style(Style::default().fg(gauge_color(remaining)))
        .ratio(level.clamp(0.0, 1.0))
        .label(format!("bag {:.0}%", level * 100.0));
    gauge.render(chunks[4], buf);

    let legend = Paragraph::new(Span::styled(
        "(space) pause (+/-) adjust (1/2/3) level high/half/low (c)omplete (x) stop (esc) quit",
        dim(),
    ))
    .alignment(Alignment::Center);
    legend.render(chunks[6], buf);
}

fn status_line(session: &InfusionSession, remaining: f64) -> Line<'static> {
    if session.is_paused {
        return Line::from(Span::styled(
            "PAUSED",
            bold().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        ));
    }

    if remaining > 0.0 && remaining <= WARN_NOW_MINUTES {
        return Line::from(Span::styled(
            "almost done - notify the nurse",
            bold().fg(Color::Red),
        ));
    }
    if remaining > 0.0 && remaining <= WARN_SOON_MINUTES {
        return Line::from(Span::styled(
            "nearing the end - watch for blood return",
            bold().fg(Color::Yellow),
        ));
    }

    match session.calibration {
        Some(CalibrationLevel::Half) => Line::from(Span::styled("on track", dim())),
        Some(level) => Line::from(Span::styled(
            format!("recalibrated ({level})"),
            dim(),
        )),
        None => Line::from(Span::styled("running", dim())),
    }
}

fn gauge_color(remaining: f64) -> Color {
    if remaining > 0.0 && remaining <= WARN_NOW_MINUTES {
        Color::Red
    } else if remaining > 0.0 && remaining <= WARN_SOON_MINUTES {
        Color::Yellow
    } else {
        Color::Cyan
    }
}

fn render_completed(app: &App, area: Rect, buf: &mut Buffer) {
    let session = app.store.session();

    let lines = vec![
        Line::from(Span::styled(
            "infusion complete",
            bold().fg(Color::Green),
        )),
        Line::from(""),
        Line::from(Span::styled(
            format!(
                "{:.0} ml at {} drops/ml",
                session.volume, session.drop_factor
            ),
            Style::default(),
        )),
        Line::from(""),
        Line::from(Span::styled("(n)ew session (esc) quit", dim())),
    ];

    centered_lines(lines, area, buf);
}
