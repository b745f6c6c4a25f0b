//! Control panel rendering

use crate::app::{App, InputMode, Screen};
use crate::semantic::StatusTone;
use crate::session::SessionPhase;
use chrono::Local;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};

const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

/// Render the whole panel
pub fn render_panel(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(5), // Controls
            Constraint::Length(3), // Status
            Constraint::Min(6),    // Log / setup
            Constraint::Length(3), // Footer
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);
    render_controls(f, app, chunks[1]);
    render_status(f, app, chunks[2]);

    match app.screen {
        Screen::Analyst => app.log.render(f, chunks[3], "Analysis Log"),
        Screen::Setup => render_setup(f, app, chunks[3]),
    }

    render_footer(f, app, chunks[4]);
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let (privileges, color) = match app.privileges {
        Some(true) => ("ELEVATED (ROOT/ADMIN)", Color::Green),
        Some(false) => ("RESTRICTED (USER)", Color::Red),
        None => ("UNKNOWN", Color::Gray),
    };

    let line = Line::from(vec![
        Span::styled(
            format!("VOLPANEL v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " | ANALYST NODE: {} | SYSTEM PRIVILEGES: ",
            app.plugins.os().to_string().to_uppercase()
        )),
        Span::styled(privileges, Style::default().fg(color)),
        Span::raw(format!(" | {}", Local::now().format("%H:%M:%S"))),
    ]);

    f.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn render_controls(f: &mut Frame, app: &App, area: Rect) {
    let label = Style::default().fg(Color::DarkGray);
    let editing = Style::default().fg(Color::Black).bg(Color::Yellow);

    let image = if app.mode == InputMode::EditImage {
        Span::styled(format!("{}_", app.input), editing)
    } else if app.image_path.is_empty() {
        Span::styled("(none, press i)", Style::default().fg(Color::Red))
    } else {
        Span::raw(app.image_path.as_str())
    };

    let search = if app.mode == InputMode::Search {
        Span::styled(format!("{}_", app.input), editing)
    } else if app.search_query.is_empty() {
        Span::styled("-", label)
    } else {
        Span::styled(app.search_query.as_str(), Style::default().fg(Color::LightBlue))
    };

    let flag = app.verbosity.flag().unwrap_or_else(|| "quiet".to_string());
    let lines = vec![
        Line::from(vec![Span::styled("Image:     ", label), image]),
        Line::from(vec![
            Span::styled("Plugin:    ", label),
            Span::styled(
                format!("< {} >", app.plugins.selected()),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::styled(format!("  ({})", app.plugins.os()), label),
        ]),
        Line::from(vec![
            Span::styled("Verbosity: ", label),
            Span::raw(format!("{} ({})", app.verbosity, flag)),
            Span::styled("   Search: ", label),
            search,
            Span::styled("   Auto-scroll: ", label),
            Span::raw(if app.log.auto_scroll() { "on" } else { "off" }),
        ]),
    ];

    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Controls")),
        area,
    );
}

fn tone_style(tone: StatusTone) -> Style {
    match tone {
        StatusTone::Neutral => Style::default().fg(Color::Gray),
        StatusTone::ActiveScan => Style::default().fg(Color::Magenta),
        StatusTone::DataActive => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        StatusTone::Error => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
    }
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let phase = app.phase();
    let mut spans = Vec::new();

    if phase != SessionPhase::Idle {
        let frame = (Local::now().timestamp_subsec_millis() / 250) as usize % SPINNER.len();
        spans.push(Span::raw(format!("{} ", SPINNER[frame])));
    }
    spans.push(Span::styled(app.status.text.as_str(), tone_style(app.status.tone)));

    if let Some(run) = &app.active {
        let elapsed = Local::now().signed_duration_since(run.started_at);
        spans.push(Span::raw(format!(
            "  [pid {} | {}s]",
            run.pid,
            elapsed.num_seconds()
        )));
    }
    if phase == SessionPhase::Stopping {
        spans.push(Span::styled("  STOPPING", Style::default().fg(Color::Yellow)));
    }
    if let Some(summary) = &app.last_summary {
        spans.push(Span::styled(
            format!(
                "  lines {} | results {} | info {} | diagnostics {}",
                summary.total(),
                summary.result_header,
                summary.info,
                summary.diagnostic
            ),
            Style::default().fg(Color::DarkGray),
        ));
    }

    f.render_widget(
        Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn render_setup(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(20)])
        .split(area);

    let items: Vec<ListItem> = app
        .setup_entries
        .iter()
        .map(|entry| ListItem::new(entry.label.as_str()))
        .collect();

    let title = if app.setup_runner.is_busy() {
        "Setup (running...)"
    } else {
        "Setup (Enter run)"
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan))
        .highlight_symbol("> ");

    let mut state = ListState::default();
    state.select(Some(app.setup_selected));
    f.render_stateful_widget(list, chunks[0], &mut state);

    app.log.render(f, chunks[1], "Setup Log");
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let text = match (app.mode, app.screen) {
        (InputMode::ConfirmPurge, _) => Line::from(Span::styled(
            "Permanently delete the symbol cache? (y/n)",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        (InputMode::EditImage, _) | (InputMode::Search, _) => {
            Line::from("Enter apply | Esc cancel")
        }
        (InputMode::Normal, Screen::Setup) => {
            Line::from("↑↓ select | Enter run | PgUp/PgDn scroll | c clear | Esc back | q quit")
        }
        (InputMode::Normal, Screen::Analyst) => Line::from(
            "i image | ←→ plugin | o os | 0-3/v verbosity | r run | s stop | / search | n clear search | c clear | a auto-scroll | g setup | p purge | q quit",
        ),
    };

    let block = match &app.notice {
        Some(notice) => Block::default().borders(Borders::ALL).title(notice.as_str()),
        None => Block::default().borders(Borders::ALL),
    };
    f.render_widget(Paragraph::new(text).block(block), area);
}
