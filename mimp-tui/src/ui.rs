//! Ratatui rendering for the TUI.

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use mimp_sdk::{Control, ConnectionState};

use crate::app::{App, Focus, LineKind, sanitize_text};

pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // status bar
            Constraint::Length(3), // controls
            Constraint::Min(3),    // log
            Constraint::Length(1), // key hints
        ])
        .split(frame.area());

    draw_status_bar(frame, app, chunks[0]);
    draw_controls(frame, app, chunks[1]);
    draw_log(frame, app, chunks[2]);
    draw_hints(frame, chunks[3]);

    if let Some(detail) = app.screen().current_alert() {
        draw_alert(frame, detail, app.screen().alerts.len());
    }
}

fn state_color(state: ConnectionState) -> Color {
    match state {
        ConnectionState::Connected => Color::Green,
        ConnectionState::Pending => Color::Yellow,
        ConnectionState::Failed => Color::Red,
        ConnectionState::Closed => Color::Gray,
    }
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let state = app.state();
    let uptime = app
        .connected_at
        .map(|at| {
            let secs = at.elapsed().as_secs();
            format!(" | up {:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
        })
        .unwrap_or_default();

    let line = Line::from(vec![
        Span::styled(
            format!(" [{state}]"),
            Style::default()
                .fg(state_color(state))
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(" {}{uptime}", app.server_url)),
    ]);
    let status = Paragraph::new(line).style(Style::default().bg(Color::Blue).fg(Color::White));
    frame.render_widget(status, area);
}

fn button(control: Control, label: &str, focused: bool) -> Paragraph<'static> {
    let mut style = if control.is_enabled() {
        Style::default().fg(Color::White)
    } else {
        Style::default()
            .fg(Color::DarkGray)
            .add_modifier(Modifier::DIM)
    };
    let mut border = Style::default().fg(Color::DarkGray);
    if focused && control.is_enabled() {
        style = style.add_modifier(Modifier::BOLD);
        border = Style::default().fg(Color::Yellow);
    }

    Paragraph::new(label.to_string())
        .style(style)
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border)
                .title(control.id),
        )
}

fn draw_controls(frame: &mut Frame, app: &App, area: Rect) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(18),
            Constraint::Length(18),
            Constraint::Min(0),
        ])
        .split(area);

    let controls = app.controller.controls();
    frame.render_widget(
        button(controls.connect(), "Connect", app.focus == Focus::Connect),
        cols[0],
    );
    frame.render_widget(
        button(
            controls.disconnect(),
            "Disconnect",
            app.focus == Focus::Disconnect,
        ),
        cols[1],
    );
}

fn draw_log(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" log ");
    let inner_height = block.inner(area).height as usize;

    let log = &app.screen().log;
    let skip = log.len().saturating_sub(inner_height);
    let lines: Vec<Line> = log
        .iter()
        .skip(skip)
        .map(|line| {
            let (prefix, color) = match line.kind {
                LineKind::Info => ("***", Color::Cyan),
                LineKind::Notice => ("<<<", Color::White),
                LineKind::Alert => ("!!!", Color::Magenta),
                LineKind::Error => ("xxx", Color::Red),
            };
            Line::from(vec![
                Span::styled(
                    format!("{} ", line.timestamp),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(format!("{prefix} {}", line.text), Style::default().fg(color)),
            ])
        })
        .collect();

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_hints(frame: &mut Frame, area: Rect) {
    let hints = Paragraph::new(" c connect  d disconnect  Tab focus  Enter press  q quit")
        .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(hints, area);
}

fn draw_alert(frame: &mut Frame, detail: &str, pending: usize) {
    let area = centered_rect(60, 30, frame.area());
    frame.render_widget(Clear, area);

    let mut lines: Vec<Line> = detail
        .lines()
        .map(|l| Line::from(sanitize_text(l)))
        .collect();
    lines.push(Line::from(""));
    let footer = if pending > 1 {
        format!("[Enter/Esc] OK ({} more)", pending - 1)
    } else {
        "[Enter/Esc] OK".to_string()
    };
    lines.push(Line::from(Span::styled(
        footer,
        Style::default().fg(Color::DarkGray),
    )));

    let popup = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Red))
                .title(" Alert "),
        );
    frame.render_widget(popup, area);
}

/// A rect of `percent_x` by `percent_y` centred in `r`.
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
