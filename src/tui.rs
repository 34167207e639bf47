//! Terminal User Interface (TUI) rendering and management.
//!
//! This module handles initializing the terminal in raw mode, restoring it on exit,
//! and drawing the panel state using `ratatui`.

use std::io::{self, Stdout};

use crossterm::event::{DisableFocusChange, EnableFocusChange};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen, SetTitle,
};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, BorderType, Borders, Clear, List, ListItem, ListState, Paragraph};
use ratatui::Terminal;

use crate::app::{format_duration, App, Row, StatusLevel};
use crate::output::sanitize_text;
use crate::process::JobStatus;
use crate::supervisor::JobSummary;

/// Type alias for the specific terminal backend used.
pub type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Initializes the terminal for TUI mode.
///
/// Enables raw mode, enters the alternate screen, turns on focus reporting and
/// creates a `ratatui` Terminal instance.
pub fn init_terminal() -> io::Result<TuiTerminal> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableFocusChange)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

/// Restores the terminal to its original state.
pub fn restore_terminal(mut terminal: TuiTerminal) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableFocusChange)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Draws the current panel state to the terminal.
pub fn draw(app: &mut App, terminal: &mut TuiTerminal) -> io::Result<()> {
    let title = window_title(app);
    execute!(terminal.backend_mut(), SetTitle(title))?;
    terminal.draw(|frame| {
        let area = frame.size();
        let vertical = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(4)])
            .split(area);
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
            .split(vertical[0]);
        let border_style = Style::default().fg(Color::DarkGray);

        let list_width = main[0].width as usize;
        let items: Vec<ListItem> = app
            .rows
            .iter()
            .enumerate()
            .map(|(row_idx, row)| match row {
                Row::Group(group) => ListItem::new(Line::from(vec![
                    Span::styled(
                        if app.use_symbols { "▼ " } else { "- " },
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(group.clone(), Style::default().fg(Color::DarkGray)),
                ])),
                Row::Job(idx) => match app.jobs.get(*idx) {
                    Some(job) => job_item(job, row_idx == app.selected, app.use_symbols, list_width),
                    None => ListItem::new(""),
                },
            })
            .collect();
        let list = List::new(items).block(
            Block::default()
                .title("Commands")
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        );
        frame.render_stateful_widget(list, main[0], &mut list_state(app.selected, app.rows.len()));

        let log_block = Block::default()
            .title(log_title(app))
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(border_style);
        let log_area = log_block.inner(main[1]);
        let log_height = log_area.height as usize;
        app.set_log_view_height(log_height);
        let (start, end) = app.visible_range(log_height);
        let lines: Vec<Line> = app.output[start..end]
            .iter()
            .map(|line| output_line(line, log_area.width as usize))
            .collect();
        let empty = lines.is_empty();
        frame.render_widget(Paragraph::new(Text::from(lines)).block(log_block), main[1]);
        if empty {
            let placeholder = Paragraph::new("No output yet")
                .style(Style::default().fg(Color::DarkGray));
            frame.render_widget(placeholder, log_area);
        }

        let default_help = if app.use_symbols {
            "↑/↓ select | Enter start | x stop | r restart | X stop all | y copy | PgUp/PgDn scroll | ? help | q quit"
        } else {
            "Up/Down select | Enter start | x stop | r restart | X stop all | y copy | PgUp/PgDn scroll | ? help | q quit"
        };
        let help_line = match app.status_message() {
            Some((text, StatusLevel::Error)) => {
                Span::styled(text.to_string(), Style::default().fg(Color::Red))
            }
            Some((text, StatusLevel::Info)) => {
                Span::styled(text.to_string(), Style::default().fg(Color::Cyan))
            }
            None => Span::styled(default_help, Style::default().fg(Color::DarkGray)),
        };
        let status = Paragraph::new(Text::from(vec![
            Line::from(Span::raw(app.status_line())),
            Line::from(help_line),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_type(BorderType::Rounded)
                .border_style(border_style),
        );
        frame.render_widget(status, vertical[1]);

        if app.show_help {
            let popup_area = centered_rect(50, 60, area);
            let help_text = [
                "Navigation:",
                "  Up/Down j/k  Select command",
                "  PageUp/Dn    Scroll output",
                "  Home/End     Oldest output / follow",
                "",
                "Actions:",
                "  Enter / s    Start selected",
                "  x            Stop selected",
                "  r            Restart selected",
                "  X            Stop all",
                "  y            Copy output to clipboard",
                "",
                "General:",
                "  ?            Toggle this help",
                "  q            Quit (stops all commands)",
            ]
            .join("\n");
            let help_block = Paragraph::new(help_text)
                .block(
                    Block::default()
                        .title("Help")
                        .borders(Borders::ALL)
                        .border_type(BorderType::Rounded),
                )
                .style(Style::default().bg(Color::DarkGray).fg(Color::White));
            frame.render_widget(Clear, popup_area);
            frame.render_widget(help_block, popup_area);
        }
    })?;
    Ok(())
}

fn job_item(job: &JobSummary, selected: bool, use_symbols: bool, width: usize) -> ListItem<'static> {
    let (indent, name_style) = if selected {
        ("▶ ", Style::default().fg(Color::White).add_modifier(Modifier::BOLD))
    } else {
        ("  ", Style::default().fg(Color::Gray))
    };
    let mut status_span_style = status_style(job.status);
    if !selected {
        status_span_style = status_span_style.add_modifier(Modifier::DIM);
    }
    let mut spans = vec![
        Span::styled(indent, Style::default().fg(Color::Cyan)),
        Span::styled(
            format!("[{}] ", status_char(job.status, use_symbols)),
            status_span_style,
        ),
        Span::styled(job.name.clone(), name_style),
    ];
    if let Some(uptime) = job.uptime {
        spans.push(Span::styled(
            format!(" {}", format_duration(uptime)),
            Style::default().fg(Color::DarkGray),
        ));
    } else if job.restart_pending {
        spans.push(Span::styled(" restarting", Style::default().fg(Color::Yellow)));
    }
    let mut text = Text::from(Line::from(spans));
    if let Some(preview) = job.last_line.as_deref() {
        let preview = strip_carriage(&sanitize_text(preview, true));
        if !preview.is_empty() {
            let available = width.saturating_sub(6);
            text.lines.push(Line::from(vec![
                Span::raw("    "),
                Span::styled(truncate(&preview, available), Style::default().fg(Color::DarkGray)),
            ]));
        }
    }
    ListItem::new(text)
}

fn output_line(line: &str, width: usize) -> Line<'static> {
    let plain = strip_carriage(&sanitize_text(line, true));
    let style = if plain.starts_with("[runpanel]") {
        Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC)
    } else {
        Style::default()
    };
    Line::from(Span::styled(truncate(&plain, width), style))
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
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
        .split(popup_layout[1])[1]
}

fn window_title(app: &App) -> String {
    match app.selected_job() {
        Some(job) => format!("runpanel · {}", job.name),
        None => "runpanel".to_string(),
    }
}

fn log_title(app: &App) -> String {
    let Some(job) = app.selected_job() else {
        return "Output".to_string();
    };
    let state = match (job.status, job.exit_code) {
        (JobStatus::Running, _) => match job.pid {
            Some(pid) => format!("running, pid {}", pid),
            None => "running".to_string(),
        },
        (JobStatus::Exited, _) => "exited 0".to_string(),
        (JobStatus::Failed, Some(code)) => format!("failed, code {}", code),
        (JobStatus::Failed, None) => "failed".to_string(),
        (JobStatus::Stopped, _) => "stopped".to_string(),
    };
    let follow = if app.is_following() { "" } else { " [scrolled]" };
    format!(
        "Output - {} ({}, {} lines){}",
        job.name, state, job.line_count, follow
    )
}

fn list_state(selected: usize, len: usize) -> ListState {
    let mut state = ListState::default();
    if len > 0 {
        state.select(Some(selected.min(len - 1)));
    }
    state
}

fn status_char(status: JobStatus, use_symbols: bool) -> char {
    if use_symbols {
        return match status {
            JobStatus::Running => '▲',
            JobStatus::Stopped => '·',
            JobStatus::Exited => '■',
            JobStatus::Failed => '✗',
        };
    }
    match status {
        JobStatus::Running => 'R',
        JobStatus::Stopped => '.',
        JobStatus::Exited => 'E',
        JobStatus::Failed => 'F',
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Running => Style::default().fg(Color::Green),
        JobStatus::Stopped => Style::default().fg(Color::DarkGray),
        JobStatus::Exited => Style::default().fg(Color::Gray),
        JobStatus::Failed => Style::default().fg(Color::Red),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out = text.chars().take(max.saturating_sub(1)).collect::<String>();
    out.push('~');
    out
}

fn strip_carriage(text: &str) -> String {
    text.rsplit('\r').next().unwrap_or("").to_string()
}
