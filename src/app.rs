//! Panel state and input handling.
//!
//! This module holds the `App` struct, which keeps the most recent sample of
//! job state taken from the supervisor, the grouped list layout, selection and
//! scroll position of the output view. It also defines how key presses are
//! translated into supervisor actions.

use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::process::JobStatus;
use crate::supervisor::JobSummary;

/// A row of the grouped command list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Row {
    /// Group header.
    Group(String),
    /// A command, by index into `App::jobs`.
    Job(usize),
}

/// Actions requested by the user that the event loop carries out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppAction {
    None,
    Start(String),
    Stop(String),
    Restart(String),
    StopAll,
    Copy(String),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Error,
}

/// The panel state container.
#[derive(Debug)]
pub struct App {
    /// Latest status sample, in config order.
    pub jobs: Vec<JobSummary>,
    /// Grouped list layout; a command appears under each of its groups.
    pub rows: Vec<Row>,
    /// Index into `rows`; always points at a `Row::Job` when any exist.
    pub selected: usize,
    /// Output of the selected command as of the last refresh.
    pub output: Vec<String>,
    /// Lines scrolled back from the tail; 0 means following.
    pub scroll_back: usize,
    /// Height of the output view area (for paging).
    pub log_view_height: usize,
    /// Whether to use Unicode symbols.
    pub use_symbols: bool,
    /// Whether to show the help overlay.
    pub show_help: bool,
    /// Flag indicating if the panel should exit.
    pub should_quit: bool,
    status_message: Option<StatusMessage>,
}

#[derive(Debug, Clone)]
struct StatusMessage {
    text: String,
    level: StatusLevel,
    expires_at: Option<Instant>,
}

const STATUS_TTL: Duration = Duration::from_secs(4);

impl App {
    /// Creates the panel from an initial status sample.
    pub fn new(jobs: Vec<JobSummary>, use_symbols: bool) -> Self {
        let rows = group_rows(&jobs);
        let selected = rows
            .iter()
            .position(|row| matches!(row, Row::Job(_)))
            .unwrap_or(0);
        Self {
            jobs,
            rows,
            selected,
            output: Vec::new(),
            scroll_back: 0,
            log_view_height: 0,
            use_symbols,
            show_help: false,
            should_quit: false,
            status_message: None,
        }
    }

    /// Returns the selected command's summary.
    pub fn selected_job(&self) -> Option<&JobSummary> {
        match self.rows.get(self.selected) {
            Some(Row::Job(idx)) => self.jobs.get(*idx),
            _ => None,
        }
    }

    pub fn selected_name(&self) -> Option<String> {
        self.selected_job().map(|job| job.name.clone())
    }

    /// Replaces the status sample and the selected command's output.
    ///
    /// Commands are fixed for the session, so the row layout is kept.
    pub fn refresh(&mut self, jobs: Vec<JobSummary>, output: Option<Vec<String>>) {
        self.jobs = jobs;
        let output = output.unwrap_or_default();
        if self.scroll_back > 0 {
            // Keep the view anchored while new lines arrive below it.
            let grown = output.len().saturating_sub(self.output.len());
            self.scroll_back += grown;
        }
        self.output = output;
        self.clamp_scroll();
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        if self.show_help {
            self.show_help = false;
            return AppAction::None;
        }
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
                AppAction::None
            }
            KeyCode::Down | KeyCode::Char('j') | KeyCode::Tab => {
                self.move_selection(1);
                AppAction::None
            }
            KeyCode::Enter | KeyCode::Char('s') => self.with_selected(AppAction::Start),
            KeyCode::Char('x') => self.with_selected(AppAction::Stop),
            KeyCode::Char('r') => self.with_selected(AppAction::Restart),
            KeyCode::Char('X') => AppAction::StopAll,
            KeyCode::Char('y') => self.with_selected(AppAction::Copy),
            KeyCode::Char('?') => {
                self.show_help = true;
                AppAction::None
            }
            KeyCode::PageUp => {
                self.scroll_up(self.log_view_height.max(1));
                AppAction::None
            }
            KeyCode::PageDown => {
                self.scroll_down(self.log_view_height.max(1));
                AppAction::None
            }
            KeyCode::Home => {
                self.scroll_back = self.max_scroll();
                AppAction::None
            }
            KeyCode::End => {
                self.scroll_back = 0;
                AppAction::None
            }
            _ => AppAction::None,
        }
    }

    fn with_selected(&self, action: fn(String) -> AppAction) -> AppAction {
        self.selected_name().map(action).unwrap_or(AppAction::None)
    }

    /// Moves the selection to the next command row in `delta`'s direction,
    /// skipping group headers.
    pub fn move_selection(&mut self, delta: isize) {
        let mut idx = self.selected as isize;
        loop {
            idx += delta;
            if idx < 0 || idx as usize >= self.rows.len() {
                return;
            }
            if matches!(self.rows[idx as usize], Row::Job(_)) {
                break;
            }
        }
        self.selected = idx as usize;
        self.output.clear();
        self.scroll_back = 0;
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.scroll_back = (self.scroll_back + amount).min(self.max_scroll());
    }

    pub fn scroll_down(&mut self, amount: usize) {
        self.scroll_back = self.scroll_back.saturating_sub(amount);
    }

    pub fn is_following(&self) -> bool {
        self.scroll_back == 0
    }

    /// Range of `output` visible in a view of `height` lines.
    pub fn visible_range(&self, height: usize) -> (usize, usize) {
        let end = self.output.len().saturating_sub(self.scroll_back);
        let start = end.saturating_sub(height);
        (start, end)
    }

    fn max_scroll(&self) -> usize {
        self.output.len().saturating_sub(self.log_view_height.max(1))
    }

    fn clamp_scroll(&mut self) {
        self.scroll_back = self.scroll_back.min(self.max_scroll());
    }

    pub fn set_log_view_height(&mut self, height: usize) {
        self.log_view_height = height;
        self.clamp_scroll();
    }

    /// Summary line: counts of commands per status.
    pub fn status_line(&self) -> String {
        let count = |status: JobStatus| self.jobs.iter().filter(|j| j.status == status).count();
        let divider = if self.use_symbols { " · " } else { " | " };
        [
            format!("{} running", count(JobStatus::Running)),
            format!("{} exited", count(JobStatus::Exited)),
            format!("{} failed", count(JobStatus::Failed)),
            format!("{} stopped", count(JobStatus::Stopped)),
        ]
        .join(divider)
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Info);
    }

    pub fn set_status_error(&mut self, message: impl Into<String>) {
        self.set_status_message_with_level(message, StatusLevel::Error);
    }

    fn set_status_message_with_level(&mut self, message: impl Into<String>, level: StatusLevel) {
        self.status_message = Some(StatusMessage {
            text: message.into(),
            level,
            expires_at: Some(Instant::now() + STATUS_TTL),
        });
    }

    pub fn status_message(&self) -> Option<(&str, StatusLevel)> {
        let message = self.status_message.as_ref()?;
        if message
            .expires_at
            .is_some_and(|expires| Instant::now() >= expires)
        {
            return None;
        }
        Some((message.text.as_str(), message.level))
    }
}

/// Lays commands out under their groups, groups in first-seen order.
pub fn group_rows(jobs: &[JobSummary]) -> Vec<Row> {
    let mut groups: Vec<&str> = Vec::new();
    for job in jobs {
        for group in &job.groups {
            if !groups.contains(&group.as_str()) {
                groups.push(group);
            }
        }
    }
    let mut rows = Vec::new();
    for group in groups {
        rows.push(Row::Group(group.to_string()));
        for (idx, job) in jobs.iter().enumerate() {
            if job.groups.iter().any(|g| g == group) {
                rows.push(Row::Job(idx));
            }
        }
    }
    rows
}

/// Formats an uptime as `MM:SS`, or `HH:MM:SS` past an hour.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else {
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}
