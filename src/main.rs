//! runpanel: a local process supervisor with an interactive terminal panel.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! loads the project configuration, and runs the panel's event loop on top of
//! the process supervisor.

mod app;
mod clipboard;
mod config;
mod events;
mod output;
mod poller;
mod process;
mod supervisor;
mod tui;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use crossterm::event::KeyEventKind;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::app::{App, AppAction};
use crate::config::Config;
use crate::events::Event;
use crate::poller::{StatusPoller, DEFAULT_POLL_INTERVAL};
use crate::process::CommandDefinition;
use crate::supervisor::{ShellConfig, Supervisor, SupervisorError, SupervisorSettings};

const DEFAULT_CONFIG_FILE: &str = "runpanel.toml";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "runpanel",
    version,
    about = "Run, stop and watch project commands from one panel",
    styles = help_styles(),
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to the configuration file (default: ./runpanel.toml).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Max output lines kept per command.
    #[arg(long)]
    max_lines: Option<usize>,
    /// Status refresh interval (ms).
    #[arg(long)]
    poll_ms: Option<u64>,
    /// Delay between stop and start on restart (ms).
    #[arg(long)]
    restart_delay_ms: Option<u64>,
    /// Shell used to run commands.
    #[arg(long)]
    shell: Option<String>,
    /// Write diagnostics to this file (filter with RUST_LOG).
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Commands to start when the panel opens.
    names: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the configured commands and exit.
    List,
}

/// Runtime configuration derived from CLI arguments and the config file.
#[derive(Debug, Clone)]
struct RunSettings {
    supervisor: SupervisorSettings,
    poll_interval: Duration,
    use_symbols: bool,
    autostart: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(path) = &cli.log_file {
        init_logging(path)?;
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if cli.config.is_none() && !config_path.exists() {
        bail!("no {} in the current directory (use --config)", DEFAULT_CONFIG_FILE);
    }
    let config = config::load_config(&config_path)?;
    let (definitions, settings) = resolve_settings(&cli, &config)?;
    if definitions.is_empty() {
        bail!("no commands defined (add [[command]] entries to {})", config_path.display());
    }

    if let Some(Commands::List) = cli.command {
        print_commands(&definitions);
        return Ok(());
    }

    info!(
        config = %config_path.display(),
        commands = definitions.len(),
        "starting panel"
    );
    let supervisor = Supervisor::new(
        definitions,
        settings.supervisor.clone(),
        tokio::runtime::Handle::current(),
    );
    run_panel(supervisor, settings).await
}

async fn run_panel(supervisor: Supervisor, settings: RunSettings) -> Result<()> {
    let mut app = App::new(supervisor.overview(), settings.use_symbols);
    for name in &settings.autostart {
        if let Err(err) = supervisor.start(name) {
            warn!(job = %name, error = %err, "autostart failed");
            app.set_status_error(err.to_string());
        }
    }

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let refresh = Arc::new(Notify::new());
    let notifier = Arc::clone(&refresh);
    // Notify keeps at most one pending permit, so slow redraws coalesce refreshes.
    let poller = StatusPoller::spawn(settings.poll_interval, true, move || {
        notifier.notify_one();
        std::future::ready(())
    });

    let mut terminal = tui::init_terminal()?;
    spawn_input_listener(event_tx.clone());
    spawn_signal_listener(event_tx);
    refresh_app(&mut app, &supervisor);

    let mut result = Ok(());
    loop {
        if let Err(err) = tui::draw(&mut app, &mut terminal) {
            result = Err(err.into());
            break;
        }
        tokio::select! {
            Some(event) = event_rx.recv() => match event {
                Event::Key(key) => {
                    let action = app.handle_key(key);
                    handle_app_action(action, &mut app, &supervisor);
                    refresh_app(&mut app, &supervisor);
                }
                Event::Focus(focused) => {
                    // Catch up at once on regaining focus instead of waiting a tick.
                    if focused && !poller.is_active() {
                        refresh_app(&mut app, &supervisor);
                    }
                    poller.set_active(focused);
                }
                Event::Resize => {
                    let _ = terminal.autoresize();
                }
                Event::Shutdown { signal } => {
                    info!(signal, "shutdown requested");
                    app.should_quit = true;
                }
            },
            _ = refresh.notified() => refresh_app(&mut app, &supervisor),
        }
        if app.should_quit {
            break;
        }
    }

    poller.stop();
    app.set_status_message("stopping commands...");
    let _ = tui::draw(&mut app, &mut terminal);
    let report = supervisor.shutdown(SHUTDOWN_TIMEOUT).await;
    tui::restore_terminal(terminal)?;
    for (name, err) in &report.failed {
        warn!(job = %name, error = %err, "stop failed during shutdown");
    }
    result
}

fn refresh_app(app: &mut App, supervisor: &Supervisor) {
    let jobs = supervisor.overview();
    let output = app
        .selected_name()
        .and_then(|name| supervisor.output_snapshot(&name));
    app.refresh(jobs, output);
}

fn handle_app_action(action: AppAction, app: &mut App, supervisor: &Supervisor) {
    match action {
        AppAction::None | AppAction::Quit => {}
        AppAction::Start(name) => {
            report_outcome(app, supervisor.start(&name), format!("started {}", name));
        }
        AppAction::Stop(name) => {
            report_outcome(app, supervisor.stop(&name), format!("stopping {}", name));
        }
        AppAction::Restart(name) => {
            report_outcome(app, supervisor.restart(&name), format!("restarting {}", name));
        }
        AppAction::StopAll => {
            let report = supervisor.stop_all();
            if report.failed.is_empty() {
                app.set_status_message(format!("stopped {} command(s)", report.stopped.len()));
            } else {
                let failed = report
                    .failed
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                app.set_status_error(format!(
                    "stopped {} command(s), failed: {}",
                    report.stopped.len(),
                    failed
                ));
            }
        }
        AppAction::Copy(name) => match supervisor.output_snapshot(&name) {
            Some(lines) => match clipboard::copy_lines(&lines) {
                Ok(count) => app.set_status_message(format!("copied {} line(s) of {}", count, name)),
                Err(err) => app.set_status_error(format!("copy failed: {:#}", err)),
            },
            None => app.set_status_error(format!("{} has no output yet", name)),
        },
    }
}

fn report_outcome(app: &mut App, outcome: Result<(), SupervisorError>, success: String) {
    match outcome {
        Ok(()) => app.set_status_message(success),
        Err(err) => app.set_status_error(err.to_string()),
    }
}

fn spawn_input_listener(tx: mpsc::Sender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            let event = match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    Event::Key(key)
                }
                Ok(crossterm::event::Event::FocusGained) => Event::Focus(true),
                Ok(crossterm::event::Event::FocusLost) => Event::Focus(false),
                Ok(crossterm::event::Event::Resize(_, _)) => Event::Resize,
                _ => continue,
            };
            if tx.blocking_send(event).is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    let _ = tx.send(Event::Shutdown { signal: "SIGINT" }).await;
                }
                _ = sigterm.recv() => {
                    let _ = tx.send(Event::Shutdown { signal: "SIGTERM" }).await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(Event::Shutdown { signal: "CTRL-C" }).await;
        }
    });
}

fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create log file {}", path.display()))?;
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false);
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("runpanel=info"));
    tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .init();
    Ok(())
}

/// Merges CLI overrides onto the config file and resolves autostart names.
fn resolve_settings(cli: &Cli, config: &Config) -> Result<(Vec<CommandDefinition>, RunSettings)> {
    let definitions = config.definitions();

    let mut shell = ShellConfig::default();
    if let Some(program) = cli.shell.clone().or_else(|| config.shell.clone()) {
        shell.program = program;
    }
    if let Some(flag) = config.shell_flag.clone() {
        shell.flag = flag;
    }
    let defaults = SupervisorSettings::default();
    let max_lines = cli.max_lines.or(config.max_lines).unwrap_or(defaults.max_lines);
    if max_lines == 0 {
        bail!("--max-lines must be positive");
    }
    let restart_delay = cli
        .restart_delay_ms
        .or(config.restart_delay_ms)
        .map(Duration::from_millis)
        .unwrap_or(defaults.restart_delay);
    let poll_interval = cli
        .poll_ms
        .or(config.poll_interval_ms)
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    if poll_interval.is_zero() {
        bail!("--poll-ms must be positive");
    }

    let mut autostart: Vec<String> = definitions
        .iter()
        .filter(|def| def.autostart)
        .map(|def| def.name.clone())
        .collect();
    for name in &cli.names {
        if !definitions.iter().any(|def| &def.name == name) {
            bail!("unknown command: {}", name);
        }
        if !autostart.contains(name) {
            autostart.push(name.clone());
        }
    }

    let settings = RunSettings {
        supervisor: SupervisorSettings {
            max_lines,
            restart_delay,
            shell,
        },
        poll_interval,
        use_symbols: config.symbols.unwrap_or(true),
        autostart,
    };
    Ok((definitions, settings))
}

fn print_commands(definitions: &[CommandDefinition]) {
    let width = definitions
        .iter()
        .map(|def| def.name.len())
        .max()
        .unwrap_or(0);
    for def in definitions {
        let auto = if def.autostart { " (autostart)" } else { "" };
        println!(
            "{:<width$}  [{}] {}{}",
            def.name,
            def.groups.join(", "),
            def.cmd,
            auto,
            width = width
        );
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}
