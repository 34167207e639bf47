//! Configuration management for runpanel.
//!
//! This module defines the structure of the `runpanel.toml` configuration file,
//! loads it, and validates it into the command definitions the supervisor runs.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::process::CommandDefinition;

/// Top-level configuration structure corresponding to `runpanel.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Maximum number of lines to keep in memory per command.
    pub max_lines: Option<usize>,
    /// Interval in milliseconds between panel refreshes.
    pub poll_interval_ms: Option<u64>,
    /// Delay in milliseconds between stopping and respawning on restart.
    pub restart_delay_ms: Option<u64>,
    /// Shell program used to run commands.
    pub shell: Option<String>,
    /// Flag passed to the shell before the command line.
    pub shell_flag: Option<String>,
    /// Whether to use Unicode symbols in the panel (default: true).
    pub symbols: Option<bool>,
    /// Commands that can be run.
    #[serde(rename = "command", default)]
    pub commands: Vec<CommandConfig>,
}

/// Configuration for a single command.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    /// Unique name of the command.
    pub name: String,
    /// Command line, run through the shell.
    pub cmd: String,
    /// Labels the command is listed under (default: `["Default"]`).
    pub groups: Option<Vec<String>>,
    /// Whether to start the command when the panel opens.
    pub autostart: Option<bool>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parses and validates configuration text.
pub fn parse_config(raw: &str) -> Result<Config> {
    let config: Config = toml::from_str(raw).context("failed to parse config")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.max_lines == Some(0) {
        bail!("max_lines must be positive");
    }
    if config.poll_interval_ms == Some(0) {
        bail!("poll_interval_ms must be positive");
    }
    if matches!(config.shell.as_deref(), Some(shell) if shell.trim().is_empty()) {
        bail!("shell must not be empty");
    }
    let mut seen = HashSet::new();
    for command in &config.commands {
        if command.name.trim().is_empty() {
            bail!("command name must not be empty");
        }
        if command.cmd.trim().is_empty() {
            bail!("empty cmd for {}", command.name);
        }
        if !seen.insert(command.name.as_str()) {
            bail!("duplicate command name: {}", command.name);
        }
        if let Some(groups) = &command.groups {
            if groups.iter().any(|group| group.trim().is_empty()) {
                bail!("empty group name for {}", command.name);
            }
        }
    }
    Ok(())
}

impl Config {
    /// Converts validated command entries into definitions, in file order.
    pub fn definitions(&self) -> Vec<CommandDefinition> {
        self.commands
            .iter()
            .map(|command| {
                let mut def = CommandDefinition::new(&command.name, &command.cmd)
                    .with_groups(command.groups.clone().unwrap_or_default());
                def.autostart = command.autostart.unwrap_or(false);
                def
            })
            .collect()
    }
}
