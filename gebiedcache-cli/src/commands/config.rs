//! `config` command: inspect and edit the INI settings file.
//!
//! `show` explains what the settings mean for the area store (how long
//! entries live, how failed fetches are retried) before listing the raw keys.

use std::path::Path;
use std::time::Duration;

use clap::Subcommand;
use console::style;
use gebiedcache::config::{config_file_path, ConfigFile, ConfigKey};
use gebiedcache::StoreConfig;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one setting (e.g. cache.ttl_secs)
    Get { key: String },

    /// Change one setting and write the file
    Set { key: String, value: String },

    /// Explain the effective store behaviour and list every setting
    Show,

    /// Print where the settings file lives
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    let path = config_file_path();
    match command {
        ConfigCommands::Get { key } => {
            println!("{}", get_value(&path, &key)?);
        }
        ConfigCommands::Set { key, value } => {
            let (key, stored) = set_value(&path, &key, &value)?;
            println!("{} = {}", key, stored);
            println!("{} {}", style("Saved to").dim(), path.display());
        }
        ConfigCommands::Show => {
            let config = load_at(&path)?;
            println!("{}", style("Store behaviour").bold());
            for line in store_summary(&config.store_config()) {
                println!("  {}", line);
            }
            println!();
            println!("{} ({})", style("Settings").bold(), path.display());
            for line in settings_lines(&config) {
                println!("{}", line);
            }
        }
        ConfigCommands::Path => println!("{}", path.display()),
    }
    Ok(())
}

/// Settings at `path`, or defaults when there is no file yet.
fn load_at(path: &Path) -> Result<ConfigFile, CliError> {
    if path.exists() {
        Ok(ConfigFile::load_from(path)?)
    } else {
        Ok(ConfigFile::default())
    }
}

fn get_value(path: &Path, key: &str) -> Result<String, CliError> {
    let key: ConfigKey = key.parse()?;
    let value = key.get(&load_at(path)?);
    Ok(if value.is_empty() {
        "(not set)".to_string()
    } else {
        value
    })
}

/// Validates and stores one value. Nothing is written if the value is rejected.
fn set_value(path: &Path, key: &str, value: &str) -> Result<(ConfigKey, String), CliError> {
    let key: ConfigKey = key.parse()?;
    let mut config = load_at(path)?;
    key.set(&mut config, value)?;
    config.save_to(path)?;
    Ok((key, key.get(&config)))
}

/// Plain-language description of how the store will behave.
fn store_summary(config: &StoreConfig) -> Vec<String> {
    let mut lines = vec![format!(
        "Entries are served for {} after they are fetched",
        format_duration(config.ttl)
    )];

    let retries = config.retry.max_retries();
    if retries == 0 {
        lines.push("No retries: the first failed attempt is final".to_string());
    } else {
        let waits: Vec<String> = (1..=retries)
            .filter_map(|n| config.retry.delay_for_retry(n))
            .map(format_duration)
            .collect();
        lines.push(format!(
            "Up to {} attempts, waiting {} between them",
            config.retry.max_attempts(),
            waits.join(", ")
        ));
    }

    lines.push(if config.retry_missing_geometry {
        "A missing geometry is retried like a network error".to_string()
    } else {
        "A missing geometry fails the area immediately".to_string()
    });

    lines.push(format!(
        "Facilities are searched {}° lat / {}° lon beyond the area",
        config.bbox_buffer.lat_deg, config.bbox_buffer.lon_deg
    ));
    lines
}

/// Every key grouped by section; `*` marks values changed from the default.
fn settings_lines(config: &ConfigFile) -> Vec<String> {
    let defaults = ConfigFile::default();
    let mut lines = Vec::new();
    let mut section = "";
    let mut changed = false;

    for key in ConfigKey::all() {
        if key.section() != section {
            section = key.section();
            lines.push(format!("  [{}]", section));
        }
        let value = key.get(config);
        let marker = if value != key.get(&defaults) {
            changed = true;
            "*"
        } else {
            " "
        };
        let shown = if value.is_empty() { "(not set)" } else { &value };
        lines.push(format!("  {} {} = {}", marker, key.key_name(), shown));
    }

    if changed {
        lines.push("  * differs from the built-in default".to_string());
    }
    lines
}

/// Compact duration: `250ms`, `1.5s`, `30m`, `2h`.
fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms % 1000 != 0 {
        format!("{}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        if secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}
