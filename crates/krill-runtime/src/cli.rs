//! Command line arguments.

use clap::Parser;
use humantime_serde::re::humantime;
use std::path::PathBuf;
use std::time::Duration;

use crate::loader::{ConfigFormat, ConfigSource};

/// Krill: a configurable IoT fleet simulator
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "krill", version)]
#[command(about = "Builds a simulated IoT fleet from a configuration document and runs it")]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "./config.yml")]
    pub config: PathBuf,

    /// Read the configuration from stdin instead of a file
    #[arg(long)]
    pub stdin: bool,

    /// Parse the configuration as JSON instead of YAML
    #[arg(long)]
    pub json: bool,

    /// Stop after this long (e.g. "30s", "5m"). Runs until Ctrl-C otherwise
    #[arg(short, long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

impl Cli {
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        if self.stdin {
            ConfigSource::Stdin
        } else {
            ConfigSource::File(self.config.clone())
        }
    }

    #[must_use]
    pub fn format(&self) -> ConfigFormat {
        if self.json {
            ConfigFormat::Json
        } else {
            ConfigFormat::Yaml
        }
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(text).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(duration)
}
