//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Park IoT Bridge - MQTT sensor readings into MySQL
#[derive(Parser, Debug)]
#[command(
    name = "park-iot-bridge",
    author,
    version,
    about = "MQTT to MySQL ingestion bridge for park IoT sensors",
    long_about = "Subscribes to sensor telemetry on an MQTT broker, decodes each \n\
                  message into a reading and persists it, retrying transient store \n\
                  failures and dead-lettering readings that cannot be stored."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "PARK_IOT_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "PARK_IOT_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bridge until Ctrl-C / SIGTERM
    Run(RunArgs),

    /// Validate configuration without connecting anywhere
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); defaults plus environment if omitted
    #[arg(short, long, env = "PARK_IOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override broker address, e.g. mqtt://broker.local:1883
    #[arg(long)]
    pub broker_address: Option<String>,

    /// Override store connection string
    #[arg(long)]
    pub store_url: Option<String>,

    /// Override the default device id
    #[arg(long)]
    pub device_id: Option<String>,

    /// Prometheus metrics port (unset = disabled)
    #[arg(long, env = "PARK_IOT_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Load and validate configuration, print a summary and exit
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, env = "PARK_IOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
