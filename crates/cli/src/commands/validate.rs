//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{BridgeConfig, DeadLetterKind, StoreKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    broker: String,
    topic: String,
    store: String,
    table: String,
    max_in_flight: usize,
    retry_attempts: Option<u32>,
    threshold_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = match &args.config {
        Some(path) => path.display().to_string(),
        None => "<defaults + environment>".to_string(),
    };
    info!(config = %config_path, "Validating configuration");

    if let Some(path) = &args.config {
        if !path.exists() {
            return ValidationResult {
                valid: false,
                config_path,
                error: Some(format!("File not found: {}", path.display())),
                warnings: None,
                summary: None,
            };
        }
    }

    match config_loader::ConfigLoader::load(args.config.as_deref()) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    broker: config.broker.address.clone(),
                    topic: config.broker.topic.clone(),
                    store: format!("{:?}", config.store.kind),
                    table: config.store.table.clone(),
                    max_in_flight: config.dispatcher.max_in_flight,
                    retry_attempts: config.store.retry.max_attempts,
                    threshold_count: config.thresholds.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &BridgeConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.store.kind == StoreKind::Log {
        warnings.push("store.kind is 'log' - readings will not be persisted".to_string());
    }

    if config.dead_letter.kind == DeadLetterKind::Log {
        warnings.push(
            "dead_letter.kind is 'log' - failed readings survive only in logs".to_string(),
        );
    }

    if config.broker.qos == 0 {
        warnings.push("broker.qos is 0 - messages may be lost during reconnects".to_string());
    }

    if config.broker.password.is_some() && config.broker.username.is_none() {
        warnings.push("broker.password set without broker.username".to_string());
    }

    for threshold in config.thresholds.iter().filter(|t| !t.enabled) {
        warnings.push(format!(
            "Threshold for '{}' is disabled",
            threshold.sensor_type
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Broker: {} ({})", summary.broker, summary.topic);
            println!("  Store: {} -> {}", summary.store, summary.table);
            println!("  Max in flight: {}", summary.max_in_flight);
            if let Some(attempts) = summary.retry_attempts {
                println!("  Retry attempts: {}", attempts);
            }
            println!("  Thresholds: {}", summary.threshold_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
