//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{redact_url, BridgeConfig};
use tracing::info;

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::Bridge;

/// Execute the `run` command
pub async fn run_bridge(args: &RunArgs) -> Result<()> {
    let config = load_config(args)?;

    info!(
        broker = %config.broker.address,
        topic = %config.broker.topic,
        store = ?config.store.kind,
        table = %config.store.table,
        max_in_flight = config.dispatcher.max_in_flight,
        thresholds = config.thresholds.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config, args.metrics_port);
        return Ok(());
    }

    let bridge = Bridge::new(config, args.metrics_port);

    info!("Starting bridge...");
    let stats = bridge
        .run(setup_shutdown_signal())
        .await
        .context("Bridge execution failed")?;

    info!(
        persisted = stats.writer.persisted,
        dead_lettered = stats.writer.dead_lettered,
        duration_secs = stats.duration.as_secs_f64(),
        throughput = format!("{:.2}", stats.throughput()),
        "Bridge stopped cleanly"
    );
    stats.print_summary();

    Ok(())
}

/// File (or defaults) + environment, then CLI flags, then validation
fn load_config(args: &RunArgs) -> Result<BridgeConfig> {
    if let Some(path) = &args.config {
        info!(config = %path.display(), "Loading configuration");
        if !path.exists() {
            return Err(CliError::config_not_found(path.display().to_string()).into());
        }
    } else {
        info!("No configuration file given, using defaults and environment");
    }

    let mut config = config_loader::ConfigLoader::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    if apply_cli_overrides(&mut config, args) {
        config_loader::ConfigLoader::validate(&config)
            .context("Configuration invalid after command-line overrides")?;
    }

    Ok(config)
}

/// Returns true if anything was overridden
fn apply_cli_overrides(config: &mut BridgeConfig, args: &RunArgs) -> bool {
    let mut changed = false;
    if let Some(address) = &args.broker_address {
        info!(address = %address, "Overriding broker address from CLI");
        config.broker.address = address.clone();
        changed = true;
    }
    if let Some(url) = &args.store_url {
        info!(url = %redact_url(url), "Overriding store url from CLI");
        config.store.url = url.clone();
        changed = true;
    }
    if let Some(device_id) = &args.device_id {
        info!(device_id = %device_id, "Overriding default device id from CLI");
        config.device.default_id = device_id.clone();
        changed = true;
    }
    changed
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &BridgeConfig, metrics_port: Option<u16>) {
    println!("\n=== Configuration Summary ===\n");
    println!("Broker:");
    println!("  Address: {}", config.broker.address);
    println!("  Topic: {} (QoS {})", config.broker.topic, config.broker.qos);
    if let Some(ref username) = config.broker.username {
        println!("  Username: {}", username);
    }
    println!(
        "  Reconnect: {}ms .. {}ms",
        config.broker.reconnect.initial_delay_ms, config.broker.reconnect.max_delay_ms
    );

    println!("\nDevice:");
    println!("  Default id: {}", config.device.default_id);
    println!("  From topic: {}", config.device.from_topic);

    println!("\nStore ({:?}):", config.store.kind);
    println!("  Url: {}", redact_url(&config.store.url));
    println!("  Table: {}", config.store.table);
    println!("  Pool size: {}", config.store.pool_size);
    println!(
        "  Retry: {} attempts, {}ms .. {}ms",
        config.store.retry.max_attempts.unwrap_or(0),
        config.store.retry.initial_delay_ms,
        config.store.retry.max_delay_ms
    );

    println!("\nDispatcher:");
    println!("  Queue capacity: {}", config.dispatcher.queue_capacity);
    println!("  Max in flight: {}", config.dispatcher.max_in_flight);

    println!(
        "\nDead letters: {:?} ({})",
        config.dead_letter.kind,
        config.dead_letter.path.display()
    );

    if !config.thresholds.is_empty() {
        println!("\nThresholds ({}):", config.thresholds.len());
        for threshold in &config.thresholds {
            println!(
                "  - {} [{:?}, {:?}] {}{}",
                threshold.sensor_type,
                threshold.min,
                threshold.max,
                threshold.severity.as_str(),
                if threshold.enabled { "" } else { " (disabled)" }
            );
        }
    }

    if let Some(port) = metrics_port {
        println!("\nMetrics port: {}", port);
    }

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            config: None,
            broker_address: None,
            store_url: None,
            device_id: None,
            metrics_port: None,
            dry_run: true,
        }
    }

    #[test]
    fn test_no_overrides_leaves_config() {
        let mut config = BridgeConfig::default();
        assert!(!apply_cli_overrides(&mut config, &args()));
        assert_eq!(config.device.default_id, "esp32_1");
    }

    #[test]
    fn test_cli_overrides_apply() {
        let mut config = BridgeConfig::default();
        let args = RunArgs {
            broker_address: Some("mqtt://10.1.1.1:1884".to_string()),
            device_id: Some("esp32_7".to_string()),
            ..args()
        };
        assert!(apply_cli_overrides(&mut config, &args));
        assert_eq!(config.broker.address, "mqtt://10.1.1.1:1884");
        assert_eq!(config.device.default_id, "esp32_7");
    }

    #[test]
    fn test_missing_config_file_is_reported() {
        let args = RunArgs {
            config: Some("/nonexistent/bridge.toml".into()),
            ..args()
        };
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[device]\ndefault_id = \"esp32_2\"\n").unwrap();

        let args = RunArgs {
            config: Some(path),
            broker_address: Some("http://example.com".to_string()),
            ..args()
        };
        assert!(load_config(&args).is_err());
    }
}
