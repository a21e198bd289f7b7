//! 配置校验模块
//!
//! Field-level limits come from the `validator` derives on the contract
//! types; the rules here cover cross-field and format constraints:
//! - broker address parses, reconnect has no attempt cap
//! - backoff windows are ordered
//! - mysql store has a mysql url and a plain table identifier
//! - store retry has an attempt cap
//! - aliases and thresholds are well formed

use contracts::{
    BackoffConfig, BridgeConfig, BrokerAddress, ContractError, DeadLetterKind, StoreKind,
    MAX_SENSOR_TYPE_LEN,
};
use ::validator::Validate;

/// 校验 BridgeConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &BridgeConfig) -> Result<(), ContractError> {
    validate_field_limits(config)?;
    validate_broker(config)?;
    validate_device(config)?;
    validate_aliases(config)?;
    validate_store(config)?;
    validate_dead_letter(config)?;
    validate_thresholds(config)?;
    Ok(())
}

fn validate_field_limits(config: &BridgeConfig) -> Result<(), ContractError> {
    config.validate().map_err(|errors| {
        let message = errors.to_string();
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "config".to_string());
        ContractError::config_validation(field, message)
    })
}

fn validate_broker(config: &BridgeConfig) -> Result<(), ContractError> {
    BrokerAddress::parse(&config.broker.address)?;

    if config.broker.reconnect.max_attempts.is_some() {
        return Err(ContractError::config_validation(
            "broker.reconnect.max_attempts",
            "broker reconnects are never capped, remove max_attempts",
        ));
    }
    validate_backoff_window("broker.reconnect", &config.broker.reconnect)?;

    if config.broker.username.is_none() && config.broker.password.is_some() {
        return Err(ContractError::config_validation(
            "broker.password",
            "password given without username",
        ));
    }
    Ok(())
}

fn validate_device(config: &BridgeConfig) -> Result<(), ContractError> {
    if config.device.default_id.contains('/') {
        return Err(ContractError::config_validation(
            "device.default_id",
            "device id cannot contain '/'",
        ));
    }
    Ok(())
}

fn validate_aliases(config: &BridgeConfig) -> Result<(), ContractError> {
    for (from, to) in &config.ingestion.sensor_aliases {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(ContractError::config_validation(
                format!("ingestion.sensor_aliases[{from}]"),
                "alias source and target must be non-empty",
            ));
        }
        if to.len() > MAX_SENSOR_TYPE_LEN {
            return Err(ContractError::config_validation(
                format!("ingestion.sensor_aliases[{from}]"),
                format!("alias target longer than {MAX_SENSOR_TYPE_LEN} bytes"),
            ));
        }
    }
    Ok(())
}

fn validate_store(config: &BridgeConfig) -> Result<(), ContractError> {
    let store = &config.store;

    if store.kind == StoreKind::Mysql
        && !(store.url.starts_with("mysql://") || store.url.starts_with("mariadb://"))
    {
        return Err(ContractError::config_validation(
            "store.url",
            "mysql store requires a mysql:// connection string",
        ));
    }

    if !is_plain_identifier(&store.table) {
        return Err(ContractError::config_validation(
            "store.table",
            format!("'{}' is not a plain table identifier", store.table),
        ));
    }

    if store.retry.max_attempts.is_none() {
        return Err(ContractError::config_validation(
            "store.retry.max_attempts",
            "store retries must be capped",
        ));
    }
    validate_backoff_window("store.retry", &store.retry)
}

fn validate_dead_letter(config: &BridgeConfig) -> Result<(), ContractError> {
    if config.dead_letter.kind == DeadLetterKind::File
        && config.dead_letter.path.as_os_str().is_empty()
    {
        return Err(ContractError::config_validation(
            "dead_letter.path",
            "file dead letter sink needs a path",
        ));
    }
    Ok(())
}

fn validate_thresholds(config: &BridgeConfig) -> Result<(), ContractError> {
    for (idx, threshold) in config.thresholds.iter().enumerate() {
        let field = format!("thresholds[{idx}]");
        match (threshold.min, threshold.max) {
            (None, None) => {
                return Err(ContractError::config_validation(
                    field,
                    "threshold needs min, max or both",
                ));
            }
            (Some(min), Some(max)) if min > max => {
                return Err(ContractError::config_validation(
                    field,
                    format!("min ({min}) must be <= max ({max})"),
                ));
            }
            _ => {}
        }
        let bounds = [threshold.min, threshold.max];
        if bounds.iter().flatten().any(|b| !b.is_finite()) {
            return Err(ContractError::config_validation(
                field,
                "threshold bounds must be finite",
            ));
        }
    }
    Ok(())
}

fn validate_backoff_window(field: &str, backoff: &BackoffConfig) -> Result<(), ContractError> {
    if backoff.initial_delay_ms > backoff.max_delay_ms {
        return Err(ContractError::config_validation(
            format!("{field}.initial_delay_ms"),
            format!(
                "initial_delay_ms ({}) must be <= max_delay_ms ({})",
                backoff.initial_delay_ms, backoff.max_delay_ms
            ),
        ));
    }
    Ok(())
}

/// The table name is interpolated into SQL, so only `[A-Za-z0-9_]` is allowed.
fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Severity, ThresholdConfig};

    fn threshold(min: Option<f64>, max: Option<f64>) -> ThresholdConfig {
        ThresholdConfig {
            sensor_type: "temperature".to_string(),
            min,
            max,
            severity: Severity::Medium,
            message: None,
            enabled: true,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&BridgeConfig::default()).is_ok());
    }

    #[test]
    fn test_bad_broker_address() {
        let mut config = BridgeConfig::default();
        config.broker.address = "mqtt://broker:99999".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("broker.address"));
    }

    #[test]
    fn test_reconnect_cap_rejected() {
        let mut config = BridgeConfig::default();
        config.broker.reconnect.max_attempts = Some(3);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_store_retry_must_be_capped() {
        let mut config = BridgeConfig::default();
        config.store.retry.max_attempts = None;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("store.retry.max_attempts"));
    }

    #[test]
    fn test_inverted_backoff_window() {
        let mut config = BridgeConfig::default();
        config.store.retry.initial_delay_ms = 10_000;
        config.store.retry.max_delay_ms = 100;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_table_name_injection_rejected() {
        let mut config = BridgeConfig::default();
        config.store.table = "readings; DROP TABLE Parks".to_string();
        assert!(validate(&config).is_err());

        config.store.table = "IoTMonitoring".to_string();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_mysql_requires_mysql_url() {
        let mut config = BridgeConfig::default();
        config.store.url = "postgres://localhost/iot".to_string();
        assert!(validate(&config).is_err());

        config.store.kind = StoreKind::Log;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_threshold_rules() {
        let mut config = BridgeConfig::default();
        config.thresholds = vec![threshold(None, None)];
        assert!(validate(&config).is_err());

        config.thresholds = vec![threshold(Some(40.0), Some(10.0))];
        assert!(validate(&config).is_err());

        config.thresholds = vec![threshold(Some(10.0), None), threshold(None, Some(40.0))];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_identifier_lengths_bounded() {
        let mut config = BridgeConfig::default();
        config.device.default_id = "d".repeat(65);
        assert!(validate(&config).is_err());

        let mut config = BridgeConfig::default();
        config
            .ingestion
            .sensor_aliases
            .insert("moisture".to_string(), "s".repeat(65));
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("sensor_aliases"));
    }

    #[test]
    fn test_derive_limits_surface_as_validation_error() {
        let mut config = BridgeConfig::default();
        config.ingestion.channel_capacity = 0;
        let err = validate(&config).unwrap_err();
        assert!(matches!(err, ContractError::ConfigValidation { .. }));
    }
}
