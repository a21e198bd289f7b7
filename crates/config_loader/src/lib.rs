//! # Config Loader
//!
//! Configuration loading and parsing module.
//!
//! Responsibilities:
//! - Parse TOML/JSON configuration files
//! - Apply `PARK_IOT_*` environment overrides
//! - Validate configuration legality
//! - Generate `BridgeConfig`
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use std::path::Path;
//!
//! let config = ConfigLoader::load(Some(Path::new("bridge.toml"))).unwrap();
//! println!("Broker: {}", config.broker.address);
//! ```

mod env;
mod parser;
mod validator;

pub use contracts::BridgeConfig;
pub use env::{apply_overrides, EnvOverride, ENV_OVERRIDES};
pub use parser::ConfigFormat;

use contracts::ContractError;
use std::path::Path;

/// Configuration loader
///
/// Provides static methods to load configuration from files or strings.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load the effective configuration
    ///
    /// File values (or defaults when `path` is `None`) are overlaid with
    /// process environment overrides, then validated.
    ///
    /// # Errors
    /// - File read or parse failure
    /// - Validation failure
    pub fn load(path: Option<&Path>) -> Result<BridgeConfig, ContractError> {
        let mut config = match path {
            Some(path) => {
                let format = Self::detect_format(path)?;
                let content = Self::read_file(path)?;
                parser::parse(&content, format)?
            }
            None => BridgeConfig::default(),
        };
        env::apply_overrides(&mut config, |key| std::env::var(key).ok());
        validator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from file path, without environment overrides
    ///
    /// Automatically detects format from file extension (.toml / .json).
    ///
    /// # Errors
    /// - File read failure
    /// - Unsupported format
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_path(path: &Path) -> Result<BridgeConfig, ContractError> {
        let format = Self::detect_format(path)?;
        let content = Self::read_file(path)?;
        Self::load_from_str(&content, format)
    }

    /// Load configuration from string
    ///
    /// # Errors
    /// - Parse failure
    /// - Validation failure
    pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<BridgeConfig, ContractError> {
        Self::parse_and_validate(content, format)
    }

    /// Re-run validation, e.g. after CLI overrides were applied
    pub fn validate(config: &BridgeConfig) -> Result<(), ContractError> {
        validator::validate(config)
    }

    /// Serialize BridgeConfig to TOML string
    pub fn to_toml(config: &BridgeConfig) -> Result<String, ContractError> {
        toml::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("TOML serialize error: {e}")))
    }

    /// Serialize BridgeConfig to JSON string
    pub fn to_json(config: &BridgeConfig) -> Result<String, ContractError> {
        serde_json::to_string_pretty(config)
            .map_err(|e| ContractError::config_parse(format!("JSON serialize error: {e}")))
    }
}

impl ConfigLoader {
    /// Infer configuration format from file extension
    fn detect_format(path: &Path) -> Result<ConfigFormat, ContractError> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ContractError::config_parse("cannot determine file format from extension")
        })?;

        ConfigFormat::from_extension(ext).ok_or_else(|| {
            ContractError::config_parse(format!("unsupported config format: .{ext}"))
        })
    }

    /// Read configuration file content
    fn read_file(path: &Path) -> Result<String, ContractError> {
        Ok(std::fs::read_to_string(path)?)
    }

    /// Parse and validate configuration content
    fn parse_and_validate(content: &str, format: ConfigFormat) -> Result<BridgeConfig, ContractError> {
        let config = parser::parse(content, format)?;
        validator::validate(&config)?;
        Ok(config)
    }
}
