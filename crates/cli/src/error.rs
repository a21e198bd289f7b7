//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Broker client could not be built
    #[error("Failed to set up broker client for {address}: {message}")]
    BrokerSetup { address: String, message: String },

    /// A pipeline stage ended abnormally
    #[error("Pipeline stage '{stage}' failed: {message}")]
    Stage { stage: &'static str, message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn broker_setup(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerSetup {
            address: address.into(),
            message: message.into(),
        }
    }

    pub fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }
}
