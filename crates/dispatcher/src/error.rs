//! Dispatcher error types

use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Store creation error
    #[error("failed to create store '{name}': {message}")]
    StoreCreation { name: String, message: String },

    /// Dead letter sink creation error
    #[error("failed to create dead letter sink '{name}': {message}")]
    DeadLetterCreation { name: String, message: String },

    /// Store or sink error (from contract)
    #[error("store error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    /// Create a store creation error
    pub fn store_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreCreation {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn dead_letter_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeadLetterCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
