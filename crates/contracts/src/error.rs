//! Layered error definitions
//!
//! Categorized by source: config / message / broker / store / dead letter

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Message Errors =====
    /// Topic does not have the `iot/sensors/<sensor_type>` shape
    #[error("malformed topic '{topic}': {reason}")]
    MalformedTopic { topic: String, reason: String },

    /// Payload is not a finite decimal number
    #[error("malformed payload on '{topic}': {reason}")]
    MalformedPayload { topic: String, reason: String },

    // ===== Broker Errors =====
    /// Broker connection or protocol failure
    #[error("broker transport error: {message}")]
    BrokerTransport { message: String },

    // ===== Store Errors =====
    /// Store write error
    #[error("store '{store}' write error: {message}")]
    StoreWrite {
        store: String,
        message: String,
        /// Whether retrying the same write may succeed
        transient: bool,
    },

    /// Store connection error
    #[error("store '{store}' connection error: {message}")]
    StoreConnection { store: String, message: String },

    // ===== Dead Letter Errors =====
    #[error("dead letter sink '{sink}' write error: {message}")]
    DeadLetterWrite { sink: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse error category, used for metric labels and propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    MalformedTopic,
    MalformedPayload,
    BrokerTransport,
    StoreWrite,
    DeadLetter,
    Io,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::MalformedTopic => "malformed_topic",
            Self::MalformedPayload => "malformed_payload",
            Self::BrokerTransport => "broker_transport",
            Self::StoreWrite => "store_write",
            Self::DeadLetter => "dead_letter",
            Self::Io => "io",
            Self::Other => "other",
        }
    }
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn malformed_topic(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed_payload(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    pub fn broker_transport(message: impl Into<String>) -> Self {
        Self::BrokerTransport {
            message: message.into(),
        }
    }

    /// Store write error that is worth retrying
    pub fn store_transient(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            store: store.into(),
            message: message.into(),
            transient: true,
        }
    }

    /// Store write error that will fail again on retry
    pub fn store_permanent(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            store: store.into(),
            message: message.into(),
            transient: false,
        }
    }

    pub fn dead_letter_write(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DeadLetterWrite {
            sink: sink.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigParse { .. } | Self::ConfigValidation { .. } => ErrorKind::Configuration,
            Self::MalformedTopic { .. } => ErrorKind::MalformedTopic,
            Self::MalformedPayload { .. } => ErrorKind::MalformedPayload,
            Self::BrokerTransport { .. } => ErrorKind::BrokerTransport,
            Self::StoreWrite { .. } | Self::StoreConnection { .. } => ErrorKind::StoreWrite,
            Self::DeadLetterWrite { .. } => ErrorKind::DeadLetter,
            Self::Io(_) => ErrorKind::Io,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Only configuration errors may abort the process, and only at startup.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Whether a store operation that failed with this error should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StoreWrite { transient, .. } => *transient,
            Self::StoreConnection { .. } | Self::BrokerTransport { .. } | Self::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(ContractError::config_validation("broker.address", "empty").is_fatal());
        assert!(ContractError::config_parse("bad toml").is_fatal());
        assert!(!ContractError::malformed_topic("a/b", "too short").is_fatal());
        assert!(!ContractError::broker_transport("connection refused").is_fatal());
        assert!(!ContractError::store_transient("mysql", "timeout").is_fatal());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ContractError::store_transient("mysql", "pool timed out").is_transient());
        assert!(!ContractError::store_permanent("mysql", "unknown column").is_transient());
        assert!(!ContractError::malformed_payload("iot/sensors/x", "empty").is_transient());
    }

    #[test]
    fn test_kind_labels() {
        let err = ContractError::malformed_payload("iot/sensors/temperature", "not a number");
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert_eq!(err.kind().as_str(), "malformed_payload");
        assert!(err.to_string().contains("iot/sensors/temperature"));
    }
}
