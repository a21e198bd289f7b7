//! Ingestion 错误类型

use contracts::ContractError;
use thiserror::Error;

/// Ingestion 错误
///
/// Message-level failures (malformed topic or payload) are `ContractError`s
/// that are logged and dropped; they never surface here.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Downstream channel closed before the stage finished
    #[error("{stage} channel closed")]
    ChannelClosed {
        /// 阶段名称
        stage: &'static str,
    },

    /// Transport could not be built from configuration
    #[error("invalid broker configuration: {0}")]
    Config(#[source] ContractError),

    /// Transport failed while disconnecting
    #[error("broker disconnect failed: {0}")]
    Disconnect(#[source] ContractError),
}

impl IngestionError {
    pub fn channel_closed(stage: &'static str) -> Self {
        Self::ChannelClosed { stage }
    }
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
