//! # Dispatcher
//!
//! 读数写入模块。
//!
//! 负责：
//! - 消费 `SensorReading`
//! - 有界并发写入主存储，瞬时错误指数退避重试
//! - 重试耗尽或永久错误时写入 dead letter，不丢数据

pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod retry;
pub mod sinks;

pub use contracts::{DeadLetterSink, ReadingStore, SensorReading};
pub use dispatcher::{
    create_dead_letter, create_store, DeadLetterBackend, Dispatcher, StoreBackend,
};
pub use error::DispatcherError;
pub use handle::{DeadLetterHandle, DeadLetterSender};
pub use metrics::{MetricsSnapshot, WriterMetrics};
pub use retry::{persist_with_retry, WriteOutcome};
pub use sinks::{FileDeadLetter, LogDeadLetter, LogStore, MemoryDeadLetter, MemoryStore, MySqlStore};
