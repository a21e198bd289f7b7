//! Store and dead letter implementations
//!
//! MySqlStore is the production store; LogStore and the log/file dead
//! letter sinks cover dry runs and local setups. The memory variants back
//! tests and `--dry-run`.

mod file;
mod log;
mod memory;
mod mysql;

pub use self::file::FileDeadLetter;
pub use self::log::{LogDeadLetter, LogStore};
pub use self::memory::{MemoryDeadLetter, MemoryStore};
pub use self::mysql::{classify_error, create_table_statement, insert_statement, MySqlStore};
