//! Command implementations.

mod run;
mod validate;

pub use run::run_bridge;
pub use validate::run_validate;
