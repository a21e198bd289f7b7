//! Bridge orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::{run_stages, Bridge};
pub use stats::BridgeStats;
