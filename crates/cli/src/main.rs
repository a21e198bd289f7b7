//! # Park IoT Bridge CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 桥接管道编排与生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod pipeline;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_bridge, run_validate};
use observability::ObservabilityConfig;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Metrics exporter is started by `run` once the port is known
    let obs_config = ObservabilityConfig {
        log_format: cli.log_format.into(),
        ..Default::default()
    }
    .with_verbosity(cli.verbose, cli.quiet);
    observability::init_tracing(&obs_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Park IoT bridge starting"
    );

    let result = match &cli.command {
        Commands::Run(args) => run_bridge(args).await,
        Commands::Validate(args) => run_validate(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}
