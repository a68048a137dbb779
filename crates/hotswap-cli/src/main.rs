//! Hotswap CLI - Drive live code-unit replacement from the command line

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use hotswap_kernel::HotswapConfig;
use hotswap_runtime::Hotswap;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let config: HotswapConfig = match &cli.config {
        Some(path) => hotswap_kernel::config::load_config(path)?,
        None => HotswapConfig::default(),
    };
    let hotswap = Hotswap::init(config)?;

    match cli.command {
        Commands::Run => commands::run::run(&hotswap)?,
        Commands::Invoke {
            unit,
            operation,
            args,
            kwargs,
        } => commands::invoke::run(&hotswap, &unit, &operation, &args, &kwargs)?,
        Commands::Backups { unit } => commands::backups::run(&hotswap, &unit)?,
    }

    hotswap.shutdown();
    Ok(())
}
