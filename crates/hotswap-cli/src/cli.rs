//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hotswap CLI - Replace running code units without restarting
#[derive(Parser)]
#[command(name = "hotswap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (toml, json or yaml)
    #[arg(short = 'c', long, global = true, env = "HOTSWAP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Register the configured units, start their workers and read
    /// commands from stdin
    Run,

    /// Call one operation of a unit and print its result
    Invoke {
        /// Unit name
        unit: String,

        /// Operation name
        operation: String,

        /// Positional argument as JSON (repeatable)
        #[arg(short, long = "arg")]
        args: Vec<String>,

        /// Keyword argument as key=JSON (repeatable)
        #[arg(short, long = "kwarg")]
        kwargs: Vec<String>,
    },

    /// List stored backups of a unit
    Backups {
        /// Unit name
        unit: String,
    },
}
