//! Runtime configuration
//!
//! [`HotswapConfig`] describes the backup directory, search paths, worker
//! timeouts, the optional compilation bridge and the units a driver should
//! register at startup. With the `config` feature it can be loaded from
//! YAML, TOML or JSON files.
//!
//! ## Features
//!
//! - Auto-detection of format from file extension
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Configuration merging from multiple sources

mod types;
pub use types::{BridgeConfig, HotswapConfig, UnitConfig, WorkerConfig};

#[cfg(feature = "config")]
mod loader;
#[cfg(feature = "config")]
pub use loader::{detect_format, from_str, load_config, load_merged, substitute_env_vars};
#[cfg(feature = "config")]
pub use ::config::FileFormat;

#[cfg(all(test, feature = "config"))]
mod tests;

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;
