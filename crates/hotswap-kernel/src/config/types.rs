use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::unit::Args;
use crate::worker::{ThreadConfig, WorkerMode};

/// Hotswap runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotswapConfig {
    /// Directory holding backup records
    pub backup_dir: PathBuf,
    /// Directories searched when a unit is registered without a source location
    pub search_paths: Vec<PathBuf>,
    /// How long `start` waits for a worker to signal readiness
    pub ready_timeout_ms: u64,
    /// How long `stop` waits for a worker thread to finish
    pub stop_timeout_ms: u64,
    /// Pause between invocations of a continuous worker
    pub loop_interval_ms: u64,
    /// Upper bound on one compilation bridge run
    pub bridge_timeout_ms: u64,
    /// External acceleration command
    pub bridge: Option<BridgeConfig>,
    /// Units a driver registers at startup
    pub units: Vec<UnitConfig>,
}

impl Default for HotswapConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("module_backups"),
            search_paths: Vec::new(),
            ready_timeout_ms: 5_000,
            stop_timeout_ms: 1_000,
            loop_interval_ms: 50,
            bridge_timeout_ms: 60_000,
            bridge: None,
            units: Vec::new(),
        }
    }
}

impl HotswapConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backup directory
    pub fn with_backup_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.backup_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Add a search path
    pub fn with_search_path<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.search_paths.push(dir.as_ref().to_path_buf());
        self
    }

    /// Set the worker ready timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the worker stop timeout
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the continuous worker loop interval
    pub fn with_loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the compilation bridge timeout
    pub fn with_bridge_timeout(mut self, timeout: Duration) -> Self {
        self.bridge_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the compilation bridge command
    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Add a unit to register at startup
    pub fn with_unit(mut self, unit: UnitConfig) -> Self {
        self.units.push(unit);
        self
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_millis(self.loop_interval_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}

/// External compilation bridge command.
///
/// `{unit}`, `{source}` and `{output}` in `args` are replaced before the
/// command runs; the command succeeds when it exits 0 and `{output}` exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory for produced artifacts (the source's directory when unset)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Artifact file extension (platform shared-library extension when unset)
    #[serde(default)]
    pub output_extension: Option<String>,
}

/// A unit to register at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    /// Explicit source location; resolved through the search paths when unset
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Ask the compilation bridge for an accelerated variant
    #[serde(default)]
    pub accelerate: bool,
    /// Worker to start once the unit is registered
    #[serde(default)]
    pub worker: Option<WorkerConfig>,
}

impl UnitConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            accelerate: false,
            worker: None,
        }
    }

    pub fn with_source<P: AsRef<Path>>(mut self, source: P) -> Self {
        self.source = Some(source.as_ref().to_path_buf());
        self
    }

    pub fn with_worker(mut self, worker: WorkerConfig) -> Self {
        self.worker = Some(worker);
        self
    }
}

/// Worker started for a configured unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub operation: String,
    #[serde(default)]
    pub mode: WorkerMode,
    #[serde(default)]
    pub args: Args,
}

impl From<WorkerConfig> for ThreadConfig {
    fn from(worker: WorkerConfig) -> Self {
        ThreadConfig::new(&worker.operation, worker.mode, worker.args)
    }
}
