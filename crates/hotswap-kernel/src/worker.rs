//! Managed worker configuration

use serde::{Deserialize, Serialize};

use crate::unit::Args;

/// How a managed worker runs its operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// Invoke repeatedly, pausing one loop interval between calls, until stopped
    #[default]
    Continuous,
    /// Invoke exactly once
    OneShot,
}

/// Snapshot of what a worker was started with, kept so a reload can
/// restart an equivalent worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadConfig {
    /// Operation name
    pub operation: String,
    /// Arguments passed on every invocation
    #[serde(default)]
    pub args: Args,
    /// Execution mode
    #[serde(default)]
    pub mode: WorkerMode,
}

impl ThreadConfig {
    /// Create a new thread configuration
    pub fn new(operation: &str, mode: WorkerMode, args: Args) -> Self {
        Self {
            operation: operation.to_string(),
            args,
            mode,
        }
    }
}
