//! Typed errors for the hotswap sub-system.
//!
//! Every public operation reports failure through [`HotswapError`]. The
//! variant is the structured kind (see [`HotswapError::kind`]); the fields
//! name the unit and operation involved and the display string carries the
//! human-readable reason.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Result alias used across the hotswap crates.
pub type HotswapResult<T> = Result<T, HotswapError>;

/// Errors reported by registry, reload, backup and worker operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HotswapError {
    /// The named unit has no code unit in the registry.
    #[error("Unit not registered: {unit}")]
    NotRegistered { unit: String },

    /// Loading the unit from its source location failed.
    #[error("Failed to load unit {unit}: {reason}")]
    SourceLoadFailure { unit: String, reason: String },

    /// The source failed and no backup could stand in for it.
    #[error("No usable backup for unit {unit} after: {cause}")]
    BackupUnavailable {
        unit: String,
        #[source]
        cause: Box<HotswapError>,
    },

    /// A reload cascade reached a unit that is already on the cascade path.
    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycleDetected { unit: String, path: Vec<String> },

    /// The unit has no symbol with the requested name.
    #[error("Operation {operation} not found in unit {unit}")]
    OperationNotFound { unit: String, operation: String },

    /// The symbol exists but is an exported value, not an operation.
    #[error("Symbol {operation} in unit {unit} is not callable")]
    OperationNotCallable { unit: String, operation: String },

    /// The operation raised an error (or panicked) while running.
    #[error("Operation {operation} in unit {unit} failed: {reason}")]
    InvocationFailure {
        unit: String,
        operation: String,
        reason: String,
    },

    /// The worker did not signal readiness within the ready timeout.
    #[error("Worker for unit {unit} not ready after {timeout:?}")]
    WorkerStartTimeout { unit: String, timeout: Duration },

    /// The worker thread did not finish within the stop timeout and was detached.
    #[error("Worker for unit {unit} did not stop within {timeout:?}; thread detached")]
    WorkerStopTimeout { unit: String, timeout: Duration },

    /// No worker is tracked for the unit.
    #[error("No worker found for unit: {unit}")]
    NoSuchWorker { unit: String },

    /// A worker for the unit is already running.
    #[error("Worker for unit {unit} is already running")]
    WorkerAlreadyRunning { unit: String },

    /// The OS refused to spawn a worker thread.
    #[error("Failed to spawn worker for unit {unit}: {reason}")]
    WorkerSpawnFailed { unit: String, reason: String },

    /// A low-level I/O error (backup directory, source files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Fieldless discriminant of [`HotswapError`] for matching and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    NotRegistered,
    SourceLoadFailure,
    BackupUnavailable,
    DependencyCycleDetected,
    OperationNotFound,
    OperationNotCallable,
    InvocationFailure,
    WorkerStartTimeout,
    WorkerStopTimeout,
    NoSuchWorker,
    WorkerAlreadyRunning,
    WorkerSpawnFailed,
    Io,
    Config,
}

impl HotswapError {
    /// Structured kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HotswapError::NotRegistered { .. } => ErrorKind::NotRegistered,
            HotswapError::SourceLoadFailure { .. } => ErrorKind::SourceLoadFailure,
            HotswapError::BackupUnavailable { .. } => ErrorKind::BackupUnavailable,
            HotswapError::DependencyCycleDetected { .. } => ErrorKind::DependencyCycleDetected,
            HotswapError::OperationNotFound { .. } => ErrorKind::OperationNotFound,
            HotswapError::OperationNotCallable { .. } => ErrorKind::OperationNotCallable,
            HotswapError::InvocationFailure { .. } => ErrorKind::InvocationFailure,
            HotswapError::WorkerStartTimeout { .. } => ErrorKind::WorkerStartTimeout,
            HotswapError::WorkerStopTimeout { .. } => ErrorKind::WorkerStopTimeout,
            HotswapError::NoSuchWorker { .. } => ErrorKind::NoSuchWorker,
            HotswapError::WorkerAlreadyRunning { .. } => ErrorKind::WorkerAlreadyRunning,
            HotswapError::WorkerSpawnFailed { .. } => ErrorKind::WorkerSpawnFailed,
            HotswapError::Io(_) => ErrorKind::Io,
            HotswapError::Config(_) => ErrorKind::Config,
        }
    }

    /// The unit this error is about, when it names one.
    pub fn unit(&self) -> Option<&str> {
        match self {
            HotswapError::NotRegistered { unit }
            | HotswapError::SourceLoadFailure { unit, .. }
            | HotswapError::BackupUnavailable { unit, .. }
            | HotswapError::DependencyCycleDetected { unit, .. }
            | HotswapError::OperationNotFound { unit, .. }
            | HotswapError::OperationNotCallable { unit, .. }
            | HotswapError::InvocationFailure { unit, .. }
            | HotswapError::WorkerStartTimeout { unit, .. }
            | HotswapError::WorkerStopTimeout { unit, .. }
            | HotswapError::NoSuchWorker { unit }
            | HotswapError::WorkerAlreadyRunning { unit }
            | HotswapError::WorkerSpawnFailed { unit, .. } => Some(unit),
            HotswapError::Io(_) | HotswapError::Config(_) => None,
        }
    }

    /// Shorthand for [`HotswapError::NotRegistered`].
    pub fn not_registered(unit: &str) -> Self {
        HotswapError::NotRegistered {
            unit: unit.to_string(),
        }
    }
}
