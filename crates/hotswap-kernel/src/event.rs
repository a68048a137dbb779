//! Reload lifecycle events

use std::path::PathBuf;
use std::time::Duration;

use crate::unit::LoadOrigin;

/// Notifications emitted while registering and reloading units
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadEvent {
    /// A unit was registered for the first time
    Registered {
        unit: String,
        origin: LoadOrigin,
        hash: String,
    },
    /// A reload of the unit began
    ReloadStarted { unit: String, path: Option<PathBuf> },
    /// The source failed and the latest backup is being used instead
    FallbackToBackup { unit: String, reason: String },
    /// The unit was reloaded
    ReloadCompleted {
        unit: String,
        origin: LoadOrigin,
        duration: Duration,
    },
    /// The reload failed and the previous version stays in place
    ReloadFailed { unit: String, error: String },
    /// The cascade reached a unit already on the cascade path
    CycleDetected { path: Vec<String> },
    /// The compilation bridge produced an accelerated handle
    Accelerated { unit: String, artifact: PathBuf },
    /// A worker stopped for the reload was started again
    WorkerRestarted { unit: String, operation: String },
}
