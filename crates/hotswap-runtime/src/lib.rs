//! Live replacement of code units
//!
//! Provides:
//! - loading Rhai scripts and native shared libraries into isolated namespaces
//! - a registry of loaded units with a declared dependency graph
//! - a hash-deduplicated backup store used as fallback when a source breaks
//! - reloads that cascade to dependents and restart their managed workers
//! - an optional compilation bridge for accelerated builds

pub mod backup;
pub mod bridge;
pub mod engine;
pub mod invoke;
pub mod loader;
pub mod registry;
pub mod supervisor;

pub use backup::{BackupRecord, BackupStore, content_hash};
pub use bridge::{CommandBridge, CompilationBridge};
pub use engine::{Hotswap, RegisterOptions, ReloadFailure, ReloadReport};
pub use loader::{LoadError, NativeLoader, ScriptLoader, UnitLoader, UnitLoaders};
pub use registry::{CodeUnit, CodeUnitInfo, ModuleRegistry};
pub use supervisor::ThreadSupervisor;

pub use hotswap_kernel::{
    Args, ErrorKind, HotswapConfig, HotswapError, HotswapResult, LoadOrigin, Namespace,
    ReloadEvent, SymbolKind, ThreadConfig, UnitHandle, Value, WorkerMode,
};
