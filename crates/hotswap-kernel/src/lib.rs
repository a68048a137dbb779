//! Hotswap kernel
//!
//! Shared vocabulary for live code-unit replacement:
//! - [`Namespace`]: the executable namespace produced by loading a code unit
//! - [`UnitHandle`]: a versioned, reference-counted handle to one loaded namespace
//! - [`ThreadConfig`] / [`WorkerMode`]: what a managed worker runs
//! - [`HotswapError`]: the typed failure taxonomy every operation reports
//! - [`ReloadEvent`]: lifecycle notifications emitted during register/reload
//! - [`config`]: runtime configuration and its multi-format loader

// error module
pub mod error;
pub use error::{ErrorKind, HotswapError, HotswapResult};

// unit module
pub mod unit;
pub use unit::{Args, LoadOrigin, Namespace, SymbolKind, UnitHandle, Value};

// worker module
pub mod worker;
pub use worker::{ThreadConfig, WorkerMode};

// event module
pub mod event;
pub use event::ReloadEvent;

// config module
pub mod config;
pub use self::config::{BridgeConfig, HotswapConfig, UnitConfig, WorkerConfig};
