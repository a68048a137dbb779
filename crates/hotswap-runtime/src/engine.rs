//! Reload engine
//!
//! [`Hotswap`] owns every mutable table of the sub-system: the module
//! registry, the backup store and the thread supervisor. Registration and
//! reloads are serialised by one engine lock; reads (`get`, `invoke`) only
//! take the registry's read lock.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use hotswap_kernel::{
    Args, HotswapConfig, HotswapError, HotswapResult, LoadOrigin, ReloadEvent, ThreadConfig,
    UnitHandle, Value, WorkerMode,
};

use crate::backup::BackupStore;
use crate::bridge::{CommandBridge, CompilationBridge, accelerate_bounded};
use crate::invoke::call_operation;
use crate::loader::{SourceImage, UnitLoaders, resolve_source};
use crate::registry::{CodeUnit, CodeUnitInfo, ModuleRegistry};
use crate::supervisor::ThreadSupervisor;

/// Options for [`Hotswap::register_with`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterOptions {
    /// Ask the compilation bridge for an accelerated version
    pub accelerate: bool,
}

/// A unit that failed during a reload
#[derive(Debug)]
pub struct ReloadFailure {
    pub unit: String,
    pub error: HotswapError,
}

/// Outcome of a reload and its cascade
#[derive(Debug, Default)]
pub struct ReloadReport {
    /// Units reloaded, in order
    pub reloaded: Vec<String>,
    /// Units whose worker was restarted
    pub restarted: Vec<String>,
    /// Units that failed, including cycle edges and worker restarts
    pub failures: Vec<ReloadFailure>,
    /// Wall time of the whole call
    pub duration: Duration,
}

impl ReloadReport {
    /// Whether nothing failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// How many times `unit` was reloaded
    pub fn reload_count(&self, unit: &str) -> usize {
        self.reloaded.iter().filter(|u| *u == unit).count()
    }

    /// Append another report
    pub fn merge(&mut self, other: ReloadReport) {
        self.reloaded.extend(other.reloaded);
        self.restarted.extend(other.restarted);
        self.failures.extend(other.failures);
        self.duration += other.duration;
    }
}

struct Loaded {
    handle: Arc<UnitHandle>,
    image: SourceImage,
}

impl Loaded {
    fn from_source(&self) -> bool {
        self.handle.origin() != LoadOrigin::Backup
    }
}

/// Live code replacement state
pub struct Hotswap {
    config: HotswapConfig,
    loaders: UnitLoaders,
    backups: BackupStore,
    registry: ModuleRegistry,
    supervisor: ThreadSupervisor,
    bridge: Option<Arc<dyn CompilationBridge>>,
    reload_lock: Mutex<()>,
    subscribers: Mutex<Vec<Sender<ReloadEvent>>>,
}

impl Hotswap {
    /// Open the backup store and build an empty registry and supervisor
    pub fn init(config: HotswapConfig) -> HotswapResult<Self> {
        let backups = BackupStore::open(&config.backup_dir)?;
        let bridge = config.bridge.as_ref().map(|b| {
            Arc::new(CommandBridge::from_config(b, config.bridge_timeout()))
                as Arc<dyn CompilationBridge>
        });

        info!(
            "Hotswap initialised (backups in {:?}, {} search paths)",
            config.backup_dir,
            config.search_paths.len()
        );

        Ok(Self {
            loaders: UnitLoaders::new(),
            backups,
            registry: ModuleRegistry::new(),
            supervisor: ThreadSupervisor::from_config(&config),
            bridge,
            reload_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Replace the loader set
    pub fn with_loaders(mut self, loaders: UnitLoaders) -> Self {
        self.loaders = loaders;
        self
    }

    /// Replace the compilation bridge
    pub fn with_bridge(mut self, bridge: Arc<dyn CompilationBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn config(&self) -> &HotswapConfig {
        &self.config
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn supervisor(&self) -> &ThreadSupervisor {
        &self.supervisor
    }

    /// Receive reload events from now on
    pub fn subscribe(&self) -> Receiver<ReloadEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: ReloadEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ------------------------------------------------------------------
    // Registration

    /// Register a unit. See [`Hotswap::register_with`].
    pub fn register(&self, name: &str, source: Option<&Path>) -> HotswapResult<Arc<UnitHandle>> {
        self.register_with(name, source, RegisterOptions::default())
    }

    /// Register a unit from `source`, or from the search paths when `None`.
    ///
    /// A failed load falls back to the unit's latest backup. Loads from an
    /// explicit `source` are backed up. Registering a name that is already
    /// registered forces a full reload, replacing the stored source when a
    /// new one is given and turning acceleration on when asked. If that
    /// reload fails the previous settings are kept.
    pub fn register_with(
        &self,
        name: &str,
        source: Option<&Path>,
        options: RegisterOptions,
    ) -> HotswapResult<Arc<UnitHandle>> {
        let _guard = self.reload_lock.lock();

        if let Some(previous) = self.registry.unit(name) {
            info!("Unit {} already registered; forcing reload", name);
            if let Some(path) = source {
                self.registry.set_source(name, path.to_path_buf())?;
            }
            if options.accelerate {
                self.registry.set_accelerate(name)?;
            }
            if let Err(e) = self.reload_locked(name) {
                debug!("Re-registration of {} failed; restoring previous settings", name);
                self.registry.restore_settings(&previous)?;
                return Err(e);
            }
            return self
                .registry
                .get(name)
                .ok_or_else(|| HotswapError::not_registered(name));
        }

        let explicit = source.is_some();
        let resolved = match source {
            Some(path) => Some(path.to_path_buf()),
            None => resolve_source(&self.config.search_paths, name),
        };

        let mut loaded = self.load_with_fallback(name, resolved.as_deref())?;
        if options.accelerate {
            loaded = self.accelerate(name, loaded);
        }
        if explicit && loaded.from_source() {
            self.save_backup(name, &loaded.image);
        }

        let handle = loaded.handle;
        self.registry.insert(
            CodeUnit::new(name, resolved, handle.clone())
                .with_backup(explicit)
                .with_accelerate(options.accelerate),
        );
        self.emit(ReloadEvent::Registered {
            unit: name.to_string(),
            origin: handle.origin(),
            hash: handle.hash().to_string(),
        });

        Ok(handle)
    }

    /// Register every unit listed in the configuration and start their
    /// workers. Failures are collected, not fatal.
    pub fn register_configured(&self) -> Vec<ReloadFailure> {
        let mut failures = Vec::new();

        for unit in &self.config.units {
            let options = RegisterOptions {
                accelerate: unit.accelerate,
            };
            if let Err(error) = self.register_with(&unit.name, unit.source.as_deref(), options) {
                warn!("Cannot register configured unit {}: {}", unit.name, error);
                failures.push(ReloadFailure {
                    unit: unit.name.clone(),
                    error,
                });
                continue;
            }

            if let Some(worker) = &unit.worker {
                let config: ThreadConfig = worker.clone().into();
                if let Err(error) = self.start_worker_with(&unit.name, config) {
                    warn!("Cannot start worker for {}: {}", unit.name, error);
                    failures.push(ReloadFailure {
                        unit: unit.name.clone(),
                        error,
                    });
                }
            }
        }

        failures
    }

    fn load_with_fallback(&self, name: &str, source: Option<&Path>) -> HotswapResult<Loaded> {
        let primary = match source {
            Some(path) => match self.loaders.load_path(name, path) {
                Ok((image, namespace)) => {
                    let handle = UnitHandle::new(
                        name,
                        namespace,
                        &image.hash,
                        LoadOrigin::Source,
                        &image.path,
                    );
                    return Ok(Loaded {
                        handle: Arc::new(handle),
                        image,
                    });
                }
                Err(e) => HotswapError::SourceLoadFailure {
                    unit: name.to_string(),
                    reason: e.to_string(),
                },
            },
            None => HotswapError::SourceLoadFailure {
                unit: name.to_string(),
                reason: "no source location found".to_string(),
            },
        };

        warn!("{}; trying backup", primary);
        self.emit(ReloadEvent::FallbackToBackup {
            unit: name.to_string(),
            reason: primary.to_string(),
        });

        match self.backups.load_latest(name, &self.loaders) {
            Some(restored) => {
                info!("Loaded {} from backup {:?}", name, restored.record.path);
                let handle = UnitHandle::new(
                    name,
                    restored.namespace,
                    &restored.image.hash,
                    LoadOrigin::Backup,
                    &restored.record.path,
                );
                Ok(Loaded {
                    handle: Arc::new(handle),
                    image: restored.image,
                })
            }
            None => Err(HotswapError::BackupUnavailable {
                unit: name.to_string(),
                cause: Box::new(primary),
            }),
        }
    }

    fn accelerate(&self, name: &str, loaded: Loaded) -> Loaded {
        let Some(bridge) = &self.bridge else {
            debug!("No compilation bridge configured; {} stays interpreted", name);
            return loaded;
        };
        if !loaded.from_source() {
            return loaded;
        }

        let Some(artifact) = accelerate_bounded(
            bridge.clone(),
            name,
            &loaded.image.path,
            self.config.bridge_timeout(),
        ) else {
            debug!("Keeping interpreted version of {}", name);
            return loaded;
        };

        match self.loaders.load_path(name, &artifact) {
            Ok((_, namespace)) => {
                info!("Using accelerated version of {} from {:?}", name, artifact);
                self.emit(ReloadEvent::Accelerated {
                    unit: name.to_string(),
                    artifact: artifact.clone(),
                });
                let handle = UnitHandle::new(
                    name,
                    namespace,
                    &loaded.image.hash,
                    LoadOrigin::Accelerated,
                    &artifact,
                );
                Loaded {
                    handle: Arc::new(handle),
                    image: loaded.image,
                }
            }
            Err(e) => {
                debug!("Failed to load accelerated {} from {:?}: {}", name, artifact, e);
                loaded
            }
        }
    }

    fn save_backup(&self, name: &str, image: &SourceImage) {
        if let Err(e) = self.backups.save(name, &image.bytes, image.extension()) {
            warn!("Failed to back up {}: {}", name, e);
        }
    }

    // ------------------------------------------------------------------
    // Reload

    /// Reload a unit from its source and cascade to its dependents.
    ///
    /// A failure of `name` itself is returned as `Err`; failures further down
    /// the cascade are collected in the report.
    pub fn reload(&self, name: &str) -> HotswapResult<ReloadReport> {
        let _guard = self.reload_lock.lock();
        self.reload_locked(name)
    }

    /// Reload every registered unit in registration order. Each reload
    /// cascades on its own, so a shared dependent may be reloaded more than
    /// once.
    pub fn reload_all(&self) -> ReloadReport {
        let _guard = self.reload_lock.lock();
        let mut report = ReloadReport::default();

        for name in self.registry.names() {
            match self.reload_locked(&name) {
                Ok(r) => report.merge(r),
                Err(error) => report.failures.push(ReloadFailure { unit: name, error }),
            }
        }

        report
    }

    fn reload_locked(&self, name: &str) -> HotswapResult<ReloadReport> {
        if !self.registry.contains(name) {
            return Err(HotswapError::not_registered(name));
        }

        let started = Instant::now();
        let mut report = ReloadReport::default();
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        self.cascade(name, &mut visited, &mut path, &mut report)?;

        report.duration = started.elapsed();
        Ok(report)
    }

    fn cascade(
        &self,
        name: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
        report: &mut ReloadReport,
    ) -> HotswapResult<()> {
        visited.insert(name.to_string());
        let worker = self.reload_one(name, report)?;

        path.push(name.to_string());
        for dependent in self.registry.dependents(name) {
            if path.contains(&dependent) {
                let mut cycle = path.clone();
                cycle.push(dependent.clone());
                warn!("Dependency cycle detected: {}", cycle.join(" -> "));
                self.emit(ReloadEvent::CycleDetected {
                    path: cycle.clone(),
                });
                report.failures.push(ReloadFailure {
                    unit: dependent.clone(),
                    error: HotswapError::DependencyCycleDetected {
                        unit: dependent,
                        path: cycle,
                    },
                });
                continue;
            }
            if visited.contains(&dependent) {
                debug!("{} already reloaded in this cascade", dependent);
                continue;
            }
            if let Err(error) = self.cascade(&dependent, visited, path, report) {
                report.failures.push(ReloadFailure {
                    unit: dependent,
                    error,
                });
            }
        }
        path.pop();

        if let Some(config) = worker {
            if let Some(handle) = self.registry.get(name) {
                self.restart_worker(name, handle, config, report);
            }
        }
        Ok(())
    }

    /// Swap one unit, leaving its worker stopped. Returns the worker config
    /// to restart once the cascade below it is done.
    fn reload_one(
        &self,
        name: &str,
        report: &mut ReloadReport,
    ) -> HotswapResult<Option<ThreadConfig>> {
        let unit = self
            .registry
            .unit(name)
            .ok_or_else(|| HotswapError::not_registered(name))?;
        let source = unit
            .source
            .clone()
            .or_else(|| resolve_source(&self.config.search_paths, name));

        info!("Reloading unit: {}", name);
        self.emit(ReloadEvent::ReloadStarted {
            unit: name.to_string(),
            path: source.clone(),
        });
        let started = Instant::now();

        let worker = if self.supervisor.is_running(name) {
            self.supervisor.config(name)
        } else {
            self.supervisor.reap(name);
            None
        };
        if worker.is_some() {
            if let Err(e) = self.supervisor.stop(name) {
                warn!("Continuing reload of {}: {}", name, e);
            }
        }

        let mut loaded = match self.load_with_fallback(name, source.as_deref()) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Reload of {} failed, keeping previous version: {}", name, e);
                self.emit(ReloadEvent::ReloadFailed {
                    unit: name.to_string(),
                    error: e.to_string(),
                });
                if let Some(config) = worker {
                    self.restart_worker(name, unit.handle.clone(), config, report);
                }
                return Err(e);
            }
        };

        if unit.accelerate {
            loaded = self.accelerate(name, loaded);
        }
        if unit.backup_enabled && loaded.from_source() {
            self.save_backup(name, &loaded.image);
        }

        let origin = loaded.handle.origin();
        self.registry.replace(name, loaded.handle)?;
        report.reloaded.push(name.to_string());

        let duration = started.elapsed();
        info!("Unit {} reloaded from {} in {:?}", name, origin, duration);
        self.emit(ReloadEvent::ReloadCompleted {
            unit: name.to_string(),
            origin,
            duration,
        });

        Ok(worker)
    }

    fn restart_worker(
        &self,
        name: &str,
        handle: Arc<UnitHandle>,
        config: ThreadConfig,
        report: &mut ReloadReport,
    ) {
        let operation = config.operation.clone();
        match self.supervisor.start(name, handle, config) {
            Ok(()) => {
                report.restarted.push(name.to_string());
                self.emit(ReloadEvent::WorkerRestarted {
                    unit: name.to_string(),
                    operation,
                });
            }
            Err(error) => {
                warn!("Failed to restart worker for {}: {}", name, error);
                report.failures.push(ReloadFailure {
                    unit: name.to_string(),
                    error,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Access and invocation

    /// Current handle of a unit
    pub fn get(&self, name: &str) -> Option<Arc<UnitHandle>> {
        self.registry.get(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Snapshot of a registered unit
    pub fn unit_info(&self, name: &str) -> Option<CodeUnitInfo> {
        self.registry.info(name)
    }

    /// Call an operation of a unit.
    ///
    /// An unregistered name is resolved against the search paths and
    /// registered first; if nothing resolves the call fails with
    /// `NotRegistered`.
    pub fn invoke(&self, name: &str, operation: &str, args: &Args) -> HotswapResult<Value> {
        let handle = match self.registry.get(name) {
            Some(handle) => handle,
            None => self.register_on_demand(name)?,
        };
        call_operation(&handle, operation, args)
    }

    fn register_on_demand(&self, name: &str) -> HotswapResult<Arc<UnitHandle>> {
        let Some(source) = resolve_source(&self.config.search_paths, name) else {
            return Err(HotswapError::not_registered(name));
        };
        debug!("Registering {} on demand from {:?}", name, source);
        self.register(name, None).map_err(|e| {
            debug!("On-demand registration of {} failed: {}", name, e);
            HotswapError::not_registered(name)
        })
    }

    /// Read an exported value of a unit
    pub fn value(&self, name: &str, symbol: &str) -> HotswapResult<Value> {
        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| HotswapError::not_registered(name))?;
        handle
            .namespace()
            .value(symbol)
            .ok_or_else(|| HotswapError::OperationNotFound {
                unit: name.to_string(),
                operation: symbol.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Workers

    /// Start a managed worker running `operation` of a registered unit
    pub fn start_worker(
        &self,
        name: &str,
        operation: &str,
        mode: WorkerMode,
        args: Args,
    ) -> HotswapResult<()> {
        self.start_worker_with(name, ThreadConfig::new(operation, mode, args))
    }

    fn start_worker_with(&self, name: &str, config: ThreadConfig) -> HotswapResult<()> {
        let _guard = self.reload_lock.lock();
        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| HotswapError::not_registered(name))?;
        self.supervisor.start(name, handle, config)
    }

    /// Stop the managed worker of a unit
    pub fn stop_worker(&self, name: &str) -> HotswapResult<()> {
        let _guard = self.reload_lock.lock();
        self.supervisor.stop(name)
    }

    /// Whether the unit's worker is running
    pub fn is_running(&self, name: &str) -> bool {
        self.supervisor.is_running(name)
    }

    /// Configuration of the unit's worker
    pub fn worker_config(&self, name: &str) -> Option<ThreadConfig> {
        self.supervisor.config(name)
    }

    /// Latest backup location of a unit
    pub fn latest_backup(&self, name: &str) -> HotswapResult<Option<PathBuf>> {
        Ok(self.backups.latest(name)?.map(|r| r.path))
    }

    /// Stop every worker
    pub fn shutdown(&self) {
        let workers = self.supervisor.workers();
        if !workers.is_empty() {
            info!("Shutting down {} workers", workers.len());
        }
        self.supervisor.shutdown();
    }
}

impl Drop for Hotswap {
    fn drop(&mut self) {
        self.shutdown();
    }
}
