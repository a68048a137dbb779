//! Module registry
//!
//! Holds the loaded code units and the declared dependency graph between them

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use hotswap_kernel::{HotswapError, HotswapResult, LoadOrigin, Namespace, UnitHandle};

/// A registered code unit
#[derive(Debug, Clone)]
pub struct CodeUnit {
    /// Unit name
    pub name: String,
    /// Source location; `None` when nothing resolved and the unit was
    /// restored from backup at registration
    pub source: Option<PathBuf>,
    /// Current loaded version
    pub handle: Arc<UnitHandle>,
    /// Declared dependencies, excluding the unit itself
    pub dependencies: BTreeSet<String>,
    /// First registration time
    pub registered_at: DateTime<Local>,
    /// Number of successful reloads
    pub reload_count: u32,
    /// Whether loads from `source` are backed up
    pub backup_enabled: bool,
    /// Whether registration asked for the compilation bridge
    pub accelerate: bool,
}

impl CodeUnit {
    /// Create a new code unit around its first handle
    pub fn new(name: &str, source: Option<PathBuf>, handle: Arc<UnitHandle>) -> Self {
        let dependencies = scan_dependencies(name, handle.namespace());
        Self {
            name: name.to_string(),
            backup_enabled: source.is_some(),
            source,
            handle,
            dependencies,
            registered_at: Local::now(),
            reload_count: 0,
            accelerate: false,
        }
    }

    /// Set whether loads from `source` are backed up
    pub fn with_backup(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    /// Set acceleration
    pub fn with_accelerate(mut self, accelerate: bool) -> Self {
        self.accelerate = accelerate;
        self
    }

    /// Content hash of the current version
    pub fn hash(&self) -> &str {
        self.handle.hash()
    }
}

/// Point-in-time view of a code unit
#[derive(Debug, Clone, Serialize)]
pub struct CodeUnitInfo {
    pub name: String,
    pub source: Option<PathBuf>,
    pub location: PathBuf,
    pub hash: String,
    pub origin: LoadOrigin,
    pub instance_id: String,
    pub dependencies: Vec<String>,
    pub operations: Vec<String>,
    pub registered_at: DateTime<Local>,
    pub reload_count: u32,
}

impl From<&CodeUnit> for CodeUnitInfo {
    fn from(unit: &CodeUnit) -> Self {
        Self {
            name: unit.name.clone(),
            source: unit.source.clone(),
            location: unit.handle.location().to_path_buf(),
            hash: unit.handle.hash().to_string(),
            origin: unit.handle.origin(),
            instance_id: unit.handle.instance_id().to_string(),
            dependencies: unit.dependencies.iter().cloned().collect(),
            operations: unit.handle.namespace().operations(),
            registered_at: unit.registered_at,
            reload_count: unit.reload_count,
        }
    }
}

/// Declared dependencies of a namespace, excluding `unit` itself.
///
/// The result reflects what the unit claims, not a verified import graph.
pub fn scan_dependencies(unit: &str, namespace: &dyn Namespace) -> BTreeSet<String> {
    namespace
        .declared_dependencies()
        .into_iter()
        .filter(|dep| dep != unit)
        .collect()
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    units: HashMap<String, CodeUnit>,
}

/// Registry of loaded code units
#[derive(Default)]
pub struct ModuleRegistry {
    inner: RwLock<Inner>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a newly registered unit. An existing entry of the same name is
    /// overwritten but keeps its position.
    pub fn insert(&self, unit: CodeUnit) {
        info!(
            "Registering unit: {} ({} from {:?})",
            unit.name,
            unit.handle.origin(),
            unit.handle.location()
        );
        let mut inner = self.inner.write();
        if !inner.units.contains_key(&unit.name) {
            inner.order.push(unit.name.clone());
        }
        inner.units.insert(unit.name.clone(), unit);
    }

    /// Swap in a new handle for a registered unit and recompute its
    /// dependencies. Returns the previous handle.
    pub fn replace(&self, name: &str, handle: Arc<UnitHandle>) -> HotswapResult<Arc<UnitHandle>> {
        let dependencies = scan_dependencies(name, handle.namespace());
        let mut inner = self.inner.write();
        let unit = inner
            .units
            .get_mut(name)
            .ok_or_else(|| HotswapError::not_registered(name))?;

        debug!(
            "Replacing unit {}: {} -> {}",
            name,
            unit.handle.instance_id(),
            handle.instance_id()
        );
        unit.dependencies = dependencies;
        unit.reload_count += 1;
        Ok(std::mem::replace(&mut unit.handle, handle))
    }

    /// Change the registered source location
    pub fn set_source(&self, name: &str, source: PathBuf) -> HotswapResult<()> {
        let mut inner = self.inner.write();
        let unit = inner
            .units
            .get_mut(name)
            .ok_or_else(|| HotswapError::not_registered(name))?;
        unit.source = Some(source);
        unit.backup_enabled = true;
        Ok(())
    }

    /// Turn acceleration on for later reloads
    pub fn set_accelerate(&self, name: &str) -> HotswapResult<()> {
        let mut inner = self.inner.write();
        let unit = inner
            .units
            .get_mut(name)
            .ok_or_else(|| HotswapError::not_registered(name))?;
        unit.accelerate = true;
        Ok(())
    }

    /// Put back the source, backup and acceleration settings of `previous`
    pub fn restore_settings(&self, previous: &CodeUnit) -> HotswapResult<()> {
        let mut inner = self.inner.write();
        let unit = inner
            .units
            .get_mut(&previous.name)
            .ok_or_else(|| HotswapError::not_registered(&previous.name))?;
        unit.source = previous.source.clone();
        unit.backup_enabled = previous.backup_enabled;
        unit.accelerate = previous.accelerate;
        Ok(())
    }

    /// Current handle of a unit
    pub fn get(&self, name: &str) -> Option<Arc<UnitHandle>> {
        self.inner.read().units.get(name).map(|u| u.handle.clone())
    }

    /// Full unit record
    pub fn unit(&self, name: &str) -> Option<CodeUnit> {
        self.inner.read().units.get(name).cloned()
    }

    /// Snapshot of a unit
    pub fn info(&self, name: &str) -> Option<CodeUnitInfo> {
        self.inner.read().units.get(name).map(CodeUnitInfo::from)
    }

    /// Whether a unit is registered
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().units.contains_key(name)
    }

    /// Registered names in insertion order
    pub fn names(&self) -> Vec<String> {
        self.inner.read().order.clone()
    }

    /// Number of registered units
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Units `name` depends on
    pub fn dependencies(&self, name: &str) -> Option<BTreeSet<String>> {
        self.inner
            .read()
            .units
            .get(name)
            .map(|u| u.dependencies.clone())
    }

    /// Units that depend on `name`, in insertion order
    pub fn dependents(&self, name: &str) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|candidate| {
                inner
                    .units
                    .get(candidate.as_str())
                    .is_some_and(|u| u.dependencies.contains(name))
            })
            .cloned()
            .collect()
    }
}
