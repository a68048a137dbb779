//! Code units and their executable namespaces
//!
//! A code unit is loaded into a [`Namespace`]: the set of callable operations
//! and exported values it provides. Each successful load yields a new
//! [`UnitHandle`]; handles are swapped wholesale on reload and the previous
//! version is released when its last reference is dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Values crossing the unit boundary.
pub use serde_json::Value;

/// Positional and keyword arguments for an operation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Args {
    /// Positional arguments
    #[serde(default)]
    pub positional: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub keyword: BTreeMap<String, Value>,
}

impl Args {
    /// Create empty arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from positional arguments only
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keyword: BTreeMap::new(),
        }
    }

    /// Append a positional argument
    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument
    pub fn with_kwarg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.keyword.insert(key.to_string(), value.into());
        self
    }

    /// Whether there are no arguments at all
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// What a symbol in a namespace resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// An invocable operation
    Operation,
    /// An exported value
    Value,
}

/// The executable namespace of one loaded code unit.
///
/// Implementations must be safe to call from worker threads concurrently.
pub trait Namespace: Send + Sync {
    /// Resolve a symbol name.
    fn lookup(&self, symbol: &str) -> Option<SymbolKind>;

    /// Names of all callable operations, sorted.
    fn operations(&self) -> Vec<String>;

    /// Read an exported value.
    fn value(&self, symbol: &str) -> Option<Value>;

    /// Invoke an operation. The error is the operation's own failure message.
    fn call(&self, operation: &str, args: &Args) -> Result<Value, String>;

    /// Units this namespace declares it depends on.
    ///
    /// The list is authored by the unit, not derived from a real import
    /// graph, and may be incomplete or over-state coupling.
    fn declared_dependencies(&self) -> Vec<String>;
}

/// Where a handle's namespace was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOrigin {
    /// The registered source location
    Source,
    /// The most recent backup record
    Backup,
    /// An artifact produced by the compilation bridge
    Accelerated,
}

impl fmt::Display for LoadOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadOrigin::Source => write!(f, "source"),
            LoadOrigin::Backup => write!(f, "backup"),
            LoadOrigin::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// A loaded version of a code unit
pub struct UnitHandle {
    unit: String,
    namespace: Arc<dyn Namespace>,
    hash: String,
    origin: LoadOrigin,
    location: PathBuf,
    instance_id: String,
    loaded_at: Instant,
}

impl UnitHandle {
    /// Create a handle for a freshly loaded namespace
    pub fn new(
        unit: &str,
        namespace: Arc<dyn Namespace>,
        hash: &str,
        origin: LoadOrigin,
        location: &Path,
    ) -> Self {
        Self {
            unit: unit.to_string(),
            namespace,
            hash: hash.to_string(),
            origin,
            location: location.to_path_buf(),
            instance_id: uuid::Uuid::now_v7().to_string(),
            loaded_at: Instant::now(),
        }
    }

    /// Unit name
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// The executable namespace
    pub fn namespace(&self) -> &dyn Namespace {
        self.namespace.as_ref()
    }

    /// Content hash of the source this handle was loaded from
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Load origin
    pub fn origin(&self) -> LoadOrigin {
        self.origin
    }

    /// File the namespace was actually loaded from
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Unique id of this load
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// When the namespace was loaded
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }
}

impl fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitHandle")
            .field("unit", &self.unit)
            .field("hash", &self.hash)
            .field("origin", &self.origin)
            .field("location", &self.location)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Empty;

    impl Namespace for Empty {
        fn lookup(&self, _symbol: &str) -> Option<SymbolKind> {
            None
        }
        fn operations(&self) -> Vec<String> {
            Vec::new()
        }
        fn value(&self, _symbol: &str) -> Option<Value> {
            None
        }
        fn call(&self, operation: &str, _args: &Args) -> Result<Value, String> {
            Err(format!("no operation {}", operation))
        }
        fn declared_dependencies(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_args_builder() {
        let args = Args::new().with_arg(1).with_kwarg("n", json!("x"));
        assert_eq!(args.positional, vec![json!(1)]);
        assert_eq!(args.keyword.get("n"), Some(&json!("x")));
        assert!(!args.is_empty());
        assert!(Args::new().is_empty());
    }

    #[test]
    fn test_args_deserialize_defaults() {
        let args: Args = serde_json::from_value(json!({"keyword": {"n": 1}})).unwrap();
        assert!(args.positional.is_empty());
        assert_eq!(args.keyword["n"], json!(1));
    }

    #[test]
    fn test_handles_get_distinct_instance_ids() {
        let ns: Arc<dyn Namespace> = Arc::new(Empty);
        let a = UnitHandle::new("calc", ns.clone(), "h1", LoadOrigin::Source, Path::new("calc.rhai"));
        let b = UnitHandle::new("calc", ns, "h1", LoadOrigin::Source, Path::new("calc.rhai"));
        assert_ne!(a.instance_id(), b.instance_id());
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.origin().to_string(), "source");
    }
}
