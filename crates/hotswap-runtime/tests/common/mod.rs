//! Shared fixture for runtime integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use rhai::Engine;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use hotswap_runtime::{CompilationBridge, Hotswap, HotswapConfig, ScriptLoader, UnitLoaders};

/// Observations recorded by host functions registered on the test engine
#[derive(Default)]
pub struct Probe {
    loads: Mutex<HashMap<String, usize>>,
    last: Mutex<HashMap<String, i64>>,
}

impl Probe {
    /// Times the top level of `unit` has run
    pub fn loads(&self, unit: &str) -> usize {
        self.loads.lock().get(unit).copied().unwrap_or(0)
    }

    /// Last value recorded under `key`
    pub fn last(&self, key: &str) -> Option<i64> {
        self.last.lock().get(key).copied()
    }
}

/// Engine with test host functions:
/// - `loaded(name)` counts top-level runs
/// - `record(key, v)` stores the last value per key
/// - `stall(ms)` sleeps
pub fn engine(probe: &Arc<Probe>) -> Engine {
    let mut engine = Engine::new();

    let p = probe.clone();
    engine.register_fn("loaded", move |name: &str| {
        *p.loads.lock().entry(name.to_string()).or_insert(0) += 1;
    });

    let p = probe.clone();
    engine.register_fn("record", move |key: &str, value: i64| {
        p.last.lock().insert(key.to_string(), value);
    });

    engine.register_fn("stall", |ms: i64| {
        thread::sleep(Duration::from_millis(ms.max(0) as u64));
    });

    engine
}

pub struct Fixture {
    pub hotswap: Hotswap,
    pub probe: Arc<Probe>,
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(configure: impl FnOnce(HotswapConfig) -> HotswapConfig) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("hotswap_runtime=debug")
            .with_test_writer()
            .try_init();

        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("units")).unwrap();

        let config = HotswapConfig::new()
            .with_backup_dir(dir.path().join("backups"))
            .with_search_path(dir.path().join("units"))
            .with_loop_interval(Duration::from_millis(5));
        let config = configure(config);

        let probe = Arc::new(Probe::default());
        let loaders = UnitLoaders::empty()
            .with_loader(Arc::new(ScriptLoader::with_engine(engine(&probe))));
        let hotswap = Hotswap::init(config).unwrap().with_loaders(loaders);

        Self {
            hotswap,
            probe,
            dir,
        }
    }

    pub fn with_bridge(self, bridge: Arc<dyn CompilationBridge>) -> Self {
        Self {
            hotswap: self.hotswap.with_bridge(bridge),
            ..self
        }
    }

    pub fn units_dir(&self) -> PathBuf {
        self.dir.path().join("units")
    }

    /// Write `units/<file>` and return its path
    pub fn write(&self, file: &str, source: &str) -> PathBuf {
        let path = self.units_dir().join(file);
        fs::write(&path, source).unwrap();
        path
    }

    /// Write `units/<name>.rhai` and return its path
    pub fn write_unit(&self, name: &str, source: &str) -> PathBuf {
        self.write(&format!("{}.rhai", name), source)
    }

    pub fn backup_count(&self, unit: &str) -> usize {
        self.hotswap.backups().records(unit).unwrap().len()
    }
}

/// Source of a unit that reports its loads and declares dependencies
pub fn unit_source(name: &str, deps: &[&str], body: &str) -> String {
    let deps: Vec<String> = deps.iter().map(|d| format!("\"{}\"", d)).collect();
    format!(
        "const DEPENDENCIES = [{}];\nloaded(\"{}\");\n{}\n",
        deps.join(", "),
        name,
        body
    )
}

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
