//! Managed worker behaviour across reloads

mod common;

use serde_json::json;
use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use common::{Fixture, unit_source, wait_until};
use hotswap_runtime::{Args, ErrorKind, ReloadEvent, ThreadConfig, WorkerMode};

const TICK_V1: &str = r#"fn tick(args) { record("calc", 1 * args.n); }"#;
const TICK_V2: &str = r#"fn tick(args) { record("calc", 2 * args.n); }"#;

#[test]
fn test_reload_restarts_worker_with_same_config() {
    let fx = Fixture::new();
    let path = fx.write_unit("calc", TICK_V1);
    fx.hotswap.register("calc", Some(path.as_path())).unwrap();

    let args = Args::new().with_kwarg("n", 1);
    fx.hotswap
        .start_worker("calc", "tick", WorkerMode::Continuous, args.clone())
        .unwrap();
    assert!(fx.hotswap.is_running("calc"));
    assert!(wait_until(|| fx.probe.last("calc") == Some(1)));

    let events = fx.hotswap.subscribe();
    fs::write(&path, TICK_V2).unwrap();
    let report = fx.hotswap.reload("calc").unwrap();

    assert_eq!(report.restarted, vec!["calc".to_string()]);
    assert!(fx.hotswap.is_running("calc"));
    assert_eq!(
        fx.hotswap.worker_config("calc"),
        Some(ThreadConfig::new("tick", WorkerMode::Continuous, args))
    );
    assert!(wait_until(|| fx.probe.last("calc") == Some(2)));
    assert!(
        events
            .try_iter()
            .any(|e| matches!(e, ReloadEvent::WorkerRestarted { ref unit, .. } if unit == "calc"))
    );

    fx.hotswap.stop_worker("calc").unwrap();
    assert!(!fx.hotswap.is_running("calc"));
}

#[test]
fn test_cascade_restarts_dependent_workers() {
    let fx = Fixture::new();
    let base = fx.write_unit("base", &unit_source("base", &[], "fn f() { 1 }"));
    let dep = fx.write_unit(
        "dep",
        &unit_source("dep", &["base"], r#"fn tick() { record("dep", 1); }"#),
    );
    fx.hotswap.register("base", Some(base.as_path())).unwrap();
    fx.hotswap.register("dep", Some(dep.as_path())).unwrap();
    fx.hotswap
        .start_worker("dep", "tick", WorkerMode::Continuous, Args::new())
        .unwrap();

    let report = fx.hotswap.reload("base").unwrap();
    assert_eq!(report.reloaded, vec!["base", "dep"]);
    assert_eq!(report.restarted, vec!["dep"]);
    assert!(fx.hotswap.is_running("dep"));
}

#[test]
fn test_failed_reload_restarts_worker_on_old_handle() {
    let fx = Fixture::new();
    // search-path registration, so there is no backup to fall back on
    let path = fx.write_unit("calc", TICK_V1);
    fx.hotswap.register("calc", None).unwrap();
    let before = fx.hotswap.get("calc").unwrap();
    fx.hotswap
        .start_worker("calc", "tick", WorkerMode::Continuous, Args::new().with_kwarg("n", 3))
        .unwrap();

    fs::write(&path, "fn tick( {").unwrap();
    let err = fx.hotswap.reload("calc").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackupUnavailable);

    assert_eq!(
        fx.hotswap.get("calc").unwrap().instance_id(),
        before.instance_id()
    );
    assert!(fx.hotswap.is_running("calc"));
    assert!(wait_until(|| fx.probe.last("calc") == Some(3)));
}

#[test]
fn test_one_shot_worker_runs_once() {
    let fx = Fixture::new();
    let path = fx.write_unit("calc", TICK_V1);
    fx.hotswap.register("calc", Some(path.as_path())).unwrap();

    fx.hotswap
        .start_worker("calc", "tick", WorkerMode::OneShot, Args::new().with_kwarg("n", 5))
        .unwrap();
    assert!(wait_until(|| !fx.hotswap.is_running("calc")));
    assert_eq!(fx.probe.last("calc"), Some(5));
}

#[test]
fn test_finished_one_shot_worker_is_not_rerun_by_reload() {
    let fx = Fixture::new();
    let path = fx.write_unit("calc", TICK_V1);
    fx.hotswap.register("calc", Some(path.as_path())).unwrap();

    fx.hotswap
        .start_worker("calc", "tick", WorkerMode::OneShot, Args::new().with_kwarg("n", 5))
        .unwrap();
    assert!(wait_until(|| !fx.hotswap.is_running("calc")));
    assert_eq!(fx.probe.last("calc"), Some(5));

    fs::write(&path, TICK_V2).unwrap();
    let report = fx.hotswap.reload("calc").unwrap();

    assert_eq!(report.reloaded, vec!["calc"]);
    assert!(report.restarted.is_empty());
    assert!(fx.hotswap.worker_config("calc").is_none());
    thread::sleep(Duration::from_millis(50));
    assert_eq!(fx.probe.last("calc"), Some(5));
}

#[test]
fn test_worker_start_errors() {
    let fx = Fixture::new();
    let path = fx.write_unit("calc", "const LIMIT = 3;\nfn tick() { }");
    fx.hotswap.register("calc", Some(path.as_path())).unwrap();

    let err = fx
        .hotswap
        .start_worker("ghost", "tick", WorkerMode::OneShot, Args::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotRegistered);

    let err = fx
        .hotswap
        .start_worker("calc", "missing", WorkerMode::OneShot, Args::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationNotFound);

    let err = fx
        .hotswap
        .start_worker("calc", "LIMIT", WorkerMode::OneShot, Args::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationNotCallable);

    let err = fx.hotswap.stop_worker("calc").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSuchWorker);
}

#[test]
fn test_double_start_is_rejected() {
    let fx = Fixture::new();
    let path = fx.write_unit("calc", TICK_V1);
    fx.hotswap.register("calc", Some(path.as_path())).unwrap();

    let args = Args::new().with_kwarg("n", 1);
    fx.hotswap
        .start_worker("calc", "tick", WorkerMode::Continuous, args.clone())
        .unwrap();
    let err = fx
        .hotswap
        .start_worker("calc", "tick", WorkerMode::Continuous, args)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkerAlreadyRunning);
}

#[test]
fn test_stop_is_bounded_for_stalled_operation() {
    let fx = Fixture::with_config(|c| c.with_stop_timeout(Duration::from_millis(100)));
    let path = fx.write_unit("slow", "fn work() { stall(1000); }");
    fx.hotswap.register("slow", Some(path.as_path())).unwrap();
    fx.hotswap
        .start_worker("slow", "work", WorkerMode::Continuous, Args::new())
        .unwrap();

    let started = Instant::now();
    let err = fx.hotswap.stop_worker("slow").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WorkerStopTimeout);
    assert!(started.elapsed() < Duration::from_millis(800));
    assert!(!fx.hotswap.is_running("slow"));
    assert!(fx.hotswap.worker_config("slow").is_none());
}

#[test]
fn test_reload_proceeds_past_stalled_worker() {
    let fx = Fixture::with_config(|c| c.with_stop_timeout(Duration::from_millis(100)));
    let path = fx.write_unit("slow", "fn work() { stall(1000); }");
    fx.hotswap.register("slow", Some(path.as_path())).unwrap();
    fx.hotswap
        .start_worker("slow", "work", WorkerMode::Continuous, Args::new())
        .unwrap();

    let started = Instant::now();
    let report = fx.hotswap.reload("slow").unwrap();
    assert!(started.elapsed() < Duration::from_millis(800));
    assert_eq!(report.reloaded, vec!["slow"]);
    assert_eq!(report.restarted, vec!["slow"]);
    assert!(fx.hotswap.is_running("slow"));
}

#[test]
fn test_configured_units_register_and_start() {
    use hotswap_kernel::{UnitConfig, WorkerConfig};

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("calc.rhai");
    fs::write(&source, TICK_V1).unwrap();

    let fx = Fixture::with_config(|c| {
        c.with_unit(UnitConfig::new("calc").with_source(&source).with_worker(WorkerConfig {
            operation: "tick".to_string(),
            mode: WorkerMode::Continuous,
            args: Args::new().with_kwarg("n", 4),
        }))
        .with_unit(UnitConfig::new("ghost"))
    });

    let failures = fx.hotswap.register_configured();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].unit, "ghost");

    assert_eq!(fx.hotswap.names(), vec!["calc".to_string()]);
    assert!(fx.hotswap.is_running("calc"));
    assert!(wait_until(|| fx.probe.last("calc") == Some(4)));
    assert_eq!(
        fx.hotswap.invoke("calc", "tick", &Args::new().with_kwarg("n", 9)).unwrap(),
        json!(null)
    );
}

#[test]
fn test_shutdown_stops_all_workers() {
    let fx = Fixture::new();
    for name in ["a", "b"] {
        let path = fx.write_unit(name, "fn tick() { }");
        fx.hotswap.register(name, Some(path.as_path())).unwrap();
        fx.hotswap
            .start_worker(name, "tick", WorkerMode::Continuous, Args::new())
            .unwrap();
    }
    assert_eq!(fx.hotswap.supervisor().workers(), vec!["a", "b"]);

    fx.hotswap.shutdown();
    assert!(fx.hotswap.supervisor().workers().is_empty());
    assert!(!fx.hotswap.is_running("a"));
}
