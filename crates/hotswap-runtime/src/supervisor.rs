//! Thread supervisor
//!
//! Runs at most one managed worker thread per unit. A worker repeatedly (or
//! once) invokes an operation of the unit's handle and is stopped
//! cooperatively: the stop signal is checked between invocations, so an
//! operation that never returns outlives its bookkeeping.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use hotswap_kernel::{
    HotswapConfig, HotswapError, HotswapResult, ThreadConfig, UnitHandle, WorkerMode,
};

use crate::invoke::{call_operation, resolve_operation};

struct ManagedWorker {
    config: ThreadConfig,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Starts, stops and tracks managed workers
pub struct ThreadSupervisor {
    workers: Mutex<HashMap<String, ManagedWorker>>,
    ready_timeout: Duration,
    stop_timeout: Duration,
    loop_interval: Duration,
}

impl ThreadSupervisor {
    /// Create a supervisor with explicit timeouts
    pub fn new(ready_timeout: Duration, stop_timeout: Duration, loop_interval: Duration) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            ready_timeout,
            stop_timeout,
            loop_interval,
        }
    }

    /// Create a supervisor with the timeouts of a configuration
    pub fn from_config(config: &HotswapConfig) -> Self {
        Self::new(
            config.ready_timeout(),
            config.stop_timeout(),
            config.loop_interval(),
        )
    }

    /// Start a worker running `config.operation` of `handle`.
    ///
    /// Blocks until the worker signals readiness or the ready timeout elapses.
    pub fn start(
        &self,
        unit: &str,
        handle: Arc<UnitHandle>,
        config: ThreadConfig,
    ) -> HotswapResult<()> {
        resolve_operation(&handle, &config.operation)?;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (ready_tx, ready_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));

        {
            let mut workers = self.workers.lock();
            if let Some(existing) = workers.get(unit) {
                if existing.running.load(Ordering::SeqCst) {
                    return Err(HotswapError::WorkerAlreadyRunning {
                        unit: unit.to_string(),
                    });
                }
            }
            if let Some(finished) = workers.remove(unit) {
                debug!("Replacing finished worker for {}", unit);
                if let Some(thread) = finished.thread {
                    let _ = thread.join();
                }
            }

            let worker_running = running.clone();
            let worker_config = config.clone();
            let interval = self.loop_interval;
            let thread = thread::Builder::new()
                .name(format!("hotswap-{}", unit))
                .spawn(move || {
                    run_worker(
                        handle,
                        worker_config,
                        interval,
                        ready_tx,
                        stop_rx,
                        done_tx,
                        worker_running,
                    )
                })
                .map_err(|e| HotswapError::WorkerSpawnFailed {
                    unit: unit.to_string(),
                    reason: e.to_string(),
                })?;

            workers.insert(
                unit.to_string(),
                ManagedWorker {
                    config: config.clone(),
                    stop_tx,
                    done_rx,
                    running: running.clone(),
                    thread: Some(thread),
                },
            );
        }

        match ready_rx.recv_timeout(self.ready_timeout) {
            Ok(()) => {
                info!(
                    "Started {:?} worker for {}.{}",
                    config.mode, unit, config.operation
                );
                Ok(())
            }
            Err(_) => {
                warn!("Worker for {} not ready after {:?}", unit, self.ready_timeout);
                let mut workers = self.workers.lock();
                let ours = workers
                    .get(unit)
                    .is_some_and(|w| Arc::ptr_eq(&w.running, &running));
                if ours {
                    if let Some(worker) = workers.remove(unit) {
                        let _ = worker.stop_tx.send(());
                    }
                }
                running.store(false, Ordering::SeqCst);
                Err(HotswapError::WorkerStartTimeout {
                    unit: unit.to_string(),
                    timeout: self.ready_timeout,
                })
            }
        }
    }

    /// Stop the worker for `unit`, waiting at most the stop timeout.
    ///
    /// On timeout the thread is detached and no longer tracked.
    pub fn stop(&self, unit: &str) -> HotswapResult<()> {
        let worker = self
            .workers
            .lock()
            .remove(unit)
            .ok_or_else(|| HotswapError::NoSuchWorker {
                unit: unit.to_string(),
            })?;

        let ManagedWorker {
            stop_tx,
            done_rx,
            running,
            thread,
            ..
        } = worker;

        let _ = stop_tx.send(());
        drop(stop_tx);

        match done_rx.recv_timeout(self.stop_timeout) {
            Err(RecvTimeoutError::Timeout) => {
                running.store(false, Ordering::SeqCst);
                warn!(
                    "Worker for {} did not stop within {:?}; detaching thread",
                    unit, self.stop_timeout
                );
                Err(HotswapError::WorkerStopTimeout {
                    unit: unit.to_string(),
                    timeout: self.stop_timeout,
                })
            }
            _ => {
                if let Some(thread) = thread {
                    if thread.join().is_err() {
                        warn!("Worker thread for {} panicked", unit);
                    }
                }
                info!("Stopped worker for {}", unit);
                Ok(())
            }
        }
    }

    /// Whether the worker for `unit` is running
    pub fn is_running(&self, unit: &str) -> bool {
        self.workers
            .lock()
            .get(unit)
            .is_some_and(|w| w.running.load(Ordering::SeqCst))
    }

    /// Drop the entry for `unit` if its loop has already ended. Returns
    /// whether an entry was removed.
    pub fn reap(&self, unit: &str) -> bool {
        let finished = {
            let mut workers = self.workers.lock();
            match workers.get(unit) {
                Some(w) if !w.running.load(Ordering::SeqCst) => workers.remove(unit),
                _ => None,
            }
        };
        let Some(worker) = finished else {
            return false;
        };
        if let Some(thread) = worker.thread {
            if thread.join().is_err() {
                warn!("Worker thread for {} panicked", unit);
            }
        }
        debug!("Reaped finished worker for {}", unit);
        true
    }

    /// Configuration the worker for `unit` was started with
    pub fn config(&self, unit: &str) -> Option<ThreadConfig> {
        self.workers.lock().get(unit).map(|w| w.config.clone())
    }

    /// Units with a tracked worker, sorted
    pub fn workers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every tracked worker
    pub fn shutdown(&self) {
        for unit in self.workers() {
            if let Err(e) = self.stop(&unit) {
                warn!("Shutdown: {}", e);
            }
        }
    }
}

fn run_worker(
    handle: Arc<UnitHandle>,
    config: ThreadConfig,
    interval: Duration,
    ready_tx: Sender<()>,
    stop_rx: Receiver<()>,
    done_tx: Sender<()>,
    running: Arc<AtomicBool>,
) {
    let _ = ready_tx.send(());
    let unit = handle.unit().to_string();

    loop {
        if let Err(e) = call_operation(&handle, &config.operation, &config.args) {
            error!("Worker for {} stopped: {}", unit, e);
            break;
        }
        if config.mode == WorkerMode::OneShot {
            break;
        }
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => break,
        }
    }

    debug!("Worker loop for {} finished", unit);
    running.store(false, Ordering::SeqCst);
    let _ = done_tx.send(());
}
