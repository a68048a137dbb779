//! Compilation bridge
//!
//! An optional external toolchain that turns a unit's source into an
//! accelerated native library. The runtime only ever waits for it up to a
//! bounded timeout and keeps the interpreted version on any failure.

use crossbeam_channel::bounded;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use hotswap_kernel::BridgeConfig;

/// Produces an accelerated artifact for a unit
pub trait CompilationBridge: Send + Sync {
    /// Build an accelerated library from `source`. Returns the library path
    /// on success.
    fn accelerate(&self, unit: &str, source: &Path) -> Option<PathBuf>;
}

/// Run a bridge on a helper thread, giving up after `timeout`.
///
/// Returns the artifact path only when the bridge succeeded in time and the
/// file exists. A bridge that overruns keeps running detached.
pub fn accelerate_bounded(
    bridge: Arc<dyn CompilationBridge>,
    unit: &str,
    source: &Path,
    timeout: Duration,
) -> Option<PathBuf> {
    let (tx, rx) = bounded(1);
    let unit_name = unit.to_string();
    let source_path = source.to_path_buf();

    let spawned = thread::Builder::new()
        .name(format!("hotswap-bridge-{}", unit))
        .spawn(move || {
            let _ = tx.send(bridge.accelerate(&unit_name, &source_path));
        });
    if let Err(e) = spawned {
        warn!("Cannot spawn compilation bridge for {}: {}", unit, e);
        return None;
    }

    match rx.recv_timeout(timeout) {
        Ok(Some(artifact)) if artifact.is_file() => Some(artifact),
        Ok(Some(artifact)) => {
            debug!("Bridge reported {:?} for {} but no file exists", artifact, unit);
            None
        }
        Ok(None) => {
            debug!("Bridge produced nothing for {}", unit);
            None
        }
        Err(_) => {
            debug!("Bridge for {} timed out after {:?}", unit, timeout);
            None
        }
    }
}

/// Bridge running an external command.
///
/// Arguments may contain `{unit}`, `{source}` and `{output}` placeholders.
/// The build succeeds when the command exits with status 0 and the output
/// file exists.
#[derive(Debug, Clone)]
pub struct CommandBridge {
    program: String,
    args: Vec<String>,
    output_dir: Option<PathBuf>,
    output_extension: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl CommandBridge {
    /// Create a bridge running `program`
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            output_dir: None,
            output_extension: std::env::consts::DLL_EXTENSION.to_string(),
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(20),
        }
    }

    /// Create from configuration
    pub fn from_config(config: &BridgeConfig, timeout: Duration) -> Self {
        let mut bridge = Self::new(&config.program)
            .with_args(config.args.iter().cloned())
            .with_timeout(timeout);
        bridge.output_dir = config.output_dir.clone();
        if let Some(ext) = &config.output_extension {
            bridge.output_extension = ext.clone();
        }
        bridge
    }

    /// Append arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Directory artifacts are written to; defaults to the source's directory
    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Kill the command after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Where the artifact for `unit` is expected
    pub fn output_path(&self, unit: &str, source: &Path) -> PathBuf {
        let dir = self
            .output_dir
            .clone()
            .or_else(|| source.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        dir.join(format!(
            "{}{}.{}",
            std::env::consts::DLL_PREFIX,
            unit,
            self.output_extension
        ))
    }

    fn expand(&self, arg: &str, unit: &str, source: &Path, output: &Path) -> String {
        arg.replace("{unit}", unit)
            .replace("{source}", &source.display().to_string())
            .replace("{output}", &output.display().to_string())
    }
}

impl CompilationBridge for CommandBridge {
    fn accelerate(&self, unit: &str, source: &Path) -> Option<PathBuf> {
        let output = self.output_path(unit, source);
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| self.expand(arg, unit, source, &output))
            .collect();

        info!("Accelerating {} with {} {:?}", unit, self.program, args);
        let mut child = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                debug!("Cannot run {}: {}", self.program, e);
                return None;
            }
        };

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if started.elapsed() >= self.timeout => {
                    debug!("{} exceeded {:?}; killing it", self.program, self.timeout);
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    debug!("Waiting for {} failed: {}", self.program, e);
                    return None;
                }
            }
        };

        if !status.success() {
            debug!("{} exited with {}", self.program, status);
            return None;
        }
        if !output.is_file() {
            debug!("{} succeeded but {:?} is missing", self.program, output);
            return None;
        }
        Some(output)
    }
}
