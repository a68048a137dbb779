//! Native shared-library units
//!
//! A native unit is a `cdylib` exporting four C symbols:
//!
//! | symbol | signature |
//! |---|---|
//! | `hotswap_unit_abi_version` | `fn() -> u32` |
//! | `hotswap_unit_manifest` | `fn() -> *mut c_char` (JSON [`NativeManifest`]) |
//! | `hotswap_unit_call` | `fn(op: *const c_char, args: *const c_char) -> *mut c_char` (JSON [`CallOutcome`]) |
//! | `hotswap_unit_free` | `fn(*mut c_char)` |
//!
//! Strings returned by the unit are released with its own `hotswap_unit_free`.
//! The [`declare_unit!`](crate::declare_unit) macro generates all four.
//!
//! Every load copies the library into a private temporary directory first,
//! so each reload maps a distinct file and yields fresh statics even when
//! the platform loader caches libraries by path.

use libloading::{Library, Symbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

use hotswap_kernel::{Args, Namespace, SymbolKind, Value};

use super::{LoadError, SourceImage, UnitLoader};

/// ABI version this runtime speaks
pub const ABI_VERSION: u32 = 1;

const ABI_VERSION_SYMBOL: &str = "hotswap_unit_abi_version";
const MANIFEST_SYMBOL: &str = "hotswap_unit_manifest";
const CALL_SYMBOL: &str = "hotswap_unit_call";
const FREE_SYMBOL: &str = "hotswap_unit_free";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type ManifestFn = unsafe extern "C" fn() -> *mut c_char;
type CallFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_char;
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Signature of an operation in a native unit's dispatch table
pub type NativeOperation = fn(&Args) -> Result<Value, String>;

/// What a native unit exports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NativeManifest {
    #[serde(default)]
    pub operations: Vec<String>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Result of one `hotswap_unit_call`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallOutcome {
    Ok(Value),
    Err(String),
}

/// Platform file name of a native unit, e.g. `libcalc.so`
pub fn library_file_name(unit: &str) -> String {
    format!(
        "{}{}.{}",
        std::env::consts::DLL_PREFIX,
        unit,
        std::env::consts::DLL_EXTENSION
    )
}

/// Loader for platform shared libraries
#[derive(Debug, Default)]
pub struct NativeLoader;

impl NativeLoader {
    pub fn new() -> Self {
        Self
    }
}

impl UnitLoader for NativeLoader {
    fn name(&self) -> &'static str {
        "native"
    }

    fn handles(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case(std::env::consts::DLL_EXTENSION)
    }

    fn load(&self, unit: &str, image: &SourceImage) -> Result<Arc<dyn Namespace>, LoadError> {
        let shadow_dir = tempfile::Builder::new().prefix("hotswap-").tempdir()?;
        let file_name = image
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| library_file_name(unit).into());
        let shadow_path = shadow_dir.path().join(file_name);
        std::fs::write(&shadow_path, &image.bytes)?;

        info!("Loading native unit {} from {:?}", unit, image.path);
        let library = unsafe {
            Library::new(&shadow_path).map_err(|e| LoadError::LibraryLoad(e.to_string()))?
        };

        let (version, manifest_fn, exports) = unsafe {
            let version: AbiVersionFn = *symbol::<AbiVersionFn>(&library, ABI_VERSION_SYMBOL)?;
            let manifest_fn: ManifestFn = *symbol::<ManifestFn>(&library, MANIFEST_SYMBOL)?;
            let call: CallFn = *symbol::<CallFn>(&library, CALL_SYMBOL)?;
            let free: FreeFn = *symbol::<FreeFn>(&library, FREE_SYMBOL)?;
            (version(), manifest_fn, Exports { call, free })
        };

        if version != ABI_VERSION {
            return Err(LoadError::AbiMismatch {
                expected: ABI_VERSION,
                actual: version,
            });
        }

        let manifest = unsafe { exports.manifest(manifest_fn) }?;
        debug!(
            "Native unit {} exposes {} operations and {} values",
            unit,
            manifest.operations.len(),
            manifest.values.len()
        );

        Ok(Arc::new(NativeNamespace {
            manifest,
            exports,
            _library: library,
            _shadow_dir: shadow_dir,
        }))
    }
}

unsafe fn symbol<'lib, T>(library: &'lib Library, name: &str) -> Result<Symbol<'lib, T>, LoadError> {
    unsafe { library.get(name.as_bytes()) }
        .map_err(|e| LoadError::SymbolNotFound(format!("{}: {}", name, e)))
}

/// Entry points copied out of a loaded library
#[derive(Clone, Copy)]
struct Exports {
    call: CallFn,
    free: FreeFn,
}

impl Exports {
    unsafe fn take_string(&self, raw: *mut c_char) -> Option<String> {
        if raw.is_null() {
            return None;
        }
        let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned();
        unsafe { (self.free)(raw) };
        Some(text)
    }

    unsafe fn manifest(&self, manifest_fn: ManifestFn) -> Result<NativeManifest, LoadError> {
        let text = unsafe { self.take_string(manifest_fn()) }
            .ok_or_else(|| LoadError::InvalidManifest("manifest export returned null".to_string()))?;
        serde_json::from_str(&text).map_err(|e| LoadError::InvalidManifest(e.to_string()))
    }

    fn invoke(&self, operation: &str, args: &Args) -> Result<Value, String> {
        let op = CString::new(operation).map_err(|e| e.to_string())?;
        let payload = serde_json::to_string(args).map_err(|e| e.to_string())?;
        let payload = CString::new(payload).map_err(|e| e.to_string())?;

        let text = unsafe { self.take_string((self.call)(op.as_ptr(), payload.as_ptr())) }
            .ok_or_else(|| format!("{} returned null", CALL_SYMBOL))?;

        match serde_json::from_str::<CallOutcome>(&text) {
            Ok(CallOutcome::Ok(value)) => Ok(value),
            Ok(CallOutcome::Err(message)) => Err(message),
            Err(e) => Err(format!("malformed call result: {}", e)),
        }
    }
}

/// Namespace backed by a loaded shared library
pub struct NativeNamespace {
    manifest: NativeManifest,
    exports: Exports,
    // Unloaded before its shadow directory is removed.
    _library: Library,
    _shadow_dir: TempDir,
}

impl Namespace for NativeNamespace {
    fn lookup(&self, symbol: &str) -> Option<SymbolKind> {
        if self.manifest.operations.iter().any(|op| op == symbol) {
            Some(SymbolKind::Operation)
        } else if self.manifest.values.contains_key(symbol) {
            Some(SymbolKind::Value)
        } else {
            None
        }
    }

    fn operations(&self) -> Vec<String> {
        let mut ops = self.manifest.operations.clone();
        ops.sort();
        ops
    }

    fn value(&self, symbol: &str) -> Option<Value> {
        self.manifest.values.get(symbol).cloned()
    }

    fn call(&self, operation: &str, args: &Args) -> Result<Value, String> {
        self.exports.invoke(operation, args)
    }

    fn declared_dependencies(&self) -> Vec<String> {
        self.manifest.dependencies.clone()
    }
}

// Unit-side helpers used by `declare_unit!`.

#[doc(hidden)]
pub fn export_json<T: Serialize>(value: &T) -> *mut c_char {
    serde_json::to_string(value)
        .ok()
        .and_then(|text| CString::new(text).ok())
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

/// Run one call against a dispatch table.
///
/// # Safety
/// `operation` and `args` must be null or valid NUL-terminated strings.
#[doc(hidden)]
pub unsafe fn dispatch(
    operation: *const c_char,
    args: *const c_char,
    table: &[(&str, NativeOperation)],
) -> *mut c_char {
    let outcome = unsafe { dispatch_inner(operation, args, table) };
    let outcome = match outcome {
        Ok(value) => CallOutcome::Ok(value),
        Err(message) => CallOutcome::Err(message),
    };
    export_json(&outcome)
}

unsafe fn dispatch_inner(
    operation: *const c_char,
    args: *const c_char,
    table: &[(&str, NativeOperation)],
) -> Result<Value, String> {
    if operation.is_null() || args.is_null() {
        return Err("null argument".to_string());
    }
    let operation = unsafe { CStr::from_ptr(operation) }
        .to_str()
        .map_err(|e| e.to_string())?;
    let args = unsafe { CStr::from_ptr(args) }
        .to_str()
        .map_err(|e| e.to_string())?;
    let args: Args = serde_json::from_str(args).map_err(|e| e.to_string())?;

    let (_, func) = table
        .iter()
        .find(|(name, _)| *name == operation)
        .ok_or_else(|| format!("unknown operation {}", operation))?;

    match panic::catch_unwind(AssertUnwindSafe(|| func(&args))) {
        Ok(result) => result,
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

/// Text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Free a string produced by [`export_json`].
///
/// # Safety
/// `raw` must be null or a pointer returned by [`export_json`] not yet released.
#[doc(hidden)]
pub unsafe fn release(raw: *mut c_char) {
    if !raw.is_null() {
        drop(unsafe { CString::from_raw(raw) });
    }
}

/// Export the native unit ABI from a `cdylib`.
///
/// ```ignore
/// fn tick(args: &hotswap_runtime::Args) -> Result<hotswap_runtime::Value, String> {
///     Ok(args.keyword.get("n").cloned().unwrap_or_default())
/// }
///
/// hotswap_runtime::declare_unit! {
///     dependencies: ["base"],
///     operations: { "tick" => tick },
///     values: { "LIMIT" => 10 },
/// }
/// ```
#[macro_export]
macro_rules! declare_unit {
    (
        dependencies: [$($dep:expr),* $(,)?],
        operations: { $($op:literal => $func:path),* $(,)? }
        $(, values: { $($name:literal => $value:expr),* $(,)? })?
        $(,)?
    ) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn hotswap_unit_abi_version() -> u32 {
            $crate::loader::native::ABI_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn hotswap_unit_manifest() -> *mut ::std::os::raw::c_char {
            #[allow(unused_mut)]
            let mut values = ::std::collections::BTreeMap::new();
            $($(
                values.insert(::std::string::String::from($name), $crate::Value::from($value));
            )*)?
            let manifest = $crate::loader::native::NativeManifest {
                operations: vec![$(::std::string::String::from($op)),*],
                values,
                dependencies: vec![$(::std::string::String::from($dep)),*],
            };
            $crate::loader::native::export_json(&manifest)
        }

        /// # Safety
        /// Pointers must be null or valid NUL-terminated strings.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn hotswap_unit_call(
            op: *const ::std::os::raw::c_char,
            args: *const ::std::os::raw::c_char,
        ) -> *mut ::std::os::raw::c_char {
            let table: &[(&str, $crate::loader::native::NativeOperation)] = &[
                $(($op, $func as $crate::loader::native::NativeOperation)),*
            ];
            unsafe { $crate::loader::native::dispatch(op, args, table) }
        }

        /// # Safety
        /// `raw` must come from this unit and not be freed twice.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn hotswap_unit_free(raw: *mut ::std::os::raw::c_char) {
            unsafe { $crate::loader::native::release(raw) }
        }
    };
}
