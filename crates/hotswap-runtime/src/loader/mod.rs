//! Code unit loaders
//!
//! A [`UnitLoader`] turns the bytes of a source file into a fresh
//! [`Namespace`]. [`UnitLoaders`] picks the loader by file extension:
//! - `.rhai` scripts are compiled by [`ScriptLoader`]
//! - platform shared libraries (`.so`, `.dylib`, `.dll`) are opened by [`NativeLoader`]

pub mod native;
pub mod script;

pub use native::NativeLoader;
pub use script::ScriptLoader;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use hotswap_kernel::Namespace;

use crate::backup::content_hash;

/// Loader error types
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No loader for source extension: {0:?}")]
    UnsupportedExtension(String),

    #[error("Compile error: {0}")]
    Compile(String),

    #[error("Initialization error: {0}")]
    Init(String),

    #[error("Failed to load library: {0}")]
    LibraryLoad(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("ABI version mismatch: expected {expected}, got {actual}")]
    AbiMismatch { expected: u32, actual: u32 },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

/// The bytes of a source file as read for one load
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// File the bytes came from
    pub path: PathBuf,
    /// Raw contents
    pub bytes: Vec<u8>,
    /// Content hash of `bytes`
    pub hash: String,
}

impl SourceImage {
    /// Read a source file
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref().to_path_buf();
        let bytes = std::fs::read(&path)?;
        let hash = content_hash(&bytes);
        Ok(Self { path, bytes, hash })
    }

    /// File extension, empty when there is none
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
    }
}

/// Turns source bytes into an executable namespace
pub trait UnitLoader: Send + Sync {
    /// Loader name for logs
    fn name(&self) -> &'static str;

    /// Whether this loader accepts files with the given extension
    fn handles(&self, extension: &str) -> bool;

    /// Load a fresh namespace. Never returns a cached instance.
    fn load(&self, unit: &str, image: &SourceImage) -> Result<Arc<dyn Namespace>, LoadError>;
}

/// Extension-dispatched set of loaders
#[derive(Clone)]
pub struct UnitLoaders {
    loaders: Vec<Arc<dyn UnitLoader>>,
}

impl UnitLoaders {
    /// Script and native loaders
    pub fn new() -> Self {
        Self::empty()
            .with_loader(Arc::new(ScriptLoader::new()))
            .with_loader(Arc::new(NativeLoader::new()))
    }

    /// No loaders at all
    pub fn empty() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Add a loader; earlier loaders win when several handle an extension
    pub fn with_loader(mut self, loader: Arc<dyn UnitLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    fn select(&self, extension: &str) -> Result<&Arc<dyn UnitLoader>, LoadError> {
        self.loaders
            .iter()
            .find(|l| l.handles(extension))
            .ok_or_else(|| LoadError::UnsupportedExtension(extension.to_string()))
    }

    /// Whether any loader accepts the extension
    pub fn supports(&self, extension: &str) -> bool {
        self.select(extension).is_ok()
    }

    /// Load an already-read image
    pub fn load(&self, unit: &str, image: &SourceImage) -> Result<Arc<dyn Namespace>, LoadError> {
        let loader = self.select(image.extension())?;
        debug!("Loading unit {} from {:?} with {} loader", unit, image.path, loader.name());
        loader.load(unit, image)
    }

    /// Read a file and load it
    pub fn load_path(
        &self,
        unit: &str,
        path: &Path,
    ) -> Result<(SourceImage, Arc<dyn Namespace>), LoadError> {
        let image = SourceImage::read(path)?;
        let namespace = self.load(unit, &image)?;
        Ok((image, namespace))
    }
}

impl Default for UnitLoaders {
    fn default() -> Self {
        Self::new()
    }
}

/// Find a unit's source by name in the search paths.
///
/// Per directory, `<name>.rhai` is tried before the platform shared-library
/// file name. A `name` that is itself an existing path is returned as is.
pub fn resolve_source(search_paths: &[PathBuf], name: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(name);
    if direct.is_file() {
        return Some(direct);
    }

    let candidates = [
        format!("{}.rhai", name),
        native::library_file_name(name),
    ];

    search_paths.iter().find_map(|dir| {
        candidates
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.is_file())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_unsupported_extension() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("calc.py");
        fs::write(&path, "def tick(): pass").unwrap();

        let err = UnitLoaders::new().load_path("calc", &path).err().unwrap();
        assert!(matches!(err, LoadError::UnsupportedExtension(ext) if ext == "py"));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = UnitLoaders::new()
            .load_path("calc", Path::new("/definitely/not/here/calc.rhai"))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn test_empty_loader_set_supports_nothing() {
        assert!(!UnitLoaders::empty().supports("rhai"));
        assert!(UnitLoaders::new().supports("rhai"));
        assert!(UnitLoaders::new().supports(std::env::consts::DLL_EXTENSION));
    }

    #[test]
    fn test_resolve_source_prefers_script() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = temp_dir.path().join("first");
        let second = temp_dir.path().join("second");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(second.join("calc.rhai"), "fn tick() {}").unwrap();
        fs::write(second.join(native::library_file_name("calc")), b"\x7fELF").unwrap();

        let found = resolve_source(&[first, second.clone()], "calc").unwrap();
        assert_eq!(found, second.join("calc.rhai"));
        assert!(resolve_source(&[second], "ghost").is_none());
    }

    #[test]
    fn test_source_image_hash_matches_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("calc.rhai");
        fs::write(&path, "fn tick() {}").unwrap();

        let image = SourceImage::read(&path).unwrap();
        assert_eq!(image.extension(), "rhai");
        assert_eq!(image.hash, content_hash(b"fn tick() {}"));
    }
}
