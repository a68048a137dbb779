//! Multi-format configuration loading

use ::config::{Config as Cfg, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::LazyLock;

use super::{ConfigError, ConfigResult};

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced env var pattern is valid")
});

static SIMPLE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("simple env var pattern is valid")
});

/// Detect configuration format from file extension
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
pub fn detect_format(path: impl AsRef<Path>) -> ConfigResult<FileFormat> {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// Supports both `${VAR_NAME}` and `$VAR_NAME`. Unset variables are left
/// untouched.
pub fn substitute_env_vars(content: &str) -> String {
    let result = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    SIMPLE_VAR
        .replace_all(&result, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .to_string()
}

fn build<T: DeserializeOwned>(sources: &[(String, FileFormat)]) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    for (content, format) in sources {
        builder = builder.add_source(File::from_str(content, *format));
    }

    let config = builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration from a file
///
/// The format comes from the file extension; environment variables are
/// substituted before parsing.
pub fn load_config<T>(path: impl AsRef<Path>) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    build(&[(substitute_env_vars(&content), format)])
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    build(&[(substitute_env_vars(content), format)])
}

/// Load configuration from multiple files, later files overriding earlier ones
pub fn load_merged<T>(paths: &[&Path]) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        sources.push((substitute_env_vars(&content), format));
    }
    build(&sources)
}
