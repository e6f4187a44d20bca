//! Bridge configuration
//!
//! [`BridgeConfig`] holds the provider manager's settings. Every field has a
//! default, so an empty file (or no file at all) yields a usable config.
//!
//! ## Loading
//!
//! - Format detected from the file extension (TOML, YAML, JSON, INI, RON, JSON5)
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Optional environment overrides with a prefix (`PYCIM_PROVIDER_DIR=...`)

use config::{Config as Cfg, Environment, File};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

pub use config::FileFormat;


/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Default environment prefix for [`BridgeConfig::load_with_env`].
pub const ENV_PREFIX: &str = "PYCIM";

// ============================================================================
// Bridge configuration
// ============================================================================

/// Provider manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory prepended to relative provider locations
    pub provider_dir: PathBuf,
    /// Object-model binding module imported at startup
    pub binding_module: String,
    /// Provider construction entry point, relative to the binding module
    pub provider_factory: String,
    /// Management-error type, relative to the binding module
    pub error_type: String,
    /// Prefix of provider entry points (`MI_shutdown`, `MI_enumInstances`, ...)
    pub function_prefix: String,
    /// Providers idle for longer than this are unloaded by the idle sweep
    pub idle_timeout_secs: Option<u64>,
    /// Keep activation counts from dropping below zero
    pub clamp_activation: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            provider_dir: PathBuf::from("/usr/lib/pycim"),
            binding_module: "pywbem".to_string(),
            provider_factory: "cim_provider.ProviderProxy".to_string(),
            error_type: "CIMError".to_string(),
            function_prefix: "MI_".to_string(),
            idle_timeout_secs: None,
            clamp_activation: true,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.provider_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_binding_module(mut self, module: &str) -> Self {
        self.binding_module = module.to_string();
        self
    }

    pub fn with_function_prefix(mut self, prefix: &str) -> Self {
        self.function_prefix = prefix.to_string();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_secs = Some(timeout.as_secs());
        self
    }

    pub fn with_clamp_activation(mut self, clamp: bool) -> Self {
        self.clamp_activation = clamp;
        self
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    /// Load from a file, format detected from the extension.
    pub fn load(path: &str) -> ConfigResult<Self> {
        load_config(path)
    }

    /// Load from a file, then apply `PYCIM_*` environment overrides.
    pub fn load_with_env(path: &str) -> ConfigResult<Self> {
        load_with_env(path, ENV_PREFIX)
    }
}

// ============================================================================
// Loading helpers
// ============================================================================

/// Detect configuration format from file extension
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

static ENV_VAR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| {
            tracing::warn!(error = %e, "env var pattern rejected, substitution disabled")
        })
        .ok()
});

/// Substitute `${VAR}` and `$VAR` references with environment values.
///
/// Unset variables are left untouched.
pub fn substitute_env_vars(content: &str) -> String {
    let Some(pattern) = ENV_VAR.as_ref() else {
        return content.to_string();
    };
    pattern
        .replace_all(content, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_else(|_| {
                tracing::debug!(variable = name, "environment variable not set, left as is");
                caps[0].to_string()
            })
        })
        .into_owned()
}

/// Load configuration from a file
pub fn load_config<T>(path: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format)
}

/// Load configuration from a string with explicit format
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let substituted_content = substitute_env_vars(content);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted_content, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load configuration with environment variable overrides
///
/// Variables use the given prefix and `__` for nesting, e.g.
/// `PYCIM_PROVIDER_DIR`.
pub fn load_with_env<T>(path: &str, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    let substituted = substitute_env_vars(&content);
    tracing::debug!(path = path, prefix = env_prefix, "loading config with env overrides");

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}
