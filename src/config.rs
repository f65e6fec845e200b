//! Bridge Configuration
//!
//! Handles parsing and management of unit-bridge.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::diagnostics::DEFAULT_TAG;
use crate::ffi::{DEFAULT_RUN_SYMBOL, DEFAULT_WARN_SYMBOL};

/// Configuration file looked up from the working directory upward
pub const CONFIG_FILE: &str = "unit-bridge.toml";

/// Environment variable overriding `native.library`
pub const LIBRARY_ENV: &str = "UNIT_BRIDGE_LIBRARY";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching unit-bridge.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    /// Native runtime library
    #[serde(default)]
    pub native: NativeConfig,

    /// Diagnostic sink
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Managed fallback server
    #[serde(default)]
    pub fallback: FallbackConfig,
}

impl BridgeConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents, then apply
    /// the environment override.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        let config = Self::find_and_load(&cwd)?;
        Ok(config.with_library_override(std::env::var(LIBRARY_ENV).ok()))
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "loading configuration");
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Replace the native library when an override is given; an empty
    /// override clears it.
    pub fn with_library_override(mut self, library: Option<String>) -> Self {
        if let Some(library) = library {
            self.native.library = if library.is_empty() {
                None
            } else {
                Some(library)
            };
        }
        self
    }
}

/// Native runtime library and its entry points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Library path or bare name; unset means no native runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library: Option<String>,

    /// Symbol of the blocking run loop
    #[serde(default = "default_run_symbol")]
    pub run_symbol: String,

    /// Symbol of the logger
    #[serde(default = "default_warn_symbol")]
    pub warn_symbol: String,
}

fn default_run_symbol() -> String {
    DEFAULT_RUN_SYMBOL.to_string()
}

fn default_warn_symbol() -> String {
    DEFAULT_WARN_SYMBOL.to_string()
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            library: None,
            run_symbol: default_run_symbol(),
            warn_symbol: default_warn_symbol(),
        }
    }
}

/// Diagnostic sink settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Prefix on every message sent to the native logger
    #[serde(default = "default_tag")]
    pub tag: String,
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self { tag: default_tag() }
    }
}

/// Fallback server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Serve with the managed server when the native runtime cannot start
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Worker threads for the fallback server (defaults to one per core)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
}

fn default_true() -> bool {
    true
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_threads: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert!(config.native.library.is_none());
        assert_eq!(config.native.run_symbol, "nxt_rust_run");
        assert_eq!(config.native.warn_symbol, "nxt_rust_warn");
        assert_eq!(config.diagnostics.tag, "[rust] ");
        assert!(config.fallback.enabled);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[native]
library = "/opt/unit/lib/libunit-rust.so"
run_symbol = "custom_run"

[diagnostics]
tag = "[app] "

[fallback]
enabled = false
worker_threads = 2
"#;
        let config: BridgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.native.library.as_deref(),
            Some("/opt/unit/lib/libunit-rust.so")
        );
        assert_eq!(config.native.run_symbol, "custom_run");
        assert_eq!(config.native.warn_symbol, "nxt_rust_warn");
        assert_eq!(config.diagnostics.tag, "[app] ");
        assert!(!config.fallback.enabled);
        assert_eq!(config.fallback.worker_threads, Some(2));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = BridgeConfig::default();
        config.native.library = Some("unit-rust".to_string());
        config.fallback.worker_threads = Some(4);
        config.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = BridgeConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[fallback]\nenabled = \"sometimes\"\n").unwrap();
        assert!(matches!(BridgeConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_find_and_load_searches_parents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[diagnostics]\ntag = \"[parent] \"\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = BridgeConfig::find_and_load(&nested).unwrap();
        assert_eq!(config.diagnostics.tag, "[parent] ");
    }

    #[test]
    fn test_library_override() {
        let config = BridgeConfig::default().with_library_override(Some("libx.so".into()));
        assert_eq!(config.native.library.as_deref(), Some("libx.so"));

        let config = config.with_library_override(None);
        assert_eq!(config.native.library.as_deref(), Some("libx.so"));

        let config = config.with_library_override(Some(String::new()));
        assert!(config.native.library.is_none());
    }
}
