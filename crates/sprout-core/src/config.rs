//! Configuration: `sprout.toml` / `sprout.json` discovery and loading

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::error::SproutError;
use crate::result::Result;

/// Config file names, in discovery priority order
pub const CONFIG_FILE_NAMES: [&str; 3] = ["sprout.toml", ".sprout.toml", "sprout.json"];

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SproutConfig {
    pub interpreter: InterpreterConfig,
    pub cache: CacheConfig,
    pub normalize: NormalizeConfig,
    pub formatter: FormatterConfig,
}

/// Interpreter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InterpreterConfig {
    /// Maximum nesting depth of any single rule
    pub max_depth: usize,
    /// Seed for `{ N% ... }` draws; entropy when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            seed: None,
        }
    }
}

/// Normalization configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NormalizeConfig {
    /// Prefix of the rules created by `split`
    pub rule_prefix: String,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            rule_prefix: "Rule".to_string(),
        }
    }
}

/// Formatter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FormatterConfig {
    /// Remove redundant brackets before printing
    pub trim: bool,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self { trim: true }
    }
}

impl SproutConfig {
    /// Load configuration from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| SproutError::io_error(path, e))?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            _ => {
                return Err(SproutError::config_error(format!(
                    "Unsupported config file extension for '{}' (expected .toml or .json)",
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.interpreter.max_depth == 0 {
            return Err(SproutError::config_error(
                "interpreter.maxDepth must be greater than zero",
            ));
        }
        if self.cache.capacity == 0 {
            return Err(SproutError::config_error(
                "cache.capacity must be greater than zero",
            ));
        }
        if self.normalize.rule_prefix.is_empty()
            || !self
                .normalize
                .rule_prefix
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            return Err(SproutError::config_error(format!(
                "normalize.rulePrefix '{}' is not a valid identifier start",
                self.normalize.rule_prefix
            )));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| SproutError::config_error(format!("TOML error: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Configuration loader for discovering and loading config files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Auto-discover a config file by walking up from `start_path`
    ///
    /// Each directory is searched for `sprout.toml`, `.sprout.toml` and
    /// `sprout.json`, in that order.
    pub fn auto_discover(start_path: &Path) -> Result<Option<PathBuf>> {
        let mut current = start_path
            .canonicalize()
            .map_err(|e| SproutError::config_error(format!("Invalid path: {e}")))?;

        loop {
            for filename in CONFIG_FILE_NAMES {
                let config_path = current.join(filename);
                if config_path.is_file() {
                    tracing::debug!("Found config: {}", config_path.display());
                    return Ok(Some(config_path));
                }
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load config from an explicit path, or discover one starting at
    /// `start_dir` (current directory by default). Falls back to defaults
    /// when nothing is found.
    pub fn load(custom_path: Option<&Path>, start_dir: Option<&Path>) -> Result<SproutConfig> {
        if let Some(path) = custom_path {
            if !path.exists() {
                return Err(SproutError::config_error(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            return SproutConfig::load(path);
        }

        let search_dir = start_dir.unwrap_or_else(|| Path::new("."));
        match Self::auto_discover(search_dir)? {
            Some(path) => SproutConfig::load(&path),
            None => {
                tracing::debug!("No config file found, using defaults");
                Ok(SproutConfig::default())
            }
        }
    }
}
