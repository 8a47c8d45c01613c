//! TOML-based configuration for formula_slicer.
//!
//! Example configuration:
//! ```toml
//! [compiler]
//! default_dialect = "postgres"
//! compeng_dialect = "postgres"
//! split_window_aggregates = true
//! tag_aggregates = false
//! max_split_passes = 16
//!
//! [slicing]
//! iteration_id = 0
//!
//! [logging]
//! verbose = false
//! filter = "formula_slicer=info"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::sql::dialect::Dialect;

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV_VAR: &str = "FORMULA_SLICER_CONFIG";

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub compiler: CompilerSettings,
    pub slicing: SlicingSettings,
    pub logging: LoggingSettings,
}

/// Defaults for every compilation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Dialect of the source database.
    pub default_dialect: Dialect,

    /// Dialect the post-processing engine renders its levels in.
    pub compeng_dialect: Dialect,

    /// Move aggregates out from under window functions into subqueries.
    pub split_window_aggregates: bool,

    /// Give plain aggregate calls their own level tags.
    pub tag_aggregates: bool,

    /// Upper bound on splitting passes; the query's own split depth applies
    /// when unset or lower.
    pub max_split_passes: Option<usize>,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            default_dialect: Dialect::default(),
            compeng_dialect: Dialect::Postgres,
            split_window_aggregates: true,
            tag_aggregates: false,
            max_split_passes: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SlicingSettings {
    /// Iteration number baked into generated aliases and query ids.
    pub iteration_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log planning summaries at info level.
    pub verbose: bool,

    /// `tracing` env-filter directive used by the CLI when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `FORMULA_SLICER_CONFIG`
    /// 2. `./formula_slicer.toml`
    /// 3. `~/.config/formula_slicer/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var(CONFIG_ENV_VAR) {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("formula_slicer.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("formula_slicer").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.compiler.max_split_passes == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "compiler.max_split_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
