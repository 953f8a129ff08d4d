use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GovernorError, Result};
use crate::governor::{DEFAULT_PRIORITY, LimitOverrides, Provider};

/// Runtime configuration.
///
/// Only tuning knobs live here; providers and their default table are fixed
/// in code and the file can only adjust them.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: Option<String>,
    pub default_priority: i32,
    pub providers: HashMap<Provider, LimitOverrides>,
}

/// On-disk shape; provider keys are validated after parsing.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    log_level: Option<String>,
    default_priority: i32,
    providers: HashMap<String, LimitOverrides>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            default_priority: DEFAULT_PRIORITY,
            providers: HashMap::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            default_priority: DEFAULT_PRIORITY,
            providers: HashMap::new(),
        }
    }
}

impl TryFrom<ConfigFile> for Config {
    type Error = GovernorError;

    fn try_from(file: ConfigFile) -> Result<Self> {
        let mut providers = HashMap::new();
        for (key, overrides) in file.providers {
            let provider: Provider = key.parse()?;
            overrides
                .validate()
                .map_err(|e| GovernorError::Config(format!("providers.{}: {}", key, e)))?;
            if providers.insert(provider, overrides).is_some() {
                return Err(GovernorError::Config(format!(
                    "provider {} configured more than once (via {})",
                    provider, key
                )));
            }
        }

        Ok(Self {
            log_level: file.log_level,
            default_priority: file.default_priority,
            providers,
        })
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, it must load
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config =
                config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!(
                            "Failed to load config from {}: {}",
                            primary_config.display(),
                            e
                        );
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content)?;
        Self::try_from(file)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config = Self::from_yaml(&content)?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
