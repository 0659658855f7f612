//! Config file loader and serialization.
//!
//! The format follows the file extension: `.json` through serde_json, `.toml`
//! through toml. Loaded configs are validated before they are returned.

use super::validator::validate_config;
use super::HarnessConfig;
use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Get the default config path: ~/.config/goatd-validator/config.toml
pub fn get_default_config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        ConfigError::ValidationFailed("Cannot determine config directory".to_string())
    })?;
    Ok(config_dir.join("goatd-validator").join("config.toml"))
}

/// Validate config path (.json or .toml extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    format_of(path).map(|_| ())
}

fn format_of(path: &Path) -> Result<ConfigFormat, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    if path.to_str().is_none() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path contains invalid characters".to_string(),
        ));
    }

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json or .toml extension, got .{}",
            ext
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json or .toml extension".to_string(),
        )),
    }
}

/// Load and validate a config file.
pub fn load_config_from_file(path: &Path) -> Result<HarnessConfig, ConfigError> {
    let format = format_of(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: HarnessConfig = match format {
        ConfigFormat::Json => serde_json::from_str(&content)?,
        ConfigFormat::Toml => toml::from_str(&content)?,
    };

    validate_config(&config)?;
    log::info!(
        "[Config] Loaded {} ({} phases, {}s budget)",
        path.display(),
        config.phases.len(),
        config.total_duration_secs
    );
    Ok(config)
}

/// Save config; the format follows the extension.
pub fn save_config_to_file(config: &HarnessConfig, path: &Path) -> Result<(), ConfigError> {
    let format = format_of(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
    };
    fs::write(path, content)?;
    Ok(())
}

/// Load from `path` if given, else from the default path if it exists,
/// else fall back to built-in defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
    if let Some(path) = path {
        return load_config_from_file(path);
    }
    match get_default_config_path() {
        Ok(default_path) if default_path.exists() => load_config_from_file(&default_path),
        _ => {
            log::info!("[Config] No config file found, using built-in defaults");
            let config = HarnessConfig::default();
            validate_config(&config)?;
            Ok(config)
        }
    }
}
