//! Loading and version checks.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{upgrade_config, PipelineConfig};
use crate::errors::ConfigurationError;

/// Configuration format version written by this build.
pub const CURRENT_CONFIG_VERSION: &str = "1.0";

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*v?(\d+)\.(\d+)(?:\.\d+)?\s*$").expect("valid regex"));

/// Parses a `major.minor[.patch]` version string.
///
/// # Errors
///
/// Returns `ConfigurationError::InvalidVersion` for anything else.
pub fn parse_version(version: &str) -> Result<(u64, u64), ConfigurationError> {
    let invalid = || ConfigurationError::InvalidVersion {
        version: version.to_string(),
    };
    let caps = VERSION_RE.captures(version).ok_or_else(invalid)?;
    let major = caps[1].parse().map_err(|_| invalid())?;
    let minor = caps[2].parse().map_err(|_| invalid())?;
    Ok((major, minor))
}

/// Reads and parses a configuration file.
///
/// # Errors
///
/// Returns a `ConfigurationError` if the file cannot be read, is not valid
/// TOML, or was written for an incompatible version.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigurationError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    parse_config(&text).map_err(|err| match err {
        ConfigurationError::Parse { path: None, message } => ConfigurationError::Parse {
            path: Some(path.to_path_buf()),
            message,
        },
        other => other,
    })
}

/// Parses configuration text, upgrading older versions.
///
/// Same-major versions load as-is; older majors are upgraded with
/// [`upgrade_config`]; newer majors are rejected. Unknown keys are logged.
///
/// # Errors
///
/// Returns a `ConfigurationError` on syntax, version or shape problems.
pub fn parse_config(text: &str) -> Result<PipelineConfig, ConfigurationError> {
    let parse_error = |err: toml::de::Error| ConfigurationError::Parse {
        path: None,
        message: err.to_string(),
    };

    let mut table: toml::Table = toml::from_str(text).map_err(parse_error)?;

    let found = match table.get("version") {
        None => CURRENT_CONFIG_VERSION.to_string(),
        Some(toml::Value::String(version)) => version.clone(),
        Some(other) => {
            return Err(ConfigurationError::InvalidVersion {
                version: other.to_string(),
            })
        }
    };
    let (major, _) = parse_version(&found)?;
    let (current_major, _) = parse_version(CURRENT_CONFIG_VERSION)?;

    if major > current_major {
        return Err(ConfigurationError::IncompatibleVersion {
            found,
            supported: CURRENT_CONFIG_VERSION.to_string(),
        });
    }
    if major < current_major {
        tracing::info!(from = %found, to = CURRENT_CONFIG_VERSION, "Upgrading configuration");
        table = upgrade_config(table);
    }

    let config: PipelineConfig = toml::Value::Table(table).try_into().map_err(parse_error)?;

    for key in config.unknown_keys() {
        tracing::warn!(key = %key, "Ignoring unknown configuration key");
    }
    if config.concurrency == Some(0) {
        return Err(ConfigurationError::InvalidSetting {
            setting: "concurrency".to_string(),
            message: "must be at least 1".to_string(),
        });
    }
    if let Some(secs) = config.item_timeout_secs {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(ConfigurationError::InvalidSetting {
                setting: "item_timeout_secs".to_string(),
                message: format!("must be a positive number of seconds, got {secs}"),
            });
        }
    }

    Ok(config)
}
