//! TOML configuration file loading
//!
//! Supports `<config_dir>/mbean-collector/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct CollectorConfigFile {
    /// Controller connection
    #[serde(default)]
    pub controller: ControllerFileConfig,

    /// Collector identity
    #[serde(default)]
    pub collector: CollectorFileConfig,

    /// Periodic dispatch tuning
    #[serde(default)]
    pub dispatch: DispatchFileConfig,

    /// On-demand listener
    #[serde(default)]
    pub server: ServerFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ControllerFileConfig {
    /// Base URL (e.g. "http://localhost:8081/")
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CollectorFileConfig {
    /// Name this collector registers under
    pub name: Option<String>,

    /// Component reported in heartbeats
    pub component: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchFileConfig {
    /// Query pool size; the result pool is twice this
    pub pool_size: Option<usize>,

    /// Per-call timeout in seconds
    pub call_timeout_secs: Option<u64>,

    /// Cycle interval override in seconds
    pub cycle_secs: Option<u64>,

    /// Descriptor refresh override in minutes
    pub refresh_minutes: Option<u64>,

    /// Keep cycling instead of collecting once
    pub continuous: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Port for the on-demand listener; disabled when unset
    pub listen_port: Option<u16>,

    /// Run the calls of one collect request concurrently
    pub concurrent_agent_calls: Option<bool>,

    /// Deadline for one collect request in seconds
    pub batch_timeout_secs: Option<u64>,
}

/// Load the TOML config file
///
/// An explicitly given path must exist and parse. The default path is
/// optional: if it is missing or unreadable the defaults are used.
///
/// # Errors
///
/// Returns error if an explicitly given file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<CollectorConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(CollectorConfigFile::default());
    };

    if !path.exists() {
        return Ok(CollectorConfigFile::default());
    }

    let config = match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                CollectorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            CollectorConfigFile::default()
        }
    };

    Ok(config)
}

/// Return the config file path: `<config_dir>/mbean-collector/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("mbean-collector").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file() {
        let config: CollectorConfigFile = toml::from_str(
            r#"
            [controller]
            url = "http://controller:8081/"

            [dispatch]
            pool_size = 4
            continuous = true
            "#,
        )
        .unwrap();

        assert_eq!(config.controller.url.as_deref(), Some("http://controller:8081/"));
        assert!(config.controller.username.is_none());
        assert_eq!(config.dispatch.pool_size, Some(4));
        assert_eq!(config.dispatch.continuous, Some(true));
        assert!(config.server.listen_port.is_none());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config: CollectorConfigFile = toml::from_str("").unwrap();
        assert!(config.collector.name.is_none());
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let path = std::env::temp_dir().join("mbean-collector-does-not-exist.toml");
        assert!(load_config_file(Some(&path)).is_err());
    }
}
