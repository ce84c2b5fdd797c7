//! Configuration management for the collector
//!
//! Precedence is defaults, then the TOML file, then `MBEAN_COLLECTOR_*`
//! environment variables. Command-line flags are applied on top by the binary.

pub mod file;

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::collector::CollectorSettings;
use crate::controller::DESCRIPTOR_KIND;
use crate::dispatch::DispatcherConfig;
use crate::{Error, Result};

pub const DEFAULT_CONTROLLER_URL: &str = "http://localhost:8081/";
pub const DEFAULT_CONTROLLER_USER: &str = "admin";
pub const DEFAULT_COLLECTOR_NAME: &str = "localhost";
pub const DEFAULT_COMPONENT_NAME: &str = "mbean-collector";
pub const DEFAULT_POOL_SIZE: usize = 10;
pub const DEFAULT_CONTROLLER_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);

const ENV_PREFIX: &str = "MBEAN_COLLECTOR_";

/// Collector configuration
#[derive(Debug)]
pub struct Config {
    pub controller: ControllerConfig,

    /// Name this collector registers under at the controller
    pub collector_name: String,

    /// Component reported in heartbeats
    pub component_name: String,

    pub dispatch: DispatchConfig,
    pub server: ServerConfig,
}

/// Controller connection
#[derive(Debug)]
pub struct ControllerConfig {
    pub url: String,
    pub username: String,
    pub password: Option<SecretString>,

    /// Upper bound on any single controller request
    pub request_timeout: Duration,
}

/// Periodic dispatch settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub pool_size: usize,
    pub call_timeout: Duration,

    /// Cycle override; the controller's sampling interval when unset
    pub cycle_interval: Option<Duration>,

    /// Refresh override; the controller's refresh interval when unset
    pub refresh_interval: Option<Duration>,

    pub continuous: bool,
}

/// On-demand listener settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listener port; no listener when unset
    pub listen_port: Option<u16>,
    pub concurrent_agent_calls: bool,
    pub batch_timeout: Duration,
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// The result is not validated; callers apply their own overrides first
    /// and then call [`Config::validate`].
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly given config file cannot be read or
    /// parsed
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Ok(Self::resolve(fc, |key| std::env::var(format!("{ENV_PREFIX}{key}")).ok()))
    }

    /// Merge a config file with variables from `env` (env > toml > default)
    pub fn resolve(fc: file::CollectorConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| env(key).and_then(|s| s.trim().parse::<u64>().ok());
        let flag = |key: &str| env(key).map(|s| parse_flag(&s));

        let controller = ControllerConfig {
            url: env("CONTROLLER_URL")
                .or(fc.controller.url)
                .unwrap_or_else(|| DEFAULT_CONTROLLER_URL.to_string()),
            username: env("CONTROLLER_USER")
                .or(fc.controller.username)
                .unwrap_or_else(|| DEFAULT_CONTROLLER_USER.to_string()),
            password: env("CONTROLLER_PASSWORD")
                .or(fc.controller.password)
                .map(SecretString::from),
            request_timeout: parsed("CONTROLLER_TIMEOUT")
                .or(fc.controller.timeout_secs)
                .map_or(DEFAULT_CONTROLLER_TIMEOUT, Duration::from_secs),
        };

        let dispatch = DispatchConfig {
            pool_size: env("POOL_SIZE")
                .and_then(|s| s.trim().parse().ok())
                .or(fc.dispatch.pool_size)
                .unwrap_or(DEFAULT_POOL_SIZE),
            call_timeout: parsed("CALL_TIMEOUT")
                .or(fc.dispatch.call_timeout_secs)
                .map_or(DEFAULT_CALL_TIMEOUT, Duration::from_secs),
            cycle_interval: parsed("CYCLE_TIME")
                .or(fc.dispatch.cycle_secs)
                .map(Duration::from_secs),
            refresh_interval: parsed("REFRESH_MINUTES")
                .or(fc.dispatch.refresh_minutes)
                .map(|m| Duration::from_secs(m * 60)),
            continuous: flag("CYCLE").or(fc.dispatch.continuous).unwrap_or(false),
        };

        let server = ServerConfig {
            listen_port: env("LISTEN_PORT")
                .and_then(|s| s.trim().parse().ok())
                .or(fc.server.listen_port),
            concurrent_agent_calls: flag("CONCURRENT_AGENT_CALLS")
                .or(fc.server.concurrent_agent_calls)
                .unwrap_or(false),
            batch_timeout: parsed("BATCH_TIMEOUT")
                .or(fc.server.batch_timeout_secs)
                .map_or(DEFAULT_BATCH_TIMEOUT, Duration::from_secs),
        };

        Self {
            controller,
            collector_name: env("NAME")
                .or(fc.collector.name)
                .unwrap_or_else(|| DEFAULT_COLLECTOR_NAME.to_string()),
            component_name: env("COMPONENT")
                .or(fc.collector.component)
                .unwrap_or_else(|| DEFAULT_COMPONENT_NAME.to_string()),
            dispatch,
            server,
        }
    }

    /// Check the settings are usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first unusable setting
    pub fn validate(&self) -> Result<()> {
        if self.controller.url.trim().is_empty() {
            return Err(Error::Config("controller url is empty".to_string()));
        }
        if self.controller.request_timeout.is_zero() {
            return Err(Error::Config("controller timeout must be positive".to_string()));
        }
        if self.dispatch.pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".to_string()));
        }
        if self.dispatch.call_timeout.is_zero() {
            return Err(Error::Config("call timeout must be positive".to_string()));
        }
        if self.dispatch.cycle_interval.is_some_and(|d| d.is_zero()) {
            return Err(Error::Config("cycle interval must be positive".to_string()));
        }
        if self.server.batch_timeout.is_zero() {
            return Err(Error::Config("batch timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Settings for the periodic dispatcher
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            collector_name: self.collector_name.clone(),
            component_name: self.component_name.clone(),
            descriptor_kind: DESCRIPTOR_KIND.to_string(),
            pool_size: self.dispatch.pool_size,
            call_timeout: self.dispatch.call_timeout,
            cycle_interval: self.dispatch.cycle_interval,
            refresh_interval: self.dispatch.refresh_interval,
            continuous: self.dispatch.continuous,
        }
    }

    /// Settings for the on-demand collector
    #[must_use]
    pub const fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            concurrent: self.server.concurrent_agent_calls,
            pool_size: self.dispatch.pool_size,
            batch_timeout: self.server.batch_timeout,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::resolve(file::CollectorConfigFile::default(), env(&[]));
        assert_eq!(config.controller.url, DEFAULT_CONTROLLER_URL);
        assert_eq!(config.controller.username, "admin");
        assert!(config.controller.password.is_none());
        assert_eq!(config.controller.request_timeout, Duration::from_secs(30));
        assert_eq!(config.collector_name, "localhost");
        assert_eq!(config.dispatch.pool_size, 10);
        assert_eq!(config.dispatch.call_timeout, Duration::from_secs(30));
        assert!(config.dispatch.cycle_interval.is_none());
        assert!(!config.dispatch.continuous);
        assert!(config.server.listen_port.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_file() {
        let fc: file::CollectorConfigFile = toml::from_str(
            r#"
            [dispatch]
            pool_size = 4
            cycle_secs = 60

            [server]
            listen_port = 9090
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            fc,
            env(&[
                ("POOL_SIZE", "16"),
                ("CYCLE", "true"),
                ("CONTROLLER_PASSWORD", "zenoss"),
            ]),
        );

        assert_eq!(config.dispatch.pool_size, 16);
        assert_eq!(config.dispatch.cycle_interval, Some(Duration::from_secs(60)));
        assert!(config.dispatch.continuous);
        assert_eq!(config.server.listen_port, Some(9090));
        assert_eq!(
            config.controller.password.as_ref().map(|p| p.expose_secret().to_string()),
            Some("zenoss".to_string())
        );
        assert!(!format!("{config:?}").contains("zenoss"));
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let config = Config::resolve(file::CollectorConfigFile::default(), env(&[("POOL_SIZE", "0")]));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn load_leaves_validation_to_the_caller() {
        let path = std::env::temp_dir().join(format!(
            "mbean-collector-unvalidated-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[dispatch]\npool_size = 0\n").unwrap();

        let mut config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(config.validate().is_err());

        config.dispatch.pool_size = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn dispatcher_config_carries_overrides() {
        let config = Config::resolve(
            file::CollectorConfigFile::default(),
            env(&[("CYCLE_TIME", "120"), ("REFRESH_MINUTES", "5"), ("NAME", "collector-2")]),
        );
        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.collector_name, "collector-2");
        assert_eq!(dispatcher.cycle_interval, Some(Duration::from_secs(120)));
        assert_eq!(dispatcher.refresh_interval, Some(Duration::from_secs(300)));
        assert_eq!(dispatcher.descriptor_kind, "JMX");
    }
}
