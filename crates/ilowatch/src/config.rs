//! Configuration file parsing and structures.
//!
//! ilowatch reads a single TOML file: logging, the HTTP API, and one
//! `[integrations.ilo.<instance>]` table per controller.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::integrations::ilo::IloConfig;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"ilowatch::integrations::ilo" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Filter for the tracing subscriber
    pub fn filter(&self) -> Targets {
        self.overrides
            .iter()
            .fold(Targets::new().with_default(self.level), |t, (target, level)| {
                t.with_target(target.clone(), *level)
            })
    }
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8565
}

fn default_true() -> bool {
    true
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_listen(),
            port: default_api_port(),
        }
    }
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    /// iLO controllers. Key = instance name, used as the entity id prefix.
    #[serde(default)]
    pub ilo: BTreeMap<String, IloConfig>,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.enabled && self.api.port == 0 {
            return Err(ConfigError::Invalid {
                section: "api".to_string(),
                field: "port",
                message: "must be between 1 and 65535".to_string(),
            });
        }

        for (name, ilo) in &self.integrations.ilo {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    section: "integrations.ilo".to_string(),
                    field: "name",
                    message: "instance name must not be empty".to_string(),
                });
            }
            ilo.validate()
                .map_err(|(field, message)| ConfigError::Invalid {
                    section: format!("integrations.ilo.{}", name),
                    field,
                    message,
                })?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid [{section}] {field}: {message}")]
    Invalid {
        section: String,
        field: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::ilo::Protocol;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.api.enabled);
        assert_eq!(config.api.listen, "127.0.0.1");
        assert_eq!(config.api.port, 8565);
        assert!(config.integrations.ilo.is_empty());
    }

    #[test]
    fn test_parse_ilo_instances() {
        let toml = r#"
            [logging]
            level = "debug"

            [logging.overrides]
            "ilowatch::integrations::ilo" = "trace"

            [api]
            listen = "0.0.0.0"
            port = 9000

            [integrations.ilo.rack1]
            host = "10.0.0.5"
            username = "Administrator"
            password = "hunter2"
            name = "Rack 1"

            [integrations.ilo.lab]
            host = "ilo-lab.local"
            port = 8443
            protocol = "http"
            username = "admin"
            password = "secret"
            scan_interval = 60
            enabled = false
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(
            config.logging.overrides["ilowatch::integrations::ilo"],
            LogLevel::Trace
        );
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.integrations.ilo.len(), 2);

        let rack1 = &config.integrations.ilo["rack1"];
        assert_eq!(rack1.port, 443);
        assert_eq!(rack1.protocol, Protocol::Https);
        assert_eq!(rack1.name.as_deref(), Some("Rack 1"));

        let lab = &config.integrations.ilo["lab"];
        assert_eq!(lab.protocol, Protocol::Http);
        assert_eq!(lab.scan_interval, 60);
        assert!(!lab.enabled);
    }

    #[test]
    fn test_invalid_instance_names_field() {
        let toml = r#"
            [integrations.ilo.rack1]
            host = "10.0.0.5"
            username = ""
            password = "hunter2"
        "#;

        match Config::parse(toml).unwrap_err() {
            ConfigError::Invalid { section, field, .. } => {
                assert_eq!(section, "integrations.ilo.rack1");
                assert_eq!(field, "username");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_missing_required_field_is_parse_error() {
        let toml = r#"
            [integrations.ilo.rack1]
            host = "10.0.0.5"
        "#;
        assert!(matches!(
            Config::parse(toml).unwrap_err(),
            ConfigError::Parse(_)
        ));
    }

    #[test]
    fn test_log_filter_applies_overrides() {
        let mut logging = LoggingConfig {
            level: LogLevel::Warn,
            overrides: HashMap::new(),
        };
        logging
            .overrides
            .insert("ilowatch::api".to_string(), LogLevel::Debug);

        let filter = logging.filter();
        assert!(filter.would_enable("ilowatch::api", &tracing::Level::DEBUG));
        assert!(!filter.would_enable("ilowatch::engine", &tracing::Level::INFO));
        assert!(filter.would_enable("ilowatch::engine", &tracing::Level::WARN));
    }
}
