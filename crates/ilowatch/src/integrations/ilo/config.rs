use std::fmt;
use std::time::Duration;

use serde::Deserialize;

fn default_port() -> u16 {
    443
}

fn default_scan_interval() -> u64 {
    30
}

fn default_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Transport protocol used to reach the controller
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

/// Configuration for one iLO controller instance
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Controller hostname or IP address
    pub host: String,

    /// Controller port (default: 443)
    #[serde(default = "default_port")]
    pub port: u16,

    /// http or https (default: https)
    #[serde(default)]
    pub protocol: Protocol,

    pub username: String,

    pub password: String,

    /// Display name for the device; defaults to the instance key
    #[serde(default)]
    pub name: Option<String>,

    /// Seconds between polls (default: 30)
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,

    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Verify the controller's TLS certificate. Off by default since
    /// controllers ship with self-signed certificates.
    #[serde(default)]
    pub verify_tls: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("scan_interval", &self.scan_interval)
            .field("timeout", &self.timeout)
            .field("verify_tls", &self.verify_tls)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Config {
    /// Check the fields serde cannot. Returns the offending field and a message.
    pub fn validate(&self) -> Result<(), (&'static str, String)> {
        if self.host.trim().is_empty() {
            return Err(("host", "must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(("port", "must be between 1 and 65535".to_string()));
        }
        if self.username.is_empty() {
            return Err(("username", "must not be empty".to_string()));
        }
        if self.scan_interval == 0 {
            return Err(("scan_interval", "must be at least 1 second".to_string()));
        }
        if self.timeout == 0 {
            return Err(("timeout", "must be at least 1 second".to_string()));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.trim().to_string(),
            port: self.port,
            protocol: self.protocol,
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout),
            verify_tls: self.verify_tls,
        }
    }
}

/// Everything needed to open a session on a controller.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub verify_tls: bool,
}

impl ConnectionParams {
    /// e.g. `https://10.0.0.5:443`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("verify_tls", &self.verify_tls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str(
            r#"
            host = "10.0.0.5"
            username = "Administrator"
            password = "hunter2"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 443);
        assert_eq!(config.protocol, Protocol::Https);
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert!(config.enabled);
        assert!(!config.verify_tls);
        assert!(config.validate().is_ok());

        let params = config.connection_params();
        assert_eq!(params.base_url(), "https://10.0.0.5:443");
        assert_eq!(params.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_password_is_redacted() {
        let config: Config = toml::from_str(
            r#"
            host = "ilo.example"
            protocol = "http"
            port = 8080
            username = "admin"
            password = "hunter2"
            "#,
        )
        .unwrap();

        assert!(!format!("{:?}", config).contains("hunter2"));
        let params = config.connection_params();
        assert!(!format!("{:?}", params).contains("hunter2"));
        assert_eq!(params.base_url(), "http://ilo.example:8080");
    }

    #[test]
    fn test_validation() {
        let mut config: Config = toml::from_str(
            r#"
            host = " "
            username = "admin"
            password = ""
            "#,
        )
        .unwrap();
        assert_eq!(config.validate().unwrap_err().0, "host");

        config.host = "ilo".to_string();
        config.scan_interval = 0;
        assert_eq!(config.validate().unwrap_err().0, "scan_interval");
    }
}
