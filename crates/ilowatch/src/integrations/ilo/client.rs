use async_trait::async_trait;

use super::config::ConnectionParams;
use super::snapshot::Snapshot;

/// Failure of a single call against the controller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Network failure or timeout
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Response did not have the expected shape
    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// The power-control actions a controller accepts.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum PowerAction {
    PowerOn,
    /// Warm boot
    #[strum(to_string = "reboot_server", serialize = "reboot_warm")]
    RebootWarm,
    /// One press of the power button
    ShutdownGraceful,
    /// Press and hold the power button
    ShutdownHard,
}

impl PowerAction {
    pub fn label(&self) -> &'static str {
        match self {
            PowerAction::PowerOn => "Power On",
            PowerAction::RebootWarm => "Reboot (Warm)",
            PowerAction::ShutdownGraceful => "Shutdown (Graceful)",
            PowerAction::ShutdownHard => "Shutdown (Hard - Press & Hold)",
        }
    }
}

/// Remote health client
///
/// Every call opens its own session on the controller and releases it before
/// returning, including when the call fails or its future is dropped.
/// Implementations do not retry.
#[async_trait]
pub trait HealthClient: Send + Sync {
    /// Read a full snapshot of the controller's health telemetry
    async fn fetch(&self) -> Result<Snapshot, ClientError>;

    /// Issue exactly one power-control write
    async fn send_action(&self, action: PowerAction) -> Result<(), ClientError>;
}

/// Builds fresh clients from connection parameters
pub trait Connector: Send + Sync + 'static {
    type Client: HealthClient + 'static;

    fn connect(&self, params: &ConnectionParams) -> Result<Self::Client, ClientError>;
}

#[cfg(test)]
pub use mock::MockClient;
#[cfg(test)]
pub use mock::MockConnector;


#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_power_action_names() {
        let names: Vec<String> = PowerAction::iter().map(|a| a.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "power_on",
                "reboot_server",
                "shutdown_graceful",
                "shutdown_hard"
            ]
        );

        assert_eq!(
            PowerAction::from_str("reboot_server").unwrap(),
            PowerAction::RebootWarm
        );
        assert_eq!(
            PowerAction::from_str("reboot_warm").unwrap(),
            PowerAction::RebootWarm
        );
        assert_eq!(
            PowerAction::from_str("shutdown_hard").unwrap(),
            PowerAction::ShutdownHard
        );
        assert!(PowerAction::from_str("self_destruct").is_err());
    }
}
