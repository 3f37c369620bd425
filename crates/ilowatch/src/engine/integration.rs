use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::error::SetupError;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;

/// Channel types for messages FROM integrations TO the engine
/// These are bounded channels to provide backpressure
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Channel types for messages FROM the engine TO integrations (unbounded - engine must not block)
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Vec<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// Backoff applied when an integration reports `SetupError::NotReady`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Set up the integration: validate connectivity, register its device and entities.
    ///
    /// The integration receives a sender to report events back to the engine.
    /// `NotReady` makes the engine call `setup` again later; other errors are final.
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), SetupError>;

    /// Handle a command from the engine
    ///
    /// Commands carry their own reply channel; an `Err` here is an internal failure.
    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_doubles_up_to_max() {
        let policy = RetryPolicy {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(60),
        };
        let d = policy.next_delay(policy.initial);
        assert_eq!(d, Duration::from_secs(20));
        let d = policy.next_delay(d);
        assert_eq!(d, Duration::from_secs(40));
        let d = policy.next_delay(d);
        assert_eq!(d, Duration::from_secs(60));
        assert_eq!(policy.next_delay(d), Duration::from_secs(60));
    }
}
