//! Power-control buttons.
//!
//! Pressing a button bypasses the polling cache entirely: it opens its own
//! session, issues one write and closes the session again.

use std::sync::Arc;

use serde_json::Map;
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::error;
use tracing::info;

use super::client::Connector;
use super::client::HealthClient;
use super::client::PowerAction;
use super::config::ConnectionParams;
use crate::engine::ActionError;
use crate::engine::Entity;
use crate::engine::EntityState;
use crate::engine::Platform;

pub struct IloButton {
    entity_id: String,
    name: String,
    action: PowerAction,
}

impl IloButton {
    pub fn new(device_slug: &str, device_name: &str, action: PowerAction) -> Self {
        Self {
            entity_id: format!("button.{}_{}", device_slug, action),
            name: format!("{} {}", device_name, action.label()),
            action,
        }
    }

    pub fn action(&self) -> PowerAction {
        self.action
    }
}

impl Entity for IloButton {
    fn entity_id(&self) -> &str {
        &self.entity_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::Button
    }

    fn state(&self) -> EntityState {
        let mut attributes = Map::new();
        attributes.insert("action".to_string(), Value::from(self.action.to_string()));

        EntityState {
            entity_id: self.entity_id.clone(),
            name: self.name.clone(),
            platform: Platform::Button,
            value: None,
            unit: None,
            stale: false,
            attributes,
        }
    }
}

/// One button per power action
pub fn buttons(device_slug: &str, device_name: &str) -> Vec<Arc<IloButton>> {
    PowerAction::iter()
        .map(|action| Arc::new(IloButton::new(device_slug, device_name, action)))
        .collect()
}

/// Run one power action against the controller with a client of its own.
pub async fn perform<K: Connector>(
    name: &str,
    connector: &K,
    params: &ConnectionParams,
    action: PowerAction,
) -> Result<(), ActionError> {
    info!("[{}] Sending power action {}", name, action);

    let result = match connector.connect(params) {
        Ok(client) => client.send_action(action).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!("[{}] Power action {} accepted", name, action);
            Ok(())
        }
        Err(e) => {
            error!("[{}] Power action {} failed: {}", name, action, e);
            Err(ActionError::Failed(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::integrations::ilo::client::ClientError;
    use crate::integrations::ilo::client::MockConnector;
    use crate::integrations::ilo::config::Protocol;

    fn params() -> ConnectionParams {
        ConnectionParams {
            host: "10.0.0.5".to_string(),
            port: 443,
            protocol: Protocol::Https,
            username: "admin".to_string(),
            password: "secret".to_string(),
            timeout: Duration::from_secs(30),
            verify_tls: false,
        }
    }

    #[test]
    fn test_buttons_cover_every_action() {
        let ids: Vec<String> = buttons("rack1", "Rack 1")
            .iter()
            .map(|b| b.entity_id().to_string())
            .collect();
        assert_eq!(
            ids,
            vec![
                "button.rack1_power_on",
                "button.rack1_reboot_server",
                "button.rack1_shutdown_graceful",
                "button.rack1_shutdown_hard",
            ]
        );
    }

    #[tokio::test]
    async fn test_perform_issues_exactly_one_write() {
        let connector = MockConnector::default();

        perform("rack1", &connector, &params(), PowerAction::ShutdownHard)
            .await
            .unwrap();

        assert_eq!(connector.client.actions(), vec![PowerAction::ShutdownHard]);
        assert_eq!(connector.client.connects(), 1);
        assert_eq!(connector.client.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn test_perform_reports_failure() {
        let connector = MockConnector::default();
        connector
            .client
            .fail_actions(ClientError::Unreachable("connection refused".to_string()));

        let err = perform("rack1", &connector, &params(), PowerAction::PowerOn)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ActionError::Failed("controller unreachable: connection refused".to_string())
        );
        assert_eq!(connector.client.actions().len(), 1);
    }
}
