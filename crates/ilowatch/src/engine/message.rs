//! Type-safe message system for ilowatch
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use std::sync::Arc;

use tokio::sync::oneshot;

use super::device::Device;
use super::entity::Entity;
use super::error::ActionError;

/// Reply channel for commands that must report their outcome to the caller.
pub type ActionReply = oneshot::Sender<Result<(), ActionError>>;

/// Messages FROM integrations TO the engine (events/state updates)
pub enum FromIntegrationMessage {
    /// A device wants to be registered. The engine answers `false` when a device
    /// with the same id is already owned by another integration.
    DeviceRegistered {
        device: Device,
        integration_name: String,
        reply: oneshot::Sender<bool>,
    },

    /// An entity was discovered and registered
    EntityDiscovered {
        entity: Arc<dyn Entity>,
        integration_name: String,
    },

    /// The data behind an integration's entities changed (or went stale)
    EntitiesUpdated { integration_name: String },

    /// An integration went away together with its device and entities
    IntegrationRemoved { integration_name: String },
}

impl std::fmt::Debug for FromIntegrationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FromIntegrationMessage::DeviceRegistered {
                device,
                integration_name,
                ..
            } => f
                .debug_struct("DeviceRegistered")
                .field("device", &device.id)
                .field("integration_name", integration_name)
                .finish_non_exhaustive(),
            FromIntegrationMessage::EntityDiscovered {
                entity,
                integration_name,
            } => f
                .debug_struct("EntityDiscovered")
                .field("entity_id", &entity.entity_id())
                .field("integration_name", integration_name)
                .finish(),
            FromIntegrationMessage::EntitiesUpdated { integration_name } => f
                .debug_struct("EntitiesUpdated")
                .field("integration_name", integration_name)
                .finish(),
            FromIntegrationMessage::IntegrationRemoved { integration_name } => f
                .debug_struct("IntegrationRemoved")
                .field("integration_name", integration_name)
                .finish(),
        }
    }
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// A button entity owned by the integration was pressed
    PressButton {
        entity_id: String,
        reply: ActionReply,
    },

    /// A named service was invoked on the integration instance
    CallService { service: String, reply: ActionReply },
}

impl ToIntegrationMessage {
    fn reply(&self) -> &ActionReply {
        match self {
            ToIntegrationMessage::PressButton { reply, .. }
            | ToIntegrationMessage::CallService { reply, .. } => reply,
        }
    }

    /// True once the caller stopped waiting for the outcome.
    pub fn is_abandoned(&self) -> bool {
        self.reply().is_closed()
    }

    /// Answer the command with `err` without running it.
    pub fn reject(self, err: ActionError) {
        let reply = match self {
            ToIntegrationMessage::PressButton { reply, .. }
            | ToIntegrationMessage::CallService { reply, .. } => reply,
        };
        let _ = reply.send(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reject_answers_caller() {
        let (reply, rx) = oneshot::channel();
        let msg = ToIntegrationMessage::CallService {
            service: "power_on".to_string(),
            reply,
        };
        assert!(!msg.is_abandoned());

        msg.reject(ActionError::NotReady("rack1".to_string()));
        assert_eq!(
            rx.await.unwrap(),
            Err(ActionError::NotReady("rack1".to_string()))
        );
    }

    #[test]
    fn test_dropped_receiver_abandons_command() {
        let (reply, rx) = oneshot::channel();
        let msg = ToIntegrationMessage::PressButton {
            entity_id: "button.rack1_shutdown_hard".to_string(),
            reply,
        };
        drop(rx);
        assert!(msg.is_abandoned());
    }
}
