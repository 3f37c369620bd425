use std::collections::HashMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::button;
use super::client::Connector;
use super::client::PowerAction;
use super::coordinator::Coordinator;
use super::sensor;
use super::IloConfig;
use crate::engine::slugify;
use crate::engine::ActionError;
use crate::engine::ActionReply;
use crate::engine::Device;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::SetupError;
use crate::engine::ToIntegrationMessage;

pub const MANUFACTURER: &str = "Hewlett Packard Enterprise";

/// Stable device id: the server serial when the controller reports one,
/// otherwise the address it was configured with.
pub fn unique_id(serial: Option<&str>, host: &str, port: u16) -> String {
    match serial.map(str::trim).filter(|s| !s.is_empty()) {
        Some(serial) => format!("hp_ilo_{}", serial),
        None => format!("hp_ilo_{}_{}", host, port),
    }
}

/// One configured iLO controller
///
/// Owns the polling cache for the controller and answers button presses and
/// service calls with a fresh client per action.
pub struct IloIntegration<K: Connector> {
    name: String,
    config: IloConfig,
    connector: K,
    coordinator: Option<Arc<Coordinator<K::Client>>>,
    /// Button entity id to the action it triggers
    buttons: HashMap<String, PowerAction>,
    to_engine: Option<FromIntegrationSender>,
    poll_task: Option<JoinHandle<()>>,
}

impl<K: Connector> IloIntegration<K> {
    pub fn new(name: String, config: IloConfig, connector: K) -> Self {
        Self {
            name,
            config,
            connector,
            coordinator: None,
            buttons: HashMap::new(),
            to_engine: None,
            poll_task: None,
        }
    }

    fn device_name(&self) -> String {
        self.config
            .name
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }

    async fn send(
        &self,
        tx: &FromIntegrationSender,
        msg: FromIntegrationMessage,
    ) -> Result<(), SetupError> {
        tx.send(msg)
            .await
            .map_err(|_| SetupError::NotReady("engine is not accepting events".to_string()))
    }

    async fn run_action(&self, action: PowerAction, reply: ActionReply) {
        if reply.is_closed() {
            warn!("[{}] Dropping {}: caller no longer waiting", self.name, action);
            return;
        }
        let params = self.config.connection_params();
        let result = button::perform(&self.name, &self.connector, &params, action).await;
        if reply.send(result).is_err() {
            debug!("[{}] Caller went away before {} finished", self.name, action);
        }
    }
}

#[async_trait]
impl<K: Connector> Integration for IloIntegration<K> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), SetupError> {
        let params = self.config.connection_params();
        info!("[{}] Connecting to iLO at {}", self.name, params.base_url());

        let client = self
            .connector
            .connect(&params)
            .map_err(|e| SetupError::NotReady(e.to_string()))?;
        let coordinator = Arc::new(Coordinator::new(
            self.name.clone(),
            client,
            self.config.scan_interval(),
        ));
        coordinator.first_refresh().await?;

        let cache = coordinator.cache();
        let state = cache.load();
        let snapshot = state
            .snapshot
            .as_deref()
            .ok_or_else(|| SetupError::NotReady("no data after first refresh".to_string()))?;

        let id = unique_id(snapshot.serial_number.as_deref(), &params.host, params.port);
        let device_name = self.device_name();
        let mut device =
            Device::new(id.clone(), device_name.clone()).with_identifier("hp_ilo", id.clone());
        device.manufacturer = Some(MANUFACTURER.to_string());
        device.model = snapshot.model.clone();
        device.firmware_version = snapshot.firmware_version.clone();
        device.configuration_url = Some(params.base_url());

        let (reply, accepted) = oneshot::channel();
        self.send(
            &tx,
            FromIntegrationMessage::DeviceRegistered {
                device,
                integration_name: self.name.clone(),
                reply,
            },
        )
        .await?;
        if !accepted.await.unwrap_or(false) {
            return Err(SetupError::AlreadyConfigured(id));
        }

        let slug = slugify(&self.name);
        let mut entities = sensor::discover(&slug, &device_name, snapshot, &cache);
        self.buttons.clear();
        for b in button::buttons(&slug, &device_name) {
            self.buttons.insert(b.entity_id().to_string(), b.action());
            entities.push(b as Arc<dyn Entity>);
        }

        info!(
            "[{}] Registering {} entities for device {}",
            self.name,
            entities.len(),
            id
        );
        for entity in entities {
            self.send(
                &tx,
                FromIntegrationMessage::EntityDiscovered {
                    entity,
                    integration_name: self.name.clone(),
                },
            )
            .await?;
        }

        let poller = coordinator.clone();
        let poll_tx = tx.clone();
        self.poll_task = Some(tokio::spawn(async move { poller.run(poll_tx).await }));
        self.coordinator = Some(coordinator);
        self.to_engine = Some(tx);

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::PressButton { entity_id, reply } => {
                match self.buttons.get(&entity_id).copied() {
                    Some(action) => self.run_action(action, reply).await,
                    None => {
                        warn!("[{}] {} is not a button", self.name, entity_id);
                        let _ = reply.send(Err(ActionError::NotPressable(entity_id)));
                    }
                }
            }
            ToIntegrationMessage::CallService { service, reply } => {
                match PowerAction::from_str(&service) {
                    Ok(action) => self.run_action(action, reply).await,
                    Err(_) => {
                        warn!("[{}] Unknown service {}", self.name, service);
                        let _ = reply.send(Err(ActionError::UnknownService(service)));
                    }
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("[{}] Shutting down iLO integration", self.name);

        if let Some(handle) = self.poll_task.take() {
            handle.abort();
            match handle.await {
                Ok(()) => debug!("[{}] Poller stopped", self.name),
                Err(e) if e.is_cancelled() => debug!("[{}] Poller cancelled", self.name),
                Err(e) => warn!("[{}] Poller task error: {}", self.name, e),
            }
        }
        self.coordinator = None;

        if let Some(tx) = self.to_engine.take() {
            let msg = FromIntegrationMessage::IntegrationRemoved {
                integration_name: self.name.clone(),
            };
            if tx.send(msg).await.is_err() {
                debug!("[{}] Engine already stopped", self.name);
            }
        }

        Ok(())
    }
}
