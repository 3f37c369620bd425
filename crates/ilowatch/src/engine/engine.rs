use std::collections::BTreeMap;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::RwLock;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::device::Device;
use super::entity::Entity;
use super::error::ActionError;
use super::error::CommandError;
use super::error::SetupError;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::RetryPolicy;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::State;

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// How long an integration gets to finish its shutdown before it is aborted
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct RegisteredEntity {
    entity: Arc<dyn Entity>,
    integration_name: String,
}

struct RegisteredDevice {
    device: Device,
    integration_name: String,
}

/// ilowatch engine
///
/// This structure handles the flow of events from integrations, routes commands to the
/// integration owning an entity, and maintains a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Registered entities keyed by entity_id
    entities: RwLock<BTreeMap<String, RegisteredEntity>>,

    /// Registered devices keyed by their unique id
    devices: StdMutex<BTreeMap<String, RegisteredDevice>>,

    /// Communication channels to integrations (for commands)
    integration_channels: StdMutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: StdMutex<Vec<JoinHandle<()>>>,

    retry: RetryPolicy,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::default())
    }

    pub fn with_retry_policy(retry: RetryPolicy) -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entities: RwLock::new(BTreeMap::new()),
            devices: StdMutex::new(BTreeMap::new()),
            integration_channels: StdMutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: StdMutex::new(Vec::new()),
            retry,
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every registered integration factory against the config and registers
    /// the instances they produce.
    pub fn register_integrations_from_config(&self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integrations = match constr(&ctx) {
                Ok(i) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
            };
            for integration in integrations {
                self.register_integration(integration);
            }
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process. Setup is retried with backoff while the
    /// integration reports `NotReady`; commands arriving during the backoff are
    /// answered with `ActionError::NotReady` and never replayed later.
    pub fn register_integration(&self, mut integration: Box<dyn Integration>) {
        let name = integration.name().to_string();
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();
        let retry = self.retry;

        lock(&self.integration_channels).insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            let mut delay = retry.initial;
            loop {
                match integration.setup(from_integration_tx.clone()).await {
                    Ok(()) => break,
                    Err(SetupError::NotReady(reason)) => {
                        warn!(
                            "Integration '{}' not ready ({}), retrying in {:?}",
                            name, reason, delay
                        );
                        let backoff = tokio::time::sleep(delay);
                        tokio::pin!(backoff);
                        loop {
                            tokio::select! {
                                _ = &mut backoff => break,
                                msg = to_integration_rx.recv() => match msg {
                                    Some(msg) => {
                                        msg.reject(ActionError::NotReady(name.clone()));
                                    }
                                    None => {
                                        info!(
                                            "Integration '{}' stopped before setup finished",
                                            name
                                        );
                                        return;
                                    }
                                },
                            }
                        }
                        delay = retry.next_delay(delay);
                    }
                    Err(e) => {
                        error!("Integration '{}' setup failed: {}", name, e);
                        return;
                    }
                }
            }
            info!("Integration '{}' set up", name);

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if msg.is_abandoned() {
                    debug!("Integration '{}' skipping command nobody waits for", name);
                    continue;
                }
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        lock(&self.integration_handles).push(handle);
    }

    /// Send a command to the named integration
    fn send_command(
        &self,
        integration_name: &str,
        msg: ToIntegrationMessage,
    ) -> Result<(), CommandError> {
        let channels = lock(&self.integration_channels);
        let tx = channels
            .get(integration_name)
            .ok_or_else(|| CommandError::UnknownInstance(integration_name.to_string()))?;
        tx.send(msg)
            .map_err(|_| CommandError::IntegrationGone(integration_name.to_string()))
    }

    /// Press a button entity and wait for the owning integration to report the outcome.
    pub async fn press(&self, entity_id: &str) -> Result<(), CommandError> {
        let integration_name = {
            let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
            entities
                .get(entity_id)
                .map(|r| r.integration_name.clone())
                .ok_or_else(|| CommandError::UnknownEntity(entity_id.to_string()))?
        };

        let (reply, rx) = oneshot::channel();
        self.send_command(
            &integration_name,
            ToIntegrationMessage::PressButton {
                entity_id: entity_id.to_string(),
                reply,
            },
        )?;
        rx.await
            .map_err(|_| CommandError::IntegrationGone(integration_name))??;
        Ok(())
    }

    /// Invoke a named service on an integration instance and wait for its outcome.
    pub async fn call_service(&self, instance: &str, service: &str) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(
            instance,
            ToIntegrationMessage::CallService {
                service: service.to_string(),
                reply,
            },
        )?;
        rx.await
            .map_err(|_| CommandError::IntegrationGone(instance.to_string()))??;
        Ok(())
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Stop all integrations: close their command channels and wait for them to exit.
    pub async fn shutdown(&self) {
        lock(&self.integration_channels).clear();
        let handles = std::mem::take(&mut *lock(&self.integration_handles));

        for handle in handles {
            let abort = handle.abort_handle();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await.is_err() {
                warn!("Integration task did not stop in {:?}, aborting", SHUTDOWN_TIMEOUT);
                abort.abort();
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// All registered devices.
    pub fn devices(&self) -> Vec<Device> {
        lock(&self.devices)
            .values()
            .map(|r| r.device.clone())
            .collect()
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::DeviceRegistered {
                device,
                integration_name,
                reply,
            } => {
                let accepted = {
                    let mut devices = lock(&self.devices);
                    match devices.get(&device.id) {
                        Some(existing) if existing.integration_name != integration_name => false,
                        _ => {
                            info!(
                                "Device registered: {} ({}) from {}",
                                device.name, device.id, integration_name
                            );
                            devices.insert(
                                device.id.clone(),
                                RegisteredDevice {
                                    device,
                                    integration_name: integration_name.clone(),
                                },
                            );
                            true
                        }
                    }
                };
                if !accepted {
                    warn!(
                        "Integration '{}' tried to register a device that is already configured",
                        integration_name
                    );
                }
                // The integration may have given up waiting; nothing to do then.
                let _ = reply.send(accepted);
            }
            FromIntegrationMessage::EntityDiscovered {
                entity,
                integration_name,
            } => {
                let entity_id = entity.entity_id().to_string();
                let owner = self
                    .entities
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&entity_id)
                    .map(|r| r.integration_name.clone());
                if let Some(owner) = owner.filter(|o| *o != integration_name) {
                    warn!(
                        "Ignoring entity {} from {}: already provided by {}",
                        entity_id, integration_name, owner
                    );
                    return;
                }
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                {
                    let mut devices = lock(&self.devices);
                    if let Some(r) = devices
                        .values_mut()
                        .find(|r| r.integration_name == integration_name)
                    {
                        r.device.add_entity(entity_id.clone());
                    }
                }

                self.entities
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(
                        entity_id,
                        RegisteredEntity {
                            entity,
                            integration_name: integration_name.clone(),
                        },
                    );
                self.refresh_states(&integration_name);
            }
            FromIntegrationMessage::EntitiesUpdated { integration_name } => {
                self.refresh_states(&integration_name);
            }
            FromIntegrationMessage::IntegrationRemoved { integration_name } => {
                info!("Integration removed: {}", integration_name);

                let removed: Vec<String> = {
                    let mut entities = self.entities.write().unwrap_or_else(|e| e.into_inner());
                    let ids: Vec<String> = entities
                        .iter()
                        .filter(|(_, r)| r.integration_name == integration_name)
                        .map(|(id, _)| id.clone())
                        .collect();
                    for id in &ids {
                        entities.remove(id);
                    }
                    ids
                };
                lock(&self.devices).retain(|_, r| r.integration_name != integration_name);

                let mut state = State::clone(&self.state.load());
                for id in &removed {
                    state.entities.remove(id);
                }
                self.state.store(Arc::new(state));
            }
        }
    }

    /// Recompute the state of every entity owned by `integration_name` and publish
    /// a new State.
    fn refresh_states(&self, integration_name: &str) {
        let entities = self.entities.read().unwrap_or_else(|e| e.into_inner());
        let mut state = State::clone(&self.state.load());

        for (entity_id, r) in entities
            .iter()
            .filter(|(_, r)| r.integration_name == integration_name)
        {
            let new_state = r.entity.state();
            if state.entities.get(entity_id) != Some(&new_state) {
                debug!(
                    "Entity state changed: {} -> {:?} (stale: {})",
                    entity_id, new_state.value, new_state.stale
                );
                state.entities.insert(entity_id.clone(), new_state);
            }
        }

        self.state.store(Arc::new(state));
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(m: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
