//! Polling cache for one controller.
//!
//! The coordinator fetches a snapshot on a fixed interval and publishes the
//! result into a `Cache`. Fetches are serialised: at most one is in flight per
//! controller, whether it comes from the timer or from an explicit refresh.

use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::client::ClientError;
use super::client::HealthClient;
use super::snapshot::Snapshot;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::SetupError;

/// What readers observe: the last good snapshot plus the outcome of the last poll.
#[derive(Debug, Clone, Default)]
pub struct CacheState {
    /// `None` until the first successful fetch
    pub snapshot: Option<Arc<Snapshot>>,
    /// Set by a failed fetch, cleared by the next successful one
    pub last_error: Option<ClientError>,
    /// Time of the last successful fetch
    pub last_update: Option<SystemTime>,
}

impl CacheState {
    pub fn is_stale(&self) -> bool {
        self.last_error.is_some()
    }
}

/// Shared, read-mostly view of the latest poll result.
///
/// The whole `CacheState` is swapped at once, so a reader never sees fields
/// from two different polls.
#[derive(Debug, Default)]
pub struct Cache {
    state: ArcSwap<CacheState>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<CacheState> {
        self.state.load_full()
    }

    fn publish_success(&self, snapshot: Snapshot) {
        self.state.store(Arc::new(CacheState {
            snapshot: Some(Arc::new(snapshot)),
            last_error: None,
            last_update: Some(SystemTime::now()),
        }));
    }

    fn publish_failure(&self, err: ClientError) {
        // Single writer (the fetch lock is held), so load-then-store does not race.
        let previous = self.state.load();
        self.state.store(Arc::new(CacheState {
            snapshot: previous.snapshot.clone(),
            last_error: Some(err),
            last_update: previous.last_update,
        }));
    }
}

pub struct Coordinator<C: HealthClient> {
    name: String,
    client: C,
    interval: Duration,
    cache: Arc<Cache>,
    fetch_lock: Mutex<()>,
}

impl<C: HealthClient> Coordinator<C> {
    pub fn new(name: String, client: C, interval: Duration) -> Self {
        Self {
            name,
            client,
            interval,
            cache: Arc::new(Cache::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn cache(&self) -> Arc<Cache> {
        self.cache.clone()
    }

    /// Fetch once and publish the outcome. Waits for any fetch already in flight.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let _guard = self.fetch_lock.lock().await;

        match self.client.fetch().await {
            Ok(snapshot) => {
                self.cache.publish_success(snapshot);
                Ok(())
            }
            Err(e) => {
                self.cache.publish_failure(e.clone());
                Err(e)
            }
        }
    }

    /// The fetch that gates setup. Any failure here is fatal to setup.
    pub async fn first_refresh(&self) -> Result<(), SetupError> {
        self.refresh().await.map_err(|e| match e {
            ClientError::Auth(msg) => SetupError::AuthFailed(msg),
            other => SetupError::NotReady(other.to_string()),
        })
    }

    /// Poll forever, telling the engine after every tick. Returns once the
    /// engine stops listening.
    pub async fn run(&self, to_engine: FromIntegrationSender) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        // A slow fetch pushes the schedule back rather than causing a burst.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("[{}] Polling every {:?}", self.name, self.interval);
        loop {
            ticker.tick().await;

            match self.refresh().await {
                Ok(()) => debug!("[{}] Refreshed health snapshot", self.name),
                Err(ClientError::Auth(msg)) => error!(
                    "[{}] Authentication failed, reconfigure required: {}",
                    self.name, msg
                ),
                Err(ClientError::Protocol(msg)) => warn!(
                    "[{}] Discarding malformed poll result: {}",
                    self.name, msg
                ),
                Err(e) => warn!("[{}] Poll failed, keeping last data: {}", self.name, e),
            }

            let msg = FromIntegrationMessage::EntitiesUpdated {
                integration_name: self.name.clone(),
            };
            if to_engine.send(msg).await.is_err() {
                debug!("[{}] Engine gone, stopping poller", self.name);
                return;
            }
        }
    }
}
