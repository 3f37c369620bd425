mod button;
mod client;
mod config;
mod coordinator;
#[allow(clippy::module_inception)]
mod ilo;
mod redfish;
mod sensor;
mod snapshot;

pub use client::ClientError;
pub use client::Connector;
pub use client::HealthClient;
pub use client::PowerAction;
pub use config::Config as IloConfig;
pub use config::ConnectionParams;
pub use config::Protocol;
pub use coordinator::Cache;
pub use coordinator::CacheState;
pub use coordinator::Coordinator;
pub use ilo::unique_id;
pub use ilo::IloIntegration;
pub use ilo::MANUFACTURER;
use linkme::distributed_slice;
pub use redfish::RedfishClient;
pub use redfish::RedfishConnector;
pub use sensor::Measurement;
pub use snapshot::PowerStatus;
pub use snapshot::Snapshot;
use tracing::info;

use crate::engine;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_ilo(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let mut integrations: Vec<Box<dyn engine::Integration>> = Vec::new();

    for (name, ilo_config) in &ctx.config.integrations.ilo {
        if !ilo_config.enabled {
            info!("[{}] iLO instance disabled, skipping", name);
            continue;
        }
        info!("[{}] Initializing iLO integration for {}", name, ilo_config.host);
        integrations.push(Box::new(IloIntegration::new(
            name.clone(),
            ilo_config.clone(),
            RedfishConnector,
        )));
    }

    Ok(integrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_factory_skips_disabled_instances() {
        let config = Config::parse(
            r#"
            [integrations.ilo.rack1]
            host = "10.0.0.5"
            username = "admin"
            password = "secret"

            [integrations.ilo.rack2]
            host = "10.0.0.6"
            username = "admin"
            password = "secret"
            enabled = false
            "#,
        )
        .unwrap();

        let integrations = init_ilo(&engine::IntegrationContext { config: &config }).unwrap();
        let names: Vec<&str> = integrations.iter().map(|i| i.name()).collect();
        assert_eq!(names, vec!["rack1"]);
    }

    #[test]
    fn test_factory_is_registered() {
        assert!(!engine::INTEGRATION_REGISTRY.is_empty());
    }
}
