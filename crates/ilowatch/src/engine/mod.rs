mod device;
#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod error;
mod integration;
mod message;
pub mod state;

pub use device::Device;
pub use engine::Engine;
pub use entity::slugify;
pub use entity::Entity;
pub use error::ActionError;
pub use error::CommandError;
pub use error::SetupError;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::RetryPolicy;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::ActionReply;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::EntityState;
pub use state::Platform;
pub use state::State;
pub use state::StateValue;
