/// Why an integration could not be set up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    /// Transient; the engine retries setup later.
    #[error("not ready: {0}")]
    NotReady(String),

    /// Credentials were rejected; the integration must be reconfigured.
    #[error("authentication failed, reconfigure required: {0}")]
    AuthFailed(String),

    #[error("device {0} is already configured")]
    AlreadyConfigured(String),
}

/// Failure of a user-invoked action, reported back to whoever invoked it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("entity {0} cannot be pressed")]
    NotPressable(String),

    /// The integration has not finished setting up; nothing was sent.
    #[error("integration {0} is not ready")]
    NotReady(String),
}

/// Failure to route a command through the engine.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("no entity named {0}")]
    UnknownEntity(String),

    #[error("no integration instance named {0}")]
    UnknownInstance(String),

    #[error("integration {0} is not running")]
    IntegrationGone(String),

    #[error(transparent)]
    Action(#[from] ActionError),
}
