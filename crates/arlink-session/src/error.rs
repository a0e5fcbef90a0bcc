use arlink_core::{RegistryError, TransformError};
use arlink_tracking::EngineError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Invalid transform: {0}")]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("AR session worker has shut down")]
    Closed,
}

impl SessionError {
    /// Whether the request failed because a name was already in use
    pub fn is_collision(&self) -> bool {
        matches!(self, SessionError::Registry(RegistryError::NameCollision(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SessionError::Registry(RegistryError::NotFound(_)))
    }
}
