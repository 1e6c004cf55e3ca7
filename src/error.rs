//! Error types for the pool orchestrator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("pool '{0}' does not exist; use --force with --location=<region> to create it")]
    PoolNotFound(String),

    #[error("pool '{0}' has no VMs; use 'create-pool' to create a new pool")]
    PoolEmpty(String),

    #[error("pool '{0}' already contains VMs; use 'delete-pool' before creating a new pool")]
    PoolAlreadyPopulated(String),

    #[error("VM name '{name}' does not match pool '{pool}'")]
    MalformedName { pool: String, name: String },

    #[error("control plane call failed: {0}")]
    Cloud(String),

    #[error("not authenticated with the control plane: {0}")]
    Auth(String),

    #[error("remote transport error: {0}")]
    Transport(String),

    #[error("secret distribution error: {0}")]
    Secrets(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation cancelled by user")]
    Aborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a failed precondition rather than a failed
    /// operation, i.e. it was raised before any side effect.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::PoolNotFound(_)
                | Error::PoolEmpty(_)
                | Error::PoolAlreadyPopulated(_)
                | Error::MalformedName { .. }
                | Error::Config(_)
        )
    }
}
