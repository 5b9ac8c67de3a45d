use thiserror::Error;

use crate::queue::StoreError;

#[derive(Error, Debug)]
pub enum MqError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl MqError {
    /// Configuration errors are the caller's to fix; retrying will not help.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, MqError::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, MqError>;
