//! Error types and handling.

use thiserror::Error;

use crate::config::ConfigError;
use crate::varian::PumpError;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Pump protocol failure
    #[error("Pump error: {0}")]
    Pump(#[from] PumpError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// TCP bridge could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection attempt timed out
    #[error("Connection timeout: {0}")]
    ConnectTimeout(String),

    /// File or socket I/O error outside the protocol
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging could not be set up
    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Create a connection error with message
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// True if reconnecting may help.
    pub fn is_link_failure(&self) -> bool {
        match self {
            AppError::Pump(e) => e.is_transport(),
            AppError::ConnectionFailed(_) | AppError::ConnectTimeout(_) | AppError::Io(_) => true,
            AppError::Config(_) | AppError::Logging(_) => false,
        }
    }
}
