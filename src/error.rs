//! WolfSingleton Error Types

use thiserror::Error;

/// Result type alias for WolfSingleton operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfSingleton error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // Election errors
    #[error("Singleton service {service} not started: quorum not reached ({reached}/{required})")]
    QuorumNotReached {
        service: String,
        reached: usize,
        required: usize,
    },

    #[error("Singleton service {0} not started: elected provider failed to start")]
    NotStarted(String),

    #[error("Singleton service {service} unavailable: {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Multiple primary providers detected for singleton service {service}: {providers:?}")]
    MultiplePrimaries {
        service: String,
        providers: Vec<String>,
    },

    #[error("Failed to start singleton service {service}: {reason}")]
    StartFailed { service: String, reason: String },

    // Registration errors
    #[error("Service {0} is already registered on this node")]
    AlreadyRegistered(String),

    #[error("No handler for service {service} on {node}")]
    NoHandler { service: String, node: String },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    // Dispatch errors
    #[error("Command dispatch to {target} failed: {reason}")]
    Dispatch { target: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::ServiceUnavailable { .. }
        )
    }

    /// Check if this error means the singleton has no usable primary right now
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Error::QuorumNotReached { .. }
                | Error::NotStarted(_)
                | Error::ServiceUnavailable { .. }
        )
    }

    /// Check if a per-member dispatch outcome just means "that member did not answer"
    pub fn is_member_unreachable(&self) -> bool {
        matches!(
            self,
            Error::Cancelled
                | Error::NoHandler { .. }
                | Error::NodeNotFound(_)
                | Error::ConnectionFailed { .. }
                | Error::ConnectionTimeout(_)
                | Error::ShuttingDown
        )
    }
}
