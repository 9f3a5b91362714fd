//! Error types for Sluice

use thiserror::Error;

/// Core error type for Sluice operations
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No pooled resource became available within the configured wait time
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Pool closed")]
    PoolClosed,

    /// Pool shutdown gave up waiting for borrowed resources to come back
    #[error("Shutdown timed out with {outstanding} resource(s) still in use")]
    ShutdownTimeout { outstanding: usize },

    /// Commit/rollback without an active transaction, or a transaction used
    /// against a data source it is not bound to
    #[error("Transaction state error: {0}")]
    TransactionState(String),

    #[error("Invalid isolation level: {0}")]
    InvalidIsolationLevel(i32),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    /// Whether retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SluiceError::ResourceExhausted(_))
    }

    /// Whether the error reports a misuse of the transaction API
    pub fn is_transaction_state(&self) -> bool {
        matches!(self, SluiceError::TransactionState(_))
    }
}

/// Result type alias for Sluice operations
pub type Result<T> = std::result::Result<T, SluiceError>;
