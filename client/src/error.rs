//! Unified error handling for the catalog client.

use crate::config::ConfigError;
use crate::remote::RemoteError;

/// Client error type.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(#[from] catalog_engine::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("{name} failed: {message}")]
    Procedure { name: String, message: String },

    #[error("Product not found: {0}")]
    NotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("A sync reconciler is already running for this catalog")]
    ReconcilerAlreadyRunning,

    #[error("Sync reconciler has stopped")]
    SyncStopped,
}

impl ClientError {
    /// Disk, database or corruption faults of the local store.
    ///
    /// These fail the current operation and put views into an error state,
    /// but never take the process down.
    pub fn is_local_storage_fault(&self) -> bool {
        matches!(
            self,
            ClientError::Storage(_) | ClientError::Migration(_) | ClientError::StoreUnavailable(_)
        )
    }

    /// Remote faults worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Remote(e) if e.is_transient())
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ClientError::StoreUnavailable("disk full".into()).is_local_storage_fault());
        assert!(ClientError::Storage(sqlx::Error::PoolClosed).is_local_storage_fault());
        assert!(!ClientError::Cancelled.is_local_storage_fault());

        assert!(ClientError::Remote(RemoteError::Offline).is_transient());
        assert!(!ClientError::Remote(RemoteError::NotConfigured).is_transient());
        assert!(!ClientError::NotFound("p1".into()).is_transient());
    }

    #[test]
    fn procedure_message_is_shown_as_is() {
        let err = ClientError::Procedure {
            name: "finalizeSale".into(),
            message: "Order already paid".into(),
        };
        assert_eq!(err.to_string(), "finalizeSale failed: Order already paid");
    }
}
