//! Error types for the block service and its collaborators.

use crate::block::Key;

/// Local blockstore errors.
#[derive(Debug, thiserror::Error)]
pub enum BlockstoreError {
    /// No block stored under this key.
    #[error("blockstore: block not found: {key}")]
    NotFound { key: Key },

    /// Underlying storage failed.
    #[error("blockstore: io error: {message}")]
    Io { message: String },
}

impl BlockstoreError {
    /// Whether this is the distinguishable "not found" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Exchange (remote retrieval) errors.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// No peer could provide the block.
    #[error("exchange: block not found: {key}")]
    NotFound { key: Key },

    /// The operation context was cancelled before the block arrived.
    #[error("exchange: operation cancelled")]
    Cancelled,

    /// Network failure talking to peers.
    #[error("exchange: network error: {message}")]
    Network { message: String },
}

/// Background notifier errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The worker has been shut down and accepts no further work.
    #[error("worker is closed")]
    Closed,

    /// The worker could not start its background tasks.
    #[error("worker runtime error: {message}")]
    Runtime { message: String },
}

/// Block service errors.
#[derive(Debug, thiserror::Error)]
pub enum BlockServiceError {
    /// Neither the local store nor the exchange produced the block.
    #[error("blockservice: key not found: {key}")]
    NotFound { key: Key },

    /// Local store failure on a write path, message passed through unchanged.
    #[error("{source}")]
    Blockstore {
        key: Key,
        #[source]
        source: BlockstoreError,
    },

    /// Error returned by the exchange for a single-block fetch.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// The block was stored locally but the notifier has been shut down.
    #[error("blockservice is closed")]
    Closed { key: Key },

    /// Notifier failure while closing the service.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// Invalid construction.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl BlockServiceError {
    /// Key of the block the failure concerns, when known.
    pub fn key(&self) -> Option<&Key> {
        match self {
            Self::NotFound { key } | Self::Blockstore { key, .. } | Self::Closed { key } => {
                Some(key)
            }
            Self::Exchange(ExchangeError::NotFound { key }) => Some(key),
            Self::Exchange(_) | Self::Worker(_) | Self::Config { .. } => None,
        }
    }

    /// Whether the block was not available.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Exchange(ExchangeError::NotFound { .. })
        )
    }

    /// Whether the failure left the block durably stored locally.
    ///
    /// True only for [`BlockServiceError::Closed`]: the write succeeded and
    /// the caller must not retry it.
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Result type for blockstore operations.
pub type BlockstoreResult<T> = Result<T, BlockstoreError>;

/// Result type for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Result type for block service operations.
pub type BlockServiceResult<T> = Result<T, BlockServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blockstore_error_passes_through_verbatim() {
        let key = Key::for_data(b"x");
        let err = BlockServiceError::Blockstore {
            key: key.clone(),
            source: BlockstoreError::Io {
                message: "disk full".to_string(),
            },
        };
        assert_eq!(err.to_string(), "blockstore: io error: disk full");
        assert_eq!(err.key(), Some(&key));
        assert!(!err.is_not_found());
    }

    #[test]
    fn exchange_error_is_transparent() {
        let err = BlockServiceError::from(ExchangeError::Network {
            message: "peer reset".to_string(),
        });
        assert_eq!(err.to_string(), "exchange: network error: peer reset");
        assert!(err.key().is_none());
    }

    #[test]
    fn closed_reports_stored_block() {
        let key = Key::for_data(b"x");
        let err = BlockServiceError::Closed { key: key.clone() };
        assert_eq!(err.to_string(), "blockservice is closed");
        assert!(err.is_stored());
        assert_eq!(err.key(), Some(&key));
    }

    #[test]
    fn not_found_kinds() {
        let key = Key::for_data(b"x");
        assert!(BlockServiceError::NotFound { key: key.clone() }.is_not_found());
        assert!(BlockServiceError::from(ExchangeError::NotFound { key }).is_not_found());
        assert!(!BlockServiceError::from(ExchangeError::Cancelled).is_not_found());
    }
}
