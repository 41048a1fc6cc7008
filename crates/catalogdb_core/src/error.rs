//! Error types for CatalogDB core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in CatalogDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend or record store error.
    #[error("storage error: {0}")]
    Storage(#[from] catalogdb_storage::StorageError),

    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] catalogdb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Concurrent schema updates kept invalidating the evolved schema.
    #[error("schema of `{entity_type}` changed concurrently {attempts} times, giving up")]
    SchemaConflict {
        /// Collection whose schema could not be updated.
        entity_type: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A collection with this entity type already exists.
    #[error("collection `{entity_type}` already exists")]
    DuplicateCollection {
        /// The duplicated entity type.
        entity_type: String,
    },

    /// The request contradicts the data or schema (identity conflicts,
    /// removal of missing units, disallowed schema evolution).
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// An optimistic version token no longer matches.
    #[error("version mismatch on {unit}: expected {expected}, found {actual}")]
    VersionMismatch {
        /// The unit the mutation targeted.
        unit: String,
        /// Version the caller expected.
        expected: u64,
        /// Current version.
        actual: u64,
    },

    /// Internal consistency violation.
    #[error("consistency violation: {message}")]
    Consistency {
        /// Description of the violation.
        message: String,
    },

    /// Unsupported configuration value.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the bad value.
        message: String,
    },

    /// The commit lock could not be acquired in time.
    #[error("transaction {transaction_id} timed out after {waited:?} waiting for the commit lock")]
    CommitLockTimeout {
        /// Transaction that gave up.
        transaction_id: u64,
        /// How long it waited.
        waited: Duration,
    },

    /// Commit failed and the transaction was rolled back.
    #[error("transaction {transaction_id} rolled back: {source}")]
    RollbackFailure {
        /// Transaction that was rolled back.
        transaction_id: u64,
        /// What made the commit fail.
        #[source]
        source: Box<CoreError>,
    },

    /// Another transaction committed a change to the same collection.
    #[error("collection `{entity_type}` was changed by a concurrent transaction")]
    TransactionConflict {
        /// The contended collection.
        entity_type: String,
    },

    /// A catalog state transition is already in progress.
    #[error("catalog state transition already in progress")]
    ConcurrentTransition,

    /// Operation not permitted in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of why the operation is not allowed.
        message: String,
    },

    /// The session already has an open transaction.
    #[error("session already has open transaction {transaction_id}")]
    TransactionAlreadyOpen {
        /// The open transaction.
        transaction_id: u64,
    },

    /// No collection for this entity type.
    #[error("collection not found: {entity_type}")]
    CollectionNotFound {
        /// The requested entity type.
        entity_type: String,
    },

    /// The entity exists but this section was not fetched.
    #[error("{section} were not fetched with the entity")]
    ContentNotFetched {
        /// The section that was read.
        section: &'static str,
    },

    /// Another process holds the catalog directory lock.
    #[error("catalog locked: another process has exclusive access")]
    CatalogLocked,

    /// The database was closed.
    #[error("database is closed")]
    DatabaseClosed,

    /// Invalid catalog format or layout.
    #[error("invalid catalog format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a consistency error.
    pub fn consistency(message: impl Into<String>) -> Self {
        Self::Consistency {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a version mismatch error.
    pub fn version_mismatch(unit: impl Into<String>, expected: u64, actual: u64) -> Self {
        Self::VersionMismatch {
            unit: unit.into(),
            expected,
            actual,
        }
    }

    /// Creates a collection not found error.
    pub fn collection_not_found(entity_type: impl Into<String>) -> Self {
        Self::CollectionNotFound {
            entity_type: entity_type.into(),
        }
    }

    /// Wraps `source` as the reason transaction `transaction_id` rolled back.
    pub fn rollback(transaction_id: u64, source: CoreError) -> Self {
        Self::RollbackFailure {
            transaction_id,
            source: Box::new(source),
        }
    }

    /// Returns the underlying cause of a rollback, or `self`.
    #[must_use]
    pub fn root_cause(&self) -> &CoreError {
        match self {
            Self::RollbackFailure { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_keeps_cause() {
        let err = CoreError::rollback(
            7,
            CoreError::TransactionConflict {
                entity_type: "product".into(),
            },
        );
        assert!(err.to_string().contains("transaction 7 rolled back"));
        assert!(matches!(
            err.root_cause(),
            CoreError::TransactionConflict { .. }
        ));
    }

    #[test]
    fn storage_errors_convert() {
        let err: CoreError = catalogdb_storage::StorageError::Closed.into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
