//! Error types for the prediction-market event indexer.
//!
//! This module provides a unified error type [`IndexerError`] that encompasses
//! every failure that can occur while fetching, decoding, applying and rolling
//! back contract events.
//!
//! # Design
//!
//! The error hierarchy is organized by layer and by how the indexer reacts:
//! - [`IndexerError::DecodingError`]: malformed log data, logged and skipped
//! - [`IndexerError::ValidationError`]: event rejected before persistence, logged and dropped
//! - [`IndexerError::RpcError`] / [`IndexerError::UnknownBlock`]: tick aborted, retried
//! - [`IndexerError::EntityNotFound`]: rollback integrity failure, stops the indexer
//! - [`IndexerError::RollbackFailed`]: a ledgered event could not be undone, stops the indexer
//! - [`IndexerError::ReorgBeyondWindow`]: no common ancestor on record, stops the indexer
//! - [`IndexerError::MathError`]: pricing domain errors
//!
//! # Example
//!
//! ```
//! use pm_event_indexer::error::{IndexerError, IndexerResult};
//!
//! fn validate_funding(funding: u128) -> IndexerResult<()> {
//!     if funding == 0 {
//!         return Err(IndexerError::math("funding cannot be zero", None));
//!     }
//!     Ok(())
//! }
//! assert!(validate_funding(0).is_err());
//! ```

use std::fmt;

/// Result type alias using [`IndexerError`].
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Boxed source error carried by most variants.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the event indexer.
#[derive(Debug)]
pub enum IndexerError {
    /// Configuration or environment variable errors.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// RPC provider or network errors.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// A log matched a registered signature but its payload could not be decoded.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// A decoded event failed domain validation (missing parameter, unknown
    /// parent entity, uniqueness violation, ...).
    ValidationError {
        /// Human-readable error message
        message: String,
    },

    /// State management or consistency errors.
    StateError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Arithmetic or pricing errors.
    MathError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// Database operation errors.
    DatabaseError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<BoxedSource>,
    },

    /// The node returned no block (or a block without hash) for a height.
    UnknownBlock {
        /// Requested block number
        number: u64,
    },

    /// Rollback could not locate the entity an applied event touched.
    ///
    /// Apply/rollback bookkeeping has drifted from the chain; an operator has to
    /// reconcile the database before indexing can resume.
    EntityNotFound {
        /// Entity kind (table name)
        entity: &'static str,
        /// Rendered identity that was looked up
        key: String,
    },

    /// A ledgered event could not be undone.
    ///
    /// Wraps the handler or ledger failure; like [`IndexerError::EntityNotFound`]
    /// it needs an operator.
    RollbackFailed {
        /// Ledger row that failed
        id: i64,
        /// What went wrong
        source: Box<IndexerError>,
    },

    /// The chain diverged below every block hash still on record.
    ReorgBeyondWindow {
        /// Oldest block number still on record
        oldest: u64,
    },

    /// The cursor lock is held by a maintenance operation.
    CursorLocked,
}

impl IndexerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use pm_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::config("RPC_URL not set", None);
    /// assert!(matches!(err, IndexerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    #[must_use]
    pub fn rpc(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    ///
    /// # Example
    ///
    /// ```
    /// use pm_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::decoding("data length mismatch", None);
    /// assert!(matches!(err, IndexerError::DecodingError { .. }));
    /// ```
    #[must_use]
    pub fn decoding(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Create a new math error.
    #[must_use]
    pub fn math(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::MathError {
            message: message.into(),
            source,
        }
    }

    /// Create a new database error.
    #[must_use]
    pub fn database(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Create an entity-not-found error for a rollback.
    ///
    /// # Example
    ///
    /// ```
    /// use pm_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::entity_not_found("markets", "0xabc");
    /// assert!(err.is_fatal());
    /// ```
    #[must_use]
    pub fn entity_not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity,
            key: key.into(),
        }
    }

    /// Mark a failure to undo ledger row `id` as fatal.
    ///
    /// Database errors stay retryable and fatal errors keep their kind; every
    /// other failure is wrapped in [`IndexerError::RollbackFailed`].
    #[must_use]
    pub fn rollback_failed(id: i64, source: Self) -> Self {
        if source.is_fatal() || matches!(source, Self::DatabaseError { .. }) {
            return source;
        }
        Self::RollbackFailed {
            id,
            source: Box::new(source),
        }
    }

    /// Whether this error must stop the indexer until an operator intervenes.
    ///
    /// Every fatal kind means the stored state can no longer be reconciled
    /// with the chain automatically.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EntityNotFound { .. }
                | Self::RollbackFailed { .. }
                | Self::ReorgBeyondWindow { .. }
        )
    }

    /// Whether the dispatcher treats this error as a dropped event rather than
    /// a failed tick.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::ValidationError { .. })
    }
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::ValidationError { message } => write!(f, "Validation error: {message}"),
            Self::StateError { message, .. } => write!(f, "State error: {message}"),
            Self::MathError { message, .. } => write!(f, "Math error: {message}"),
            Self::DatabaseError { message, .. } => write!(f, "Database error: {message}"),
            Self::UnknownBlock { number } => write!(f, "Unknown block: {number}"),
            Self::EntityNotFound { entity, key } => {
                write!(f, "Entity not found during rollback: {entity} {key}")
            }
            Self::RollbackFailed { id, source } => {
                write!(f, "Rollback of ledger entry {id} failed: {source}")
            }
            Self::ReorgBeyondWindow { oldest } => {
                write!(f, "Reorg deeper than the recorded window (oldest block {oldest})")
            }
            Self::CursorLocked => write!(f, "Cursor is locked"),
        }
    }
}

impl std::error::Error for IndexerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::StateError { source, .. }
            | Self::MathError { source, .. }
            | Self::DatabaseError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::RollbackFailed { source, .. } => Some(source.as_ref()),
            Self::ValidationError { .. }
            | Self::UnknownBlock { .. }
            | Self::EntityNotFound { .. }
            | Self::ReorgBeyondWindow { .. }
            | Self::CursorLocked => None,
        }
    }
}

/// Convert from `eyre::Report` to `IndexerError`.
///
/// Uncategorised reports are treated as RPC errors, which the tick loop retries.
impl From<eyre::Report> for IndexerError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: None,
        }
    }
}

impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_config_error() {
        let err = IndexerError::config("test error", None);
        assert!(matches!(err, IndexerError::ConfigError { .. }));
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_decoding_error() {
        let err = IndexerError::decoding("invalid log", None);
        assert_eq!(err.to_string(), "Decoding error: invalid log");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_validation_error() {
        let err = IndexerError::validation("oracle already exists");
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Validation error: oracle already exists");
    }

    #[test]
    fn test_unknown_block() {
        let err = IndexerError::UnknownBlock { number: 42 };
        assert_eq!(err.to_string(), "Unknown block: 42");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_entity_not_found_is_fatal() {
        let err = IndexerError::entity_not_found("centralized_oracles", "0x01");
        assert!(err.is_fatal());
        assert!(!err.is_validation());
        assert!(err.to_string().contains("centralized_oracles"));
    }

    #[test]
    fn test_deep_reorg_is_fatal() {
        let err = IndexerError::ReorgBeyondWindow { oldest: 100 };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("100"));
    }

    #[test]
    fn test_failed_undo_is_fatal() {
        let err = IndexerError::rollback_failed(7, IndexerError::state("no previous owner", None));
        assert!(matches!(err, IndexerError::RollbackFailed { id: 7, .. }));
        assert!(err.is_fatal());
        assert!(err.source().is_some());
        assert!(err.to_string().contains("no previous owner"));

        let missing =
            IndexerError::rollback_failed(7, IndexerError::entity_not_found("markets", "0x01"));
        assert!(matches!(missing, IndexerError::EntityNotFound { .. }));

        let busy =
            IndexerError::rollback_failed(7, IndexerError::database("database is locked", None));
        assert!(!busy.is_fatal());
    }

    #[test]
    fn test_eyre_report_is_retryable() {
        let err: IndexerError = eyre::eyre!("connection reset").into();
        assert!(matches!(err, IndexerError::RpcError { .. }));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = IndexerError::config("failed to load", Some(Box::new(source)));

        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Configuration error: failed to load");
    }
}
