//! Storage error types and result alias.
//!
//! Every record store maps its internal failures onto [`StorageError`]. Typed
//! refusals of a mutation (the identity is unknown, the only active key would
//! be deactivated, ...) are carried by [`StorageError::Rejected`] so callers
//! can tell a precondition failure apart from an unreachable ledger.
//!
//! # Example
//!
//! ```
//! use trustkey_storage::{MutationRejection, StorageError, StorageResult};
//!
//! fn deactivate_last_key() -> StorageResult<()> {
//!     Err(StorageError::rejected(MutationRejection::OnlyActiveKey))
//! }
//!
//! assert!(!deactivate_last_key().unwrap_err().is_transient());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while reading from or mutating the record store.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("Record not found: {key}")]
    NotFound {
        /// The identity or key that was not found.
        key: String,
    },

    /// A concurrent writer changed the record between read and commit.
    #[error("Transaction conflict")]
    Conflict,

    /// The ledger could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// A response from the ledger could not be decoded into a canonical record.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused decoding to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for backend-specific failures.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation exceeded its time limit.
    #[error("Operation timeout")]
    Timeout,

    /// The store refused a mutation because a precondition does not hold.
    ///
    /// Nothing was written.
    #[error("Mutation rejected: {0}")]
    Rejected(MutationRejection),
}

/// Reason the record store refused to apply a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[non_exhaustive]
pub enum MutationRejection {
    /// The target identity is not registered.
    #[error("identity is not registered")]
    IdentityNotRegistered,
    /// The identity is already registered.
    #[error("identity is already registered")]
    IdentityAlreadyRegistered,
    /// The key data is already registered to an identity.
    #[error("public key is already registered")]
    DuplicateKey,
    /// The key index does not exist for the identity.
    #[error("key index out of range")]
    KeyIndexOutOfRange,
    /// Deactivating the key would leave the identity without an active key.
    #[error("cannot deactivate the only active key")]
    OnlyActiveKey,
    /// A non-revoked certificate already exists for the identity.
    #[error("certificate already exists")]
    CertificateAlreadyExists,
    /// The identity has no certificate.
    #[error("no certificate issued")]
    NoCertificate,
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Creates a new `Rejected` error.
    #[must_use]
    pub fn rejected(reason: MutationRejection) -> Self {
        Self::Rejected(reason)
    }

    /// Returns `true` when the failure may succeed if the caller tries again.
    ///
    /// Only connectivity failures and timeouts are transient. A rejected
    /// mutation will be rejected again until the record state changes.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }

    /// Returns the rejection reason if this is a [`StorageError::Rejected`].
    #[must_use]
    pub fn rejection(&self) -> Option<MutationRejection> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<MutationRejection> for StorageError {
    fn from(reason: MutationRejection) -> Self {
        Self::Rejected(reason)
    }
}

/// Errors produced while validating configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration field is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Value that was supplied.
        value: String,
    },

    /// A field has an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
