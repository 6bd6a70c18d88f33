//! Authentication and credential lifecycle error types.
//!
//! Every failure carries a stable, machine-readable [`reason`](AuthError::reason)
//! string for audit records and security monitoring, and an
//! [`ErrorCategory`] that tells the caller whether retrying can help.
//!
//! Display strings for authentication failures are deliberately generic: they
//! name the failed check (invalid nonce, invalid signature, unregistered) and
//! never echo recovered addresses or store state back to an unauthenticated
//! caller.

use trustkey_storage::{ConfigError, MutationRejection, StorageError};
use thiserror::Error;

/// Broad class of an [`AuthError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing or malformed caller input. Not retried.
    Input,
    /// A record-state precondition does not hold. Not retried.
    Precondition,
    /// The caller failed to prove who they are or lacks the capability.
    Authentication,
    /// The record store is unreachable or timed out. May succeed later.
    Dependency,
    /// A local failure that is neither the caller's nor the store's fault.
    Internal,
}

/// Authentication and credential lifecycle errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    // ========== Input errors ==========
    /// The claimed identity is not a well-formed address.
    #[error("Invalid identity format")]
    InvalidIdentity,

    /// A field has an unusable value.
    #[error("Invalid {field}: {message}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// One or more required fields are blank.
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// The key index does not exist for the identity.
    #[error("Key index out of range")]
    KeyIndexOutOfRange,

    /// The `Authorization` header is absent or not a bearer token.
    #[error("Invalid authorization header")]
    InvalidAuthorizationHeader,

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    // ========== Precondition errors ==========
    /// Login attempted for an identity that is not registered.
    #[error("Identity is not registered")]
    UnregisteredIdentity,

    /// Credential operation targeted an identity that is not registered.
    #[error("Identity not registered")]
    IdentityNotRegistered,

    /// Deactivating the key would leave the identity without an active key.
    #[error("Cannot deactivate the only active key")]
    OnlyActiveKey,

    /// The identity has no active key.
    #[error("No active key")]
    NoActiveKey,

    /// The key is already registered to another identity.
    #[error("Public key already registered")]
    DuplicateKey,

    /// A non-revoked certificate already exists for the identity.
    #[error("Certificate already exists")]
    CertificateAlreadyExists,

    /// Revocation requested but no certificate was issued.
    #[error("No certificate to revoke")]
    NoCertificateToRevoke,

    // ========== Authentication errors ==========
    /// No live nonce for the identity: never issued, expired, superseded or
    /// already consumed.
    #[error("Invalid or expired nonce")]
    NonceExpiredOrMissing,

    /// The signature could not be decoded or no key could be recovered from it.
    #[error("Invalid signature")]
    MalformedSignature,

    /// The signature was produced by a key other than the claimed identity's.
    #[error("Signature does not match the claimed identity")]
    SignatureMismatch,

    /// The session token failed verification or has expired.
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// Token algorithm is forbidden or not supported.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The caller's session lacks the capability for the operation.
    #[error("Forbidden: requires {required}")]
    Forbidden {
        /// Capability the operation requires.
        required: &'static str,
    },

    // ========== Dependency errors ==========
    /// The record store failed or timed out.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Record store error: {0}")]
    Storage(#[source] StorageError),

    // ========== Internal errors ==========
    /// A session token could not be produced.
    #[error("Token encoding failed: {0}")]
    TokenEncoding(String),
}

impl AuthError {
    /// Creates an `InvalidField` error.
    #[must_use]
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField { field, message: message.into() }
    }

    /// Creates a `Forbidden` error for the named capability.
    #[must_use]
    pub fn forbidden(required: &'static str) -> Self {
        Self::Forbidden { required }
    }

    /// Creates an `UnsupportedAlgorithm` error.
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm(message.into())
    }

    /// Stable machine-readable reason string.
    ///
    /// These values appear in audit records and are safe to match on.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidIdentity => "invalid_identity",
            Self::InvalidField { .. } => "invalid_field",
            Self::MissingFields(_) => "missing_fields",
            Self::KeyIndexOutOfRange => "key_index_out_of_range",
            Self::InvalidAuthorizationHeader => "invalid_authorization_header",
            Self::Config(_) => "invalid_config",
            Self::UnregisteredIdentity => "unregistered_user",
            Self::IdentityNotRegistered => "identity_not_registered",
            Self::OnlyActiveKey => "only_active_key",
            Self::NoActiveKey => "no_active_key",
            Self::DuplicateKey => "duplicate_key",
            Self::CertificateAlreadyExists => "certificate_already_exists",
            Self::NoCertificateToRevoke => "no_certificate",
            Self::NonceExpiredOrMissing => "invalid_nonce",
            Self::MalformedSignature => "invalid_signature",
            Self::SignatureMismatch => "signature_mismatch",
            Self::InvalidOrExpiredToken => "invalid_token",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Forbidden { .. } => "forbidden",
            Self::Storage(StorageError::Timeout) => "ledger_timeout",
            Self::Storage(_) => "ledger_unavailable",
            Self::TokenEncoding(_) => "token_encoding_failed",
        }
    }

    /// The error's category.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidIdentity
            | Self::InvalidField { .. }
            | Self::MissingFields(_)
            | Self::KeyIndexOutOfRange
            | Self::InvalidAuthorizationHeader
            | Self::Config(_) => ErrorCategory::Input,
            Self::UnregisteredIdentity
            | Self::IdentityNotRegistered
            | Self::OnlyActiveKey
            | Self::NoActiveKey
            | Self::DuplicateKey
            | Self::CertificateAlreadyExists
            | Self::NoCertificateToRevoke => ErrorCategory::Precondition,
            Self::NonceExpiredOrMissing
            | Self::MalformedSignature
            | Self::SignatureMismatch
            | Self::InvalidOrExpiredToken
            | Self::UnsupportedAlgorithm(_)
            | Self::Forbidden { .. } => ErrorCategory::Authentication,
            Self::Storage(_) => ErrorCategory::Dependency,
            Self::TokenEncoding(_) => ErrorCategory::Internal,
        }
    }

    /// Returns `true` if the same call may succeed later without any change
    /// by the caller.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(err) if err.is_transient())
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Rejected(rejection) => match rejection {
                MutationRejection::IdentityNotRegistered => AuthError::IdentityNotRegistered,
                MutationRejection::DuplicateKey => AuthError::DuplicateKey,
                MutationRejection::KeyIndexOutOfRange => AuthError::KeyIndexOutOfRange,
                MutationRejection::OnlyActiveKey => AuthError::OnlyActiveKey,
                MutationRejection::CertificateAlreadyExists => AuthError::CertificateAlreadyExists,
                MutationRejection::NoCertificate => AuthError::NoCertificateToRevoke,
                _ => AuthError::Storage(StorageError::Rejected(rejection)),
            },
            StorageError::NotFound { .. } => AuthError::IdentityNotRegistered,
            other => AuthError::Storage(other),
        }
    }
}

impl From<trustkey_storage::InvalidIdentity> for AuthError {
    fn from(_: trustkey_storage::InvalidIdentity) -> Self {
        AuthError::InvalidIdentity
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
