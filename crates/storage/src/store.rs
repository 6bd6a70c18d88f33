//! The record store interface.
//!
//! The record store is the system of record for identities, their public key
//! history and their certificate. The core reaches it through a handful of
//! reads and a single [`RecordStore::apply_mutation`] entry point; each
//! mutation either commits in full or fails without visible effect.
//!
//! ```text
//!   KeyRegistry ──┐                       ┌── MemoryRecordStore (tests, dev)
//!                 ├──► dyn RecordStore ───┤
//!   Certificate ──┘                       └── LedgerRecordStore<C> (production)
//!   Ledger
//! ```

use std::fmt;

use async_trait::async_trait;

use crate::{
    error::StorageResult,
    records::{Certificate, IdentityProfile, PublicKeyRecord},
    types::Identity,
};

/// A state change submitted to the record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Append a key and make it the only active key.
    AddKey {
        /// Owner of the new key.
        identity: Identity,
        /// Key material.
        key_data: String,
    },
    /// Deactivate one key, refusing to leave the identity without an active key.
    DeactivateKey {
        /// Owner of the key.
        identity: Identity,
        /// Position of the key in the history.
        index: u32,
    },
    /// Store a certificate, refusing while a non-revoked one exists.
    IssueCertificate {
        /// Subject of the certificate.
        identity: Identity,
        /// Fully populated certificate.
        certificate: Certificate,
    },
    /// Revoke the certificate and deactivate every key of the identity.
    RevokeCertificate {
        /// Subject of the certificate.
        identity: Identity,
        /// Reason recorded on the certificate.
        reason: String,
    },
}

impl Mutation {
    /// The identity whose records this mutation changes.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        match self {
            Self::AddKey { identity, .. }
            | Self::DeactivateKey { identity, .. }
            | Self::IssueCertificate { identity, .. }
            | Self::RevokeCertificate { identity, .. } => identity,
        }
    }

    /// Short operation name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddKey { .. } => "add_key",
            Self::DeactivateKey { .. } => "deactivate_key",
            Self::IssueCertificate { .. } => "issue_certificate",
            Self::RevokeCertificate { .. } => "revoke_certificate",
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.kind(), self.identity())
    }
}

/// Committed result of a [`Mutation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The appended key record.
    KeyAdded(PublicKeyRecord),
    /// The key record after deactivation.
    KeyDeactivated(PublicKeyRecord),
    /// The stored certificate.
    CertificateIssued(Certificate),
    /// The revoked certificate and how many keys the cascade turned off.
    CertificateRevoked {
        /// Certificate after revocation.
        certificate: Certificate,
        /// Number of keys that were active and are now inactive.
        keys_deactivated: usize,
    },
}

/// Durable, transactional store of identities, keys and certificates.
///
/// # Atomicity
///
/// [`apply_mutation`](Self::apply_mutation) checks every precondition before
/// writing. A refused mutation returns
/// [`StorageError::Rejected`](crate::StorageError::Rejected) and leaves all
/// records untouched; a committed one is observed in full by every later read.
///
/// # Retries
///
/// Implementations may retry idempotent reads. Mutations are never retried by
/// the store since a blind resubmission can duplicate side effects.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns whether the identity is registered.
    async fn is_identity_registered(&self, identity: &Identity) -> StorageResult<bool>;

    /// Returns the identity's key history in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) if the
    /// identity is not registered.
    async fn read_keys(&self, identity: &Identity) -> StorageResult<Vec<PublicKeyRecord>>;

    /// Returns the identity's certificate, or `None` if none was issued.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) if the
    /// identity is not registered.
    async fn read_certificate(&self, identity: &Identity) -> StorageResult<Option<Certificate>>;

    /// Applies a mutation atomically.
    async fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<MutationOutcome>;

    /// Returns the registration record, or `None` for an unknown identity.
    async fn read_profile(&self, identity: &Identity) -> StorageResult<Option<IdentityProfile>>;

    /// Lists every registered identity in registration order.
    async fn list_identities(&self) -> StorageResult<Vec<Identity>>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    async fn is_identity_registered(&self, identity: &Identity) -> StorageResult<bool> {
        (**self).is_identity_registered(identity).await
    }

    async fn read_keys(&self, identity: &Identity) -> StorageResult<Vec<PublicKeyRecord>> {
        (**self).read_keys(identity).await
    }

    async fn read_certificate(&self, identity: &Identity) -> StorageResult<Option<Certificate>> {
        (**self).read_certificate(identity).await
    }

    async fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<MutationOutcome> {
        (**self).apply_mutation(mutation).await
    }

    async fn read_profile(&self, identity: &Identity) -> StorageResult<Option<IdentityProfile>> {
        (**self).read_profile(identity).await
    }

    async fn list_identities(&self) -> StorageResult<Vec<Identity>> {
        (**self).list_identities().await
    }
}
