//! Per-identity public key registry.
//!
//! Keys form an append-only history per identity. Adding a key makes it the
//! active key and deactivates the previous one in the same mutation, so at
//! most one key is ever active. Deactivation is a tombstone: records are
//! never removed. The registry refuses to deactivate the last active key;
//! only certificate revocation may leave an identity with none.

use std::{sync::Arc, time::Duration};

use trustkey_storage::{
    Identity, Mutation, MutationOutcome, PublicKeyRecord, RecordStore, StorageError, active_key,
};

use crate::{
    error::{AuthError, Result},
    timeout::bounded,
    validation::validate_key_data,
};

/// Registry of identities' public keys over a [`RecordStore`].
#[derive(Clone)]
pub struct KeyRegistry {
    store: Arc<dyn RecordStore>,
    store_timeout: Duration,
}

impl KeyRegistry {
    /// Creates a registry bounding each store call by `store_timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, store_timeout: Duration) -> Self {
        Self { store, store_timeout }
    }

    /// Appends `key_data` as the identity's new active key.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidField`] if the key data is unusable
    /// - [`AuthError::IdentityNotRegistered`] if the identity is unknown
    /// - [`AuthError::DuplicateKey`] if another identity holds the key
    #[tracing::instrument(skip(self, key_data))]
    pub async fn add_key(&self, identity: &Identity, key_data: &str) -> Result<PublicKeyRecord> {
        validate_key_data(key_data)?;
        let mutation =
            Mutation::AddKey { identity: identity.clone(), key_data: key_data.trim().to_owned() };
        match self.apply(&mutation).await? {
            MutationOutcome::KeyAdded(record) => {
                tracing::debug!(index = record.index, "key added");
                Ok(record)
            },
            other => Err(unexpected_outcome(&mutation, &other)),
        }
    }

    /// Deactivates the key at `index`.
    ///
    /// Deactivating a key that is already inactive returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyIndexOutOfRange`] if no key has that index
    /// - [`AuthError::OnlyActiveKey`] if it is the identity's only active key
    /// - [`AuthError::IdentityNotRegistered`] if the identity is unknown
    #[tracing::instrument(skip(self))]
    pub async fn deactivate(&self, identity: &Identity, index: u32) -> Result<PublicKeyRecord> {
        let mutation = Mutation::DeactivateKey { identity: identity.clone(), index };
        match self.apply(&mutation).await? {
            MutationOutcome::KeyDeactivated(record) => {
                tracing::debug!(index, "key deactivated");
                Ok(record)
            },
            other => Err(unexpected_outcome(&mutation, &other)),
        }
    }

    /// Returns the identity's active key.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoActiveKey`] if no key is active
    /// - [`AuthError::IdentityNotRegistered`] if the identity is unknown
    #[tracing::instrument(skip(self))]
    pub async fn active_key(&self, identity: &Identity) -> Result<PublicKeyRecord> {
        let keys = self.list(identity).await?;
        active_key(&keys).cloned().ok_or(AuthError::NoActiveKey)
    }

    /// Returns the identity's full key history in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityNotRegistered`] if the identity is unknown.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self, identity: &Identity) -> Result<Vec<PublicKeyRecord>> {
        Ok(bounded(self.store_timeout, "read_keys", self.store.read_keys(identity)).await?)
    }

    async fn apply(&self, mutation: &Mutation) -> Result<MutationOutcome> {
        let outcome =
            bounded(self.store_timeout, mutation.kind(), self.store.apply_mutation(mutation)).await?;
        Ok(outcome)
    }
}

pub(crate) fn unexpected_outcome(mutation: &Mutation, outcome: &MutationOutcome) -> AuthError {
    tracing::error!(mutation = %mutation, outcome = ?outcome, "mismatched store outcome");
    AuthError::Storage(StorageError::internal(format!(
        "unexpected outcome for {}",
        mutation.kind()
    )))
}
