//! In-memory record store.
//!
//! [`MemoryRecordStore`] keeps every identity in a single map behind a
//! [`parking_lot::RwLock`]. Each mutation validates all of its preconditions
//! and applies all of its effects under one write-lock acquisition, so readers
//! never observe a half-applied change (for example a revoked certificate
//! alongside a still-active key).
//!
//! # Example
//!
//! ```
//! use trustkey_storage::{
//!     Identity, IdentityProfile, MemoryRecordStore, Mutation, RecordStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryRecordStore::new();
//!     let alice = Identity::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")?;
//!
//!     let profile = IdentityProfile::builder()
//!         .identity(alice.clone())
//!         .username("alice")
//!         .email("alice@example.com")
//!         .build();
//!     store.register(profile, Some("k0".to_owned()))?;
//!
//!     store
//!         .apply_mutation(&Mutation::AddKey { identity: alice.clone(), key_data: "k1".into() })
//!         .await?;
//!
//!     let keys = store.read_keys(&alice).await?;
//!     assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
//!     assert!(keys[1].is_active);
//!     Ok(())
//! }
//! ```
//!
//! # Limitations
//!
//! Data is not persisted; everything is lost when the process exits.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    error::{MutationRejection, StorageError, StorageResult},
    records::{Certificate, IdentityProfile, PublicKeyRecord},
    store::{Mutation, MutationOutcome, RecordStore},
    types::Identity,
};

/// Everything the store holds for one identity.
#[derive(Debug, Clone)]
struct IdentityRecord {
    profile: IdentityProfile,
    keys: Vec<PublicKeyRecord>,
    certificate: Option<Certificate>,
}

#[derive(Debug, Default)]
struct State {
    identities: HashMap<Identity, IdentityRecord>,
    /// Registration order, for listing.
    order: Vec<Identity>,
    /// Which identity first registered a given key data value.
    key_owners: HashMap<String, Identity>,
}

/// In-memory implementation of [`RecordStore`] for tests and development.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecordStore {
    state: Arc<RwLock<State>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an identity, optionally with its first public key.
    ///
    /// The initial key, if any, becomes record `0` and is active. Returns the
    /// created key record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Rejected`] with
    /// [`MutationRejection::IdentityAlreadyRegistered`] if the identity exists,
    /// or [`MutationRejection::DuplicateKey`] if the initial key is already
    /// registered to any identity.
    #[tracing::instrument(skip(self, profile, initial_key), fields(identity = %profile.identity))]
    pub fn register(
        &self,
        profile: IdentityProfile,
        initial_key: Option<String>,
    ) -> StorageResult<Option<PublicKeyRecord>> {
        let mut state = self.state.write();

        if state.identities.contains_key(&profile.identity) {
            return Err(MutationRejection::IdentityAlreadyRegistered.into());
        }
        if let Some(key_data) = &initial_key {
            if state.key_owners.contains_key(key_data) {
                return Err(MutationRejection::DuplicateKey.into());
            }
        }

        let identity = profile.identity.clone();
        let first_key = initial_key.map(|key_data| PublicKeyRecord {
            index: 0,
            key_data,
            is_active: true,
            added_at: profile.registered_at,
        });

        if let Some(key) = &first_key {
            state.key_owners.insert(key.key_data.clone(), identity.clone());
        }
        state.identities.insert(
            identity.clone(),
            IdentityRecord { profile, keys: first_key.iter().cloned().collect(), certificate: None },
        );
        state.order.push(identity);

        Ok(first_key)
    }

    fn add_key(state: &mut State, identity: &Identity, key_data: &str) -> StorageResult<MutationOutcome> {
        if let Some(owner) = state.key_owners.get(key_data) {
            if owner != identity {
                return Err(MutationRejection::DuplicateKey.into());
            }
        }
        let record = state
            .identities
            .get_mut(identity)
            .ok_or(StorageError::Rejected(MutationRejection::IdentityNotRegistered))?;
        let index = u32::try_from(record.keys.len())
            .map_err(|_| StorageError::internal("key history exceeds u32 indices"))?;

        for key in record.keys.iter_mut().filter(|k| k.is_active) {
            key.is_active = false;
        }
        let added =
            PublicKeyRecord { index, key_data: key_data.to_owned(), is_active: true, added_at: Utc::now() };
        record.keys.push(added.clone());
        state.key_owners.entry(key_data.to_owned()).or_insert_with(|| identity.clone());

        Ok(MutationOutcome::KeyAdded(added))
    }

    fn deactivate_key(record: &mut IdentityRecord, index: u32) -> StorageResult<MutationOutcome> {
        let position = usize::try_from(index)
            .ok()
            .filter(|&p| p < record.keys.len())
            .ok_or(StorageError::Rejected(MutationRejection::KeyIndexOutOfRange))?;

        if !record.keys[position].is_active {
            return Ok(MutationOutcome::KeyDeactivated(record.keys[position].clone()));
        }

        let other_active = record.keys.iter().filter(|k| k.is_active && k.index != index).count();
        if other_active == 0 {
            return Err(MutationRejection::OnlyActiveKey.into());
        }

        record.keys[position].is_active = false;
        Ok(MutationOutcome::KeyDeactivated(record.keys[position].clone()))
    }

    fn issue_certificate(
        record: &mut IdentityRecord,
        certificate: &Certificate,
    ) -> StorageResult<MutationOutcome> {
        if record.certificate.as_ref().is_some_and(|c| !c.is_revoked) {
            return Err(MutationRejection::CertificateAlreadyExists.into());
        }
        record.certificate = Some(certificate.clone());
        Ok(MutationOutcome::CertificateIssued(certificate.clone()))
    }

    fn revoke_certificate(record: &mut IdentityRecord, reason: &str) -> StorageResult<MutationOutcome> {
        let certificate = record
            .certificate
            .as_mut()
            .ok_or(StorageError::Rejected(MutationRejection::NoCertificate))?;

        if !certificate.is_revoked {
            certificate.is_revoked = true;
            certificate.revoked_at = Some(Utc::now());
            certificate.revocation_reason = Some(reason.to_owned());
        }
        let certificate = certificate.clone();

        let mut keys_deactivated = 0;
        for key in record.keys.iter_mut().filter(|k| k.is_active) {
            key.is_active = false;
            keys_deactivated += 1;
        }

        Ok(MutationOutcome::CertificateRevoked { certificate, keys_deactivated })
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    #[tracing::instrument(skip(self))]
    async fn is_identity_registered(&self, identity: &Identity) -> StorageResult<bool> {
        Ok(self.state.read().identities.contains_key(identity))
    }

    #[tracing::instrument(skip(self))]
    async fn read_keys(&self, identity: &Identity) -> StorageResult<Vec<PublicKeyRecord>> {
        let state = self.state.read();
        state
            .identities
            .get(identity)
            .map(|record| record.keys.clone())
            .ok_or_else(|| StorageError::not_found(identity.as_str()))
    }

    #[tracing::instrument(skip(self))]
    async fn read_certificate(&self, identity: &Identity) -> StorageResult<Option<Certificate>> {
        let state = self.state.read();
        state
            .identities
            .get(identity)
            .map(|record| record.certificate.clone())
            .ok_or_else(|| StorageError::not_found(identity.as_str()))
    }

    #[tracing::instrument(skip(self, mutation), fields(mutation = %mutation))]
    async fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<MutationOutcome> {
        let mut state = self.state.write();

        if let Mutation::AddKey { identity, key_data } = mutation {
            return Self::add_key(&mut state, identity, key_data);
        }

        let record = state
            .identities
            .get_mut(mutation.identity())
            .ok_or(StorageError::Rejected(MutationRejection::IdentityNotRegistered))?;

        match mutation {
            Mutation::DeactivateKey { index, .. } => Self::deactivate_key(record, *index),
            Mutation::IssueCertificate { certificate, .. } => {
                Self::issue_certificate(record, certificate)
            },
            Mutation::RevokeCertificate { reason, .. } => Self::revoke_certificate(record, reason),
            Mutation::AddKey { .. } => Err(StorageError::internal("add_key handled above")),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn read_profile(&self, identity: &Identity) -> StorageResult<Option<IdentityProfile>> {
        Ok(self.state.read().identities.get(identity).map(|record| record.profile.clone()))
    }

    #[tracing::instrument(skip(self))]
    async fn list_identities(&self) -> StorageResult<Vec<Identity>> {
        Ok(self.state.read().order.clone())
    }
}
