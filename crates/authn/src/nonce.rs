//! Single-use login challenges.
//!
//! [`NonceManager`] keeps at most one live nonce per identity in a
//! [`moka::future::Cache`] bounded by TTL and capacity. Issuing replaces any
//! outstanding nonce for the identity (last write wins). Consuming removes
//! the entry atomically before anything else happens, so a nonce can be used
//! at most once whatever the outcome of the steps that follow.
//!
//! Nonces live only in memory. Losing them on restart forces a new
//! challenge and nothing more.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use rand_core::{OsRng, RngCore};
use trustkey_storage::{Identity, RecordStore};

use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
    timeout::bounded,
};

/// Random bytes in a nonce value.
pub const NONCE_ENTROPY_BYTES: usize = 32;

/// A live login challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    /// Identity the challenge was issued to.
    pub identity: Identity,
    /// The message the client must sign.
    pub value: String,
    /// When the challenge was issued.
    pub issued_at: DateTime<Utc>,
    /// When the challenge stops being accepted.
    pub expires_at: DateTime<Utc>,
}

impl Nonce {
    /// Returns `true` if the nonce is no longer accepted at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Issues and consumes per-identity login nonces.
///
/// # Thread Safety
///
/// `NonceManager` is `Send + Sync`. Concurrent consumers of the same nonce
/// race on a single atomic removal; exactly one of them wins.
pub struct NonceManager {
    cache: Cache<Identity, Nonce>,
    store: Arc<dyn RecordStore>,
    prefix: String,
    ttl: Duration,
    store_timeout: Duration,
}

impl NonceManager {
    /// Creates a nonce manager over the given record store.
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, config: &AuthConfig) -> Self {
        Self {
            cache: Cache::builder()
                .time_to_live(config.nonce_ttl())
                .max_capacity(config.nonce_capacity())
                .build(),
            store,
            prefix: config.nonce_prefix().to_owned(),
            ttl: config.nonce_ttl(),
            store_timeout: config.store_timeout(),
        }
    }

    /// Issues a fresh nonce for a registered identity, replacing any
    /// outstanding one.
    ///
    /// Registration is checked before any state changes.
    ///
    /// # Errors
    ///
    /// - [`AuthError::UnregisteredIdentity`] if the store does not know the identity
    /// - [`AuthError::Storage`] if the registration check fails or times out
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, identity: &Identity) -> Result<Nonce> {
        let registered = bounded(
            self.store_timeout,
            "is_identity_registered",
            self.store.is_identity_registered(identity),
        )
        .await?;
        if !registered {
            return Err(AuthError::UnregisteredIdentity);
        }

        let issued_at = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl)
            .map_err(|_| AuthError::invalid_field("nonce_ttl", "out of range"))?;
        let nonce = Nonce {
            identity: identity.clone(),
            value: format!("{}{}", self.prefix, random_hex(NONCE_ENTROPY_BYTES)),
            issued_at,
            expires_at: issued_at + ttl,
        };

        self.cache.insert(identity.clone(), nonce.clone()).await;
        tracing::debug!(expires_at = %nonce.expires_at, "nonce issued");
        Ok(nonce)
    }

    /// Consumes the live nonce for `identity`.
    ///
    /// The entry is removed first, unconditionally. When `presented` is
    /// given it must equal the live value; a stale or foreign value still
    /// destroys the live nonce.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NonceExpiredOrMissing`] if no nonce was live, the
    /// live one has expired, or `presented` does not match it.
    #[tracing::instrument(skip(self, presented))]
    pub async fn consume(&self, identity: &Identity, presented: Option<&str>) -> Result<Nonce> {
        let Some(nonce) = self.cache.remove(identity).await else {
            tracing::debug!("no live nonce");
            return Err(AuthError::NonceExpiredOrMissing);
        };

        if nonce.is_expired_at(Utc::now()) {
            tracing::debug!(expired_at = %nonce.expires_at, "nonce expired");
            return Err(AuthError::NonceExpiredOrMissing);
        }

        if let Some(presented) = presented
            && !constant_time_eq(presented.as_bytes(), nonce.value.as_bytes())
        {
            tracing::debug!("presented nonce is not the live one");
            return Err(AuthError::NonceExpiredOrMissing);
        }

        tracing::debug!("nonce consumed");
        Ok(nonce)
    }

    /// Returns the live nonce for `identity` without consuming it.
    pub async fn peek(&self, identity: &Identity) -> Option<Nonce> {
        self.cache.get(identity).await.filter(|nonce| !nonce.is_expired_at(Utc::now()))
    }

    /// Approximate number of outstanding nonces.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.cache.entry_count()
    }
}

pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
