//! Record store backed by a remote ledger.
//!
//! [`LedgerRecordStore`] adapts a narrow RPC-style [`LedgerClient`] to the
//! [`RecordStore`] interface. Three things happen at this boundary:
//!
//! - every response is normalized once into canonical records (see [`crate::encoding`]);
//! - every call is bounded by [`LedgerStoreConfig::timeout`];
//! - idempotent reads are retried on transient failures with exponential backoff and jitter.
//!   Mutations are submitted exactly once.
//!
//! # Example
//!
//! ```no_run
//! // Requires a concrete `LedgerClient` implementation.
//! use trustkey_storage::ledger::{LedgerClient, LedgerRecordStore, LedgerStoreConfig};
//!
//! fn build<C: LedgerClient>(client: C) -> Result<LedgerRecordStore<C>, Box<dyn std::error::Error>> {
//!     let config = LedgerStoreConfig::builder()
//!         .timeout(std::time::Duration::from_secs(5))
//!         .build()?;
//!     Ok(LedgerRecordStore::new(client, config))
//! }
//! ```

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use fail::fail_point;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    encoding::{RawCertificate, RawKeyRecord, normalize_certificate, normalize_key_records},
    error::{ConfigError, StorageError, StorageResult},
    records::{Certificate, IdentityProfile, PublicKeyRecord},
    store::{Mutation, MutationOutcome, RecordStore},
    types::Identity,
};

/// Default per-call timeout (10 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Narrow RPC surface of the ledger.
///
/// Responses are returned in whatever encoding the ledger call path produces.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Whether the identity is registered on the ledger.
    async fn is_registered(&self, identity: &Identity) -> StorageResult<bool>;

    /// The identity's key history in ledger order.
    async fn get_keys(&self, identity: &Identity) -> StorageResult<Vec<RawKeyRecord>>;

    /// The identity's certificate in raw form.
    async fn get_certificate(&self, identity: &Identity) -> StorageResult<RawCertificate>;

    /// The identity's registration record.
    async fn get_profile(&self, identity: &Identity) -> StorageResult<Option<IdentityProfile>>;

    /// Every registered identity.
    async fn list_identities(&self) -> StorageResult<Vec<Identity>>;

    /// Submits a mutation as a single ledger transaction.
    async fn submit(&self, mutation: &Mutation) -> StorageResult<MutationOutcome>;
}

/// Retry policy for idempotent ledger reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound on the delay between retries.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

/// Configuration for [`LedgerRecordStore`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use trustkey_storage::ledger::LedgerStoreConfig;
///
/// let config: LedgerStoreConfig = serde_json::from_str(r#"{ "timeout": "3s" }"#).unwrap();
/// assert_eq!(config.timeout(), Duration::from_secs(3));
/// assert_eq!(config.retry().max_retries, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerStoreConfig {
    /// Bound on each ledger call, including read retries.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    timeout: Duration,

    /// Read retry policy.
    #[serde(default)]
    retry: RetryConfig,
}

#[bon::bon]
impl LedgerStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `timeout` is zero, or
    /// [`ConfigError::Invalid`] if `initial_backoff` exceeds `max_backoff`.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_TIMEOUT)] timeout: Duration,
        #[builder(default)] retry: RetryConfig,
    ) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "timeout",
                min: "1ms".into(),
                value: format!("{timeout:?}"),
            });
        }
        if retry.initial_backoff > retry.max_backoff {
            return Err(ConfigError::Invalid {
                field: "retry.initial_backoff",
                reason: "must not exceed retry.max_backoff".into(),
            });
        }
        Ok(Self { timeout, retry })
    }

    /// Returns the per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the read retry policy.
    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

impl Default for LedgerStoreConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, retry: RetryConfig::default() }
    }
}

/// [`RecordStore`] over a [`LedgerClient`].
#[derive(Debug, Clone)]
pub struct LedgerRecordStore<C> {
    client: C,
    config: LedgerStoreConfig,
}

impl<C: LedgerClient> LedgerRecordStore<C> {
    /// Wraps a ledger client.
    pub fn new(client: C, config: LedgerStoreConfig) -> Self {
        Self { client, config }
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    async fn read<F, Fut, T>(&self, operation_name: &str, operation: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        match tokio::time::timeout(
            self.config.timeout,
            with_retry(&self.config.retry, operation_name, operation),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(operation = operation_name, "ledger read timed out");
                Err(StorageError::timeout())
            },
        }
    }
}

#[async_trait]
impl<C: LedgerClient> RecordStore for LedgerRecordStore<C> {
    #[tracing::instrument(skip(self))]
    async fn is_identity_registered(&self, identity: &Identity) -> StorageResult<bool> {
        self.read("is_registered", || self.client.is_registered(identity)).await
    }

    #[tracing::instrument(skip(self))]
    async fn read_keys(&self, identity: &Identity) -> StorageResult<Vec<PublicKeyRecord>> {
        let raw = self.read("get_keys", || self.client.get_keys(identity)).await?;
        normalize_key_records(&raw)
    }

    #[tracing::instrument(skip(self))]
    async fn read_certificate(&self, identity: &Identity) -> StorageResult<Option<Certificate>> {
        let raw = self.read("get_certificate", || self.client.get_certificate(identity)).await?;
        normalize_certificate(&raw)
    }

    #[tracing::instrument(skip(self, mutation), fields(mutation = %mutation))]
    async fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<MutationOutcome> {
        fail_point!("ledger-before-submit", |_| {
            Err(StorageError::connection("injected failure before ledger submit"))
        });

        match tokio::time::timeout(self.config.timeout, self.client.submit(mutation)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                // The transaction may still land; the caller decides whether to re-read.
                tracing::warn!(mutation = %mutation, "ledger submit timed out");
                Err(StorageError::timeout())
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn read_profile(&self, identity: &Identity) -> StorageResult<Option<IdentityProfile>> {
        self.read("get_profile", || self.client.get_profile(identity)).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_identities(&self) -> StorageResult<Vec<Identity>> {
        self.read("list_identities", || self.client.list_identities()).await
    }
}

/// Executes `operation` with automatic retry on transient errors.
///
/// Only errors where [`StorageError::is_transient`] returns `true` are
/// retried. All other errors are propagated immediately.
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub(crate) async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "operation succeeded after retry",
                    );
                }
                return Ok(value);
            },
            Err(err) if err.is_transient() && attempt < config.max_retries => {
                let delay = compute_backoff(config, attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient error, retrying after backoff",
                );
                fail_point!("retry-before-sleep");
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}

/// Computes the backoff duration for the given attempt number.
///
/// `min(initial_backoff * 2^attempt, max_backoff) + random(0..50% of delay)`
fn compute_backoff(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.initial_backoff.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff);

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        let jitter = rand::rng().random_range(0..=jitter_range);
        capped + Duration::from_millis(jitter)
    } else {
        capped
    }
}
