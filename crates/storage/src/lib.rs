//! Record store boundary for trustkey identities.
//!
//! This crate defines the [`RecordStore`] trait through which the
//! authentication core reads and mutates identities, their public key
//! history and their certificate, together with the canonical record types
//! every store returns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 trustkey-authn (core engine)                │
//! │     NonceManager │ KeyRegistry │ CertificateLedger │ flows  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     RecordStore trait                       │
//! │  is_identity_registered, read_keys, read_certificate,       │
//! │  apply_mutation, read_profile, list_identities              │
//! ├────────────────────┬────────────────────────────────────────┤
//! │ MemoryRecordStore  │  LedgerRecordStore<C: LedgerClient>    │
//! │  (testing, dev)    │  (timeouts, read retries, encoding     │
//! │                    │   normalization)                       │
//! └────────────────────┴────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use trustkey_storage::{
//!     Identity, IdentityProfile, MemoryRecordStore, MutationRejection, Mutation, RecordStore,
//!     StorageError,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryRecordStore::new();
//!     let alice = Identity::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")?;
//!     store.register(
//!         IdentityProfile::builder().identity(alice.clone()).username("alice").email("a@x.io").build(),
//!         Some("k0".into()),
//!     )?;
//!
//!     // The only active key cannot be deactivated.
//!     let result = store
//!         .apply_mutation(&Mutation::DeactivateKey { identity: alice.clone(), index: 0 })
//!         .await;
//!     assert!(matches!(
//!         result,
//!         Err(StorageError::Rejected(MutationRejection::OnlyActiveKey))
//!     ));
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with fixtures and assertion macros.
//! - **`failpoints`**: Enables `fail` crate injection points in the ledger adapter.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod encoding;
pub mod error;
pub mod ledger;
pub mod memory;
pub mod records;
pub mod store;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use error::{BoxError, ConfigError, MutationRejection, StorageError, StorageResult};
pub use ledger::{LedgerClient, LedgerRecordStore, LedgerStoreConfig, RetryConfig};
pub use memory::MemoryRecordStore;
pub use records::{
    Certificate, DEFAULT_SIGNATURE_ALGORITHM, IdentityProfile, PublicKeyRecord, active_key,
};
pub use store::{Mutation, MutationOutcome, RecordStore};
pub use types::{Identity, InvalidIdentity};
