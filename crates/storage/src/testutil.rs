//! Shared test utilities for record store testing.
//!
//! Feature-gated behind `testutil` so the helpers never reach production
//! builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! trustkey-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use trustkey_storage::testutil::{identity, registered_store};
//! ```

use chrono::{Duration, Utc};

use crate::{
    memory::MemoryRecordStore,
    records::{Certificate, IdentityProfile},
    types::Identity,
};

/// Returns a deterministic identity whose 20 address bytes all equal `n`.
#[must_use]
pub fn identity(n: u8) -> Identity {
    Identity::from_address_bytes(&[n; 20])
}

/// Builds a profile for [`identity`]`(n)`.
#[must_use]
pub fn profile(n: u8) -> IdentityProfile {
    IdentityProfile::builder()
        .identity(identity(n))
        .username(format!("user{n}"))
        .email(format!("user{n}@example.com"))
        .build()
}

/// Creates a [`MemoryRecordStore`] holding one registered identity.
///
/// # Panics
///
/// Panics if registration fails (cannot happen on an empty store).
pub async fn registered_store(n: u8, initial_key: Option<&str>) -> (MemoryRecordStore, Identity) {
    let store = MemoryRecordStore::new();
    store.register(profile(n), initial_key.map(str::to_owned)).expect("register on empty store");
    (store, identity(n))
}

/// Builds a one-year certificate with the given serial.
#[must_use]
pub fn sample_certificate(serial: &str) -> Certificate {
    let now = Utc::now();
    Certificate::builder()
        .serial_number(serial)
        .common_name("alice.example")
        .organization("Example Org")
        .country("US")
        .state("CA")
        .locality("San Francisco")
        .public_key("0x04aabbcc")
        .valid_from(now)
        .valid_to(now + Duration::days(365))
        .build()
}

/// Assert that a result is a [`StorageError::Rejected`](crate::StorageError::Rejected)
/// with the given [`MutationRejection`](crate::MutationRejection) variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use trustkey_storage::{MutationRejection, StorageError, StorageResult, assert_rejected};
///
/// let result: StorageResult<()> = Err(StorageError::Rejected(MutationRejection::NoCertificate));
/// assert_rejected!(result, NoCertificate);
/// ```
#[macro_export]
macro_rules! assert_rejected {
    ($result:expr, $variant:ident) => {
        match $result {
            Err($crate::error::StorageError::Rejected(
                $crate::error::MutationRejection::$variant,
            )) => {},
            other => panic!(
                "expected StorageError::Rejected({}), got: {:?}",
                stringify!($variant),
                other
            ),
        }
    };
}

/// Assert that a [`StorageResult`](crate::StorageResult) contains a
/// [`StorageError::Timeout`](crate::StorageError::Timeout).
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Timeout)),
            "expected StorageError::Timeout, got: {:?}",
            $result,
        );
    };
}
