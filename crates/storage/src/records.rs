//! Canonical record shapes held by the record store.
//!
//! Every store implementation hands these types to its callers regardless of
//! how the underlying ledger encodes them; see [`crate::encoding`] for the
//! boundary conversion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Identity;

/// Signature algorithm recorded on certificates when the issuer names none.
pub const DEFAULT_SIGNATURE_ALGORITHM: &str = "sha256WithRSAEncryption";

/// One entry in an identity's append-only public key history.
///
/// Records are never removed. Deactivation flips `is_active` to `false` and
/// leaves the entry in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicKeyRecord {
    /// Zero-based position in the identity's key history.
    pub index: u32,
    /// The public key material as registered.
    pub key_data: String,
    /// Whether this is the identity's current signing key.
    pub is_active: bool,
    /// When the key was appended.
    pub added_at: DateTime<Utc>,
}

/// Returns the active record from an identity's key history, if any.
///
/// The store guarantees at most one record is active.
#[must_use]
pub fn active_key(keys: &[PublicKeyRecord]) -> Option<&PublicKeyRecord> {
    keys.iter().find(|key| key.is_active)
}

/// Digital certificate bound to a single identity.
///
/// An identity holds at most one certificate at a time. Revocation is
/// permanent for a given certificate; `is_revoked` never flips back.
///
/// # Example
///
/// ```
/// use chrono::{Duration, Utc};
/// use trustkey_storage::Certificate;
///
/// let now = Utc::now();
/// let cert = Certificate::builder()
///     .serial_number("01ab")
///     .common_name("alice.example")
///     .organization("Example Org")
///     .country("US")
///     .state("CA")
///     .locality("San Francisco")
///     .public_key("0x04deadbeef")
///     .valid_from(now)
///     .valid_to(now + Duration::days(365))
///     .build();
///
/// assert!(!cert.is_revoked);
/// assert_eq!(cert.signature_algorithm, "sha256WithRSAEncryption");
/// assert!(cert.is_valid_at(now));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct Certificate {
    /// Issuer-assigned serial number.
    #[builder(into)]
    pub serial_number: String,
    /// Subject common name.
    #[builder(into)]
    pub common_name: String,
    /// Subject organization.
    #[builder(into)]
    pub organization: String,
    /// Subject country.
    #[builder(into)]
    pub country: String,
    /// Subject state or province.
    #[builder(into)]
    pub state: String,
    /// Subject locality.
    #[builder(into)]
    pub locality: String,
    /// Public key the certificate binds to the identity.
    #[builder(into)]
    pub public_key: String,
    /// Signature algorithm name.
    #[builder(into, default = DEFAULT_SIGNATURE_ALGORITHM.to_owned())]
    pub signature_algorithm: String,
    /// Start of the validity window.
    pub valid_from: DateTime<Utc>,
    /// End of the validity window.
    pub valid_to: DateTime<Utc>,
    /// Whether the certificate has been revoked.
    #[builder(default)]
    pub is_revoked: bool,
    /// When the certificate was revoked.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Reason recorded at revocation.
    pub revocation_reason: Option<String>,
}

impl Certificate {
    /// Returns `true` if the certificate is not revoked and `at` falls inside
    /// its validity window.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        !self.is_revoked && self.valid_from <= at && at <= self.valid_to
    }
}

/// Registration record for an identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct IdentityProfile {
    /// The registered address.
    pub identity: Identity,
    /// Display name chosen at registration.
    #[builder(into)]
    pub username: String,
    /// Contact address chosen at registration.
    #[builder(into)]
    pub email: String,
    /// When the identity was registered.
    #[builder(default = Utc::now())]
    pub registered_at: DateTime<Utc>,
}
