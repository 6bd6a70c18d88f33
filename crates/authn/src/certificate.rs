//! Certificate issuance and revocation.
//!
//! An identity holds at most one non-revoked certificate. Revoking it
//! cascades: every key the identity holds is deactivated in the same store
//! mutation, locking the identity out of signing until a new key is added.
//! A revoked certificate does not block issuing a new one.

use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use trustkey_storage::{Certificate, Identity, Mutation, MutationOutcome, RecordStore};

use crate::{
    error::{AuthError, Result},
    keys::unexpected_outcome,
    nonce::random_hex,
    timeout::bounded,
    validation::normalize_reason,
};

/// Bytes of randomness in a generated serial number.
pub const SERIAL_BYTES: usize = 16;

/// Subject fields of a certificate request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct CertificateFields {
    /// Serial number; a random one is generated when absent or blank.
    #[builder(into)]
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Subject common name.
    #[builder(into, default)]
    #[serde(default)]
    pub common_name: String,
    /// Subject organization.
    #[builder(into, default)]
    #[serde(default)]
    pub organization: String,
    /// Subject country.
    #[builder(into, default)]
    #[serde(default)]
    pub country: String,
    /// Subject state or province.
    #[builder(into, default)]
    #[serde(default)]
    pub state: String,
    /// Subject locality.
    #[builder(into, default)]
    #[serde(default)]
    pub locality: String,
    /// Signature algorithm; the configured default applies when absent.
    #[builder(into)]
    #[serde(default)]
    pub signature_algorithm: Option<String>,
}

impl CertificateFields {
    /// Names of required subject fields that are blank.
    #[must_use]
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("common_name", &self.common_name),
            ("organization", &self.organization),
            ("country", &self.country),
            ("state", &self.state),
            ("locality", &self.locality),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Certificate state of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
    /// A certificate exists; it may be revoked.
    Issued(Certificate),
    /// No certificate was ever issued.
    NotIssued,
}

impl CertificateStatus {
    /// Returns the certificate, if any.
    #[must_use]
    pub fn certificate(&self) -> Option<&Certificate> {
        match self {
            Self::Issued(certificate) => Some(certificate),
            Self::NotIssued => None,
        }
    }
}

/// Result of a revocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    /// The revoked certificate.
    pub certificate: Certificate,
    /// Keys the cascade switched from active to inactive.
    pub keys_deactivated: usize,
}

/// Issues and revokes identity certificates over a [`RecordStore`].
#[derive(Clone)]
pub struct CertificateLedger {
    store: Arc<dyn RecordStore>,
    store_timeout: Duration,
    default_signature_algorithm: String,
}

impl CertificateLedger {
    /// Creates a ledger bounding each store call by `store_timeout`.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        store_timeout: Duration,
        default_signature_algorithm: impl Into<String>,
    ) -> Self {
        Self {
            store,
            store_timeout,
            default_signature_algorithm: default_signature_algorithm.into(),
        }
    }

    /// Issues a certificate valid from now for `valid_days` days.
    ///
    /// Input checks run first and report every blank field at once; store
    /// preconditions are checked atomically with the write.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingFields`] listing blank fields, `public_key` and a zero `valid_days`
    /// - [`AuthError::InvalidField`] if the validity end overflows the calendar
    /// - [`AuthError::IdentityNotRegistered`] if the identity is unknown
    /// - [`AuthError::CertificateAlreadyExists`] if a non-revoked certificate exists
    #[tracing::instrument(skip(self, fields, public_key))]
    pub async fn issue(
        &self,
        identity: &Identity,
        fields: &CertificateFields,
        public_key: &str,
        valid_days: u32,
    ) -> Result<Certificate> {
        let mut missing = fields.missing();
        if public_key.trim().is_empty() {
            missing.push("public_key");
        }
        if valid_days == 0 {
            missing.push("valid_days");
        }
        if !missing.is_empty() {
            return Err(AuthError::MissingFields(missing));
        }

        let valid_from = Utc::now();
        let valid_to = TimeDelta::try_days(i64::from(valid_days))
            .and_then(|validity| valid_from.checked_add_signed(validity))
            .ok_or_else(|| {
                AuthError::invalid_field("valid_days", "validity period overflows the calendar")
            })?;

        let serial_number = fields
            .serial_number
            .as_deref()
            .map(str::trim)
            .filter(|serial| !serial.is_empty())
            .map_or_else(generate_serial, str::to_owned);
        let signature_algorithm = fields
            .signature_algorithm
            .as_deref()
            .map(str::trim)
            .filter(|alg| !alg.is_empty())
            .unwrap_or(self.default_signature_algorithm.as_str());

        let certificate = Certificate::builder()
            .serial_number(serial_number)
            .common_name(fields.common_name.trim())
            .organization(fields.organization.trim())
            .country(fields.country.trim())
            .state(fields.state.trim())
            .locality(fields.locality.trim())
            .public_key(public_key.trim())
            .signature_algorithm(signature_algorithm)
            .valid_from(valid_from)
            .valid_to(valid_to)
            .build();

        let mutation = Mutation::IssueCertificate { identity: identity.clone(), certificate };
        match self.apply(&mutation).await? {
            MutationOutcome::CertificateIssued(certificate) => {
                tracing::debug!(serial = %certificate.serial_number, "certificate issued");
                Ok(certificate)
            },
            other => Err(unexpected_outcome(&mutation, &other)),
        }
    }

    /// Revokes the identity's certificate and deactivates all of its keys.
    ///
    /// A blank reason is recorded as `No reason provided`. Revoking an
    /// already-revoked certificate keeps the first revocation's data and
    /// re-applies the cascade.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoCertificateToRevoke`] if none was issued
    /// - [`AuthError::IdentityNotRegistered`] if the identity is unknown
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, identity: &Identity, reason: &str) -> Result<Revocation> {
        let reason = normalize_reason(reason)?;
        let mutation = Mutation::RevokeCertificate { identity: identity.clone(), reason };
        match self.apply(&mutation).await? {
            MutationOutcome::CertificateRevoked { certificate, keys_deactivated } => {
                tracing::debug!(
                    serial = %certificate.serial_number,
                    keys_deactivated,
                    "certificate revoked"
                );
                Ok(Revocation { certificate, keys_deactivated })
            },
            other => Err(unexpected_outcome(&mutation, &other)),
        }
    }

    /// Returns the identity's certificate state.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IdentityNotRegistered`] if the identity is unknown.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, identity: &Identity) -> Result<CertificateStatus> {
        let certificate =
            bounded(self.store_timeout, "read_certificate", self.store.read_certificate(identity))
                .await?;
        Ok(certificate.map_or(CertificateStatus::NotIssued, CertificateStatus::Issued))
    }

    async fn apply(&self, mutation: &Mutation) -> Result<MutationOutcome> {
        let outcome =
            bounded(self.store_timeout, mutation.kind(), self.store.apply_mutation(mutation)).await?;
        Ok(outcome)
    }
}

fn generate_serial() -> String {
    random_hex(SERIAL_BYTES).to_uppercase()
}
