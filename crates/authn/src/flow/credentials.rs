//! Authenticated key and certificate management.
//!
//! Every operation takes the caller's verified [`SessionClaims`]. Key
//! mutations act on the caller's own identity. Reads and issuance need
//! ownership of the target or the admin role; revocation and listing need
//! the admin role. Refused calls are audited as `access_denied` with the
//! attempted action, and every other outcome is audited under its own
//! action.

use std::{collections::HashMap, sync::Arc, time::Duration};

use trustkey_storage::{Certificate, Identity, IdentityProfile, PublicKeyRecord, RecordStore};

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditStatus, TracingAuditLogger},
    certificate::{CertificateFields, CertificateLedger, CertificateStatus, Revocation},
    config::AuthConfig,
    error::{AuthError, Result},
    keys::KeyRegistry,
    session::{Role, SessionClaims},
    timeout::bounded,
    validation::normalize_reason,
};

/// Key and certificate operations on behalf of an authenticated caller.
pub struct CredentialLifecycleFlow {
    keys: KeyRegistry,
    certificates: CertificateLedger,
    store: Arc<dyn RecordStore>,
    audit: Arc<dyn AuditLogger>,
    store_timeout: Duration,
}

#[bon::bon]
impl CredentialLifecycleFlow {
    /// Creates a credential flow.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `config` fails validation.
    #[builder]
    pub fn new(
        store: Arc<dyn RecordStore>,
        #[builder(default = Arc::new(TracingAuditLogger))] audit: Arc<dyn AuditLogger>,
        #[builder(default)] config: AuthConfig,
    ) -> Result<Self> {
        config.validate()?;
        let store_timeout = config.store_timeout();
        Ok(Self {
            keys: KeyRegistry::new(Arc::clone(&store), store_timeout),
            certificates: CertificateLedger::new(
                Arc::clone(&store),
                store_timeout,
                config.default_signature_algorithm(),
            ),
            store,
            audit,
            store_timeout,
        })
    }

    /// Adds a public key to the caller's own identity, making it active.
    ///
    /// # Errors
    ///
    /// See [`KeyRegistry::add_key`].
    #[tracing::instrument(skip(self, caller, key_data), fields(caller = %caller.sub))]
    pub async fn add_key(&self, caller: &SessionClaims, key_data: &str) -> Result<PublicKeyRecord> {
        let result = self.keys.add_key(&caller.sub, key_data).await;
        let metadata = match &result {
            Ok(record) => HashMap::from([("index".to_owned(), record.index.to_string())]),
            Err(_) => HashMap::new(),
        };
        self.record(caller, AuditAction::PublicKeyAdded, &caller.sub, &result, metadata).await;
        result
    }

    /// Deactivates one of the caller's own keys.
    ///
    /// # Errors
    ///
    /// See [`KeyRegistry::deactivate`].
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.sub))]
    pub async fn deactivate_key(
        &self,
        caller: &SessionClaims,
        index: u32,
    ) -> Result<PublicKeyRecord> {
        let result = self.keys.deactivate(&caller.sub, index).await;
        let metadata = HashMap::from([("index".to_owned(), index.to_string())]);
        self.record(caller, AuditAction::PublicKeyDeactivated, &caller.sub, &result, metadata)
            .await;
        result
    }

    /// Returns the key history of `target`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller owns `target` or is an admin
    /// - [`AuthError::IdentityNotRegistered`] if `target` is unknown
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.sub))]
    pub async fn list_keys(
        &self,
        caller: &SessionClaims,
        target: &Identity,
    ) -> Result<Vec<PublicKeyRecord>> {
        let action = AuditAction::GetUserPublicKeys;
        self.gate(caller, target, action, caller.require_owner_or_admin(target)).await?;
        let result = self.keys.list(target).await;
        let metadata = match &result {
            Ok(keys) => HashMap::from([("count".to_owned(), keys.len().to_string())]),
            Err(_) => HashMap::new(),
        };
        self.record(caller, action, target, &result, metadata).await;
        result
    }

    /// Returns the active key of `target`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller owns `target` or is an admin
    /// - [`AuthError::NoActiveKey`] if `target` has no active key
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.sub))]
    pub async fn active_key(
        &self,
        caller: &SessionClaims,
        target: &Identity,
    ) -> Result<PublicKeyRecord> {
        let action = AuditAction::GetUserPublicKeys;
        self.gate(caller, target, action, caller.require_owner_or_admin(target)).await?;
        let result = self.keys.active_key(target).await;
        let metadata = HashMap::from([("scope".to_owned(), "active".to_owned())]);
        self.record(caller, action, target, &result, metadata).await;
        result
    }

    /// Issues a certificate for `target`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller owns `target` or is an admin
    /// - otherwise see [`CertificateLedger::issue`]
    #[tracing::instrument(skip(self, caller, fields, public_key), fields(caller = %caller.sub))]
    pub async fn issue_certificate(
        &self,
        caller: &SessionClaims,
        target: &Identity,
        fields: &CertificateFields,
        public_key: &str,
        valid_days: u32,
    ) -> Result<Certificate> {
        let action = AuditAction::CertificateCreated;
        self.gate(caller, target, action, caller.require_owner_or_admin(target)).await?;
        let result = self.certificates.issue(target, fields, public_key, valid_days).await;
        let metadata = match &result {
            Ok(certificate) => HashMap::from([
                ("serial_number".to_owned(), certificate.serial_number.clone()),
                ("valid_to".to_owned(), certificate.valid_to.to_rfc3339()),
            ]),
            Err(_) => HashMap::from([("valid_days".to_owned(), valid_days.to_string())]),
        };
        self.record(caller, action, target, &result, metadata).await;
        result
    }

    /// Returns the certificate status of `target`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller owns `target` or is an admin
    /// - [`AuthError::IdentityNotRegistered`] if `target` is unknown
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.sub))]
    pub async fn certificate(
        &self,
        caller: &SessionClaims,
        target: &Identity,
    ) -> Result<CertificateStatus> {
        let action = AuditAction::GetUserCertificate;
        self.gate(caller, target, action, caller.require_owner_or_admin(target)).await?;
        let result = self.certificates.get(target).await;
        let metadata = match &result {
            Ok(CertificateStatus::Issued(certificate)) => HashMap::from([
                ("status".to_owned(), "issued".to_owned()),
                ("revoked".to_owned(), certificate.is_revoked.to_string()),
            ]),
            Ok(CertificateStatus::NotIssued) => {
                HashMap::from([("status".to_owned(), "not_issued".to_owned())])
            },
            Err(_) => HashMap::new(),
        };
        self.record(caller, action, target, &result, metadata).await;
        result
    }

    /// Returns the registration profile of `target`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller owns `target` or is an admin
    /// - [`AuthError::IdentityNotRegistered`] if `target` is unknown
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.sub))]
    pub async fn profile(
        &self,
        caller: &SessionClaims,
        target: &Identity,
    ) -> Result<IdentityProfile> {
        let action = AuditAction::GetUserProfile;
        self.gate(caller, target, action, caller.require_owner_or_admin(target)).await?;
        let result = bounded(self.store_timeout, "read_profile", self.store.read_profile(target))
            .await
            .map_err(AuthError::from)
            .and_then(|profile| profile.ok_or(AuthError::IdentityNotRegistered));
        self.record(caller, action, target, &result, HashMap::new()).await;
        result
    }

    /// Revokes the certificate of `target` and deactivates all its keys.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller is an admin
    /// - otherwise see [`CertificateLedger::revoke`]
    #[tracing::instrument(skip(self, caller, reason), fields(caller = %caller.sub))]
    pub async fn revoke_certificate(
        &self,
        caller: &SessionClaims,
        target: &Identity,
        reason: &str,
    ) -> Result<Revocation> {
        let action = AuditAction::CertificateRevoked;
        self.gate(caller, target, action, caller.require_role(Role::Admin)).await?;
        let result = self.certificates.revoke(target, reason).await;
        let metadata = match &result {
            Ok(revocation) => {
                let mut metadata = HashMap::from([
                    ("serial_number".to_owned(), revocation.certificate.serial_number.clone()),
                    ("keys_deactivated".to_owned(), revocation.keys_deactivated.to_string()),
                ]);
                if let Ok(requested) = normalize_reason(reason) {
                    metadata.insert("reason".to_owned(), requested);
                }
                // A repeat revocation keeps the first reason on the certificate.
                if let Some(stored) = &revocation.certificate.revocation_reason {
                    metadata.insert("stored_reason".to_owned(), stored.clone());
                }
                metadata
            },
            Err(_) => HashMap::new(),
        };
        self.record(caller, action, target, &result, metadata).await;
        result
    }

    /// Lists every registered identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Forbidden`] unless the caller is an admin
    /// - [`AuthError::Storage`] if the store fails
    #[tracing::instrument(skip(self, caller), fields(caller = %caller.sub))]
    pub async fn list_identities(&self, caller: &SessionClaims) -> Result<Vec<Identity>> {
        let action = AuditAction::AdminAccess;
        self.gate(caller, &caller.sub, action, caller.require_role(Role::Admin)).await?;
        let result =
            bounded(self.store_timeout, "list_identities", self.store.list_identities()).await;
        let result = result.map_err(AuthError::from);
        let mut metadata = HashMap::from([("operation".to_owned(), "list_identities".to_owned())]);
        if let Ok(identities) = &result {
            metadata.insert("count".to_owned(), identities.len().to_string());
        }
        self.record(caller, action, &caller.sub, &result, metadata).await;
        result
    }

    /// The underlying key registry.
    #[must_use]
    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// The underlying certificate ledger.
    #[must_use]
    pub fn certificates(&self) -> &CertificateLedger {
        &self.certificates
    }

    async fn gate(
        &self,
        caller: &SessionClaims,
        target: &Identity,
        attempted: AuditAction,
        check: Result<()>,
    ) -> Result<()> {
        let Err(err) = check else {
            return Ok(());
        };
        tracing::warn!(target_identity = %target, attempted = %attempted, role = %caller.role, "access denied");
        let event = AuditEvent::builder()
            .actor(caller.sub.as_str())
            .action(AuditAction::AccessDenied)
            .identity(target.as_str())
            .status(AuditStatus::Failure(err.reason().to_owned()))
            .metadata(HashMap::from([
                ("attempted".to_owned(), attempted.to_string()),
                ("role".to_owned(), caller.role.to_string()),
            ]))
            .build();
        self.audit.log(&event).await;
        Err(err)
    }

    async fn record<T>(
        &self,
        caller: &SessionClaims,
        action: AuditAction,
        target: &Identity,
        result: &Result<T>,
        metadata: HashMap<String, String>,
    ) {
        let status = match result {
            Ok(_) => AuditStatus::Success,
            Err(err) => {
                tracing::warn!(action = %action, reason = err.reason(), "credential operation failed");
                AuditStatus::Failure(err.reason().to_owned())
            },
        };
        let event = AuditEvent::builder()
            .actor(caller.sub.as_str())
            .action(action)
            .identity(target.as_str())
            .status(status)
            .metadata(metadata)
            .build();
        self.audit.log(&event).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{assert_auth_error, testutil::Harness};

    fn fields() -> CertificateFields {
        CertificateFields::builder()
            .common_name("alice.example")
            .organization("Example Org")
            .country("US")
            .state("CA")
            .locality("San Francisco")
            .build()
    }

    #[tokio::test]
    async fn test_add_key_targets_caller() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;

        let record = harness.credentials.add_key(&session.claims, "0x04aa").await.unwrap();
        assert_eq!(record.index, 1);
        let keys = harness.credentials.list_keys(&session.claims, &alice.identity()).await.unwrap();
        assert_eq!(keys.iter().filter(|k| k.is_active).count(), 1);
        assert_eq!(keys[1].key_data, "0x04aa");
    }

    #[tokio::test]
    async fn test_user_cannot_read_other_identity() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let bob = harness.register(2).await;
        let session = harness.login(&alice).await;

        assert_auth_error!(
            harness.credentials.list_keys(&session.claims, &bob.identity()).await,
            Forbidden
        );
        let denied = harness.audit.events().into_iter().last().unwrap();
        assert_eq!(denied.action, AuditAction::AccessDenied);
        assert_eq!(denied.metadata_value("attempted"), Some("get_user_public_keys"));
        assert_eq!(denied.status.reason(), Some("forbidden"));
    }

    #[tokio::test]
    async fn test_user_cannot_revoke() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;
        harness
            .credentials
            .issue_certificate(&session.claims, &alice.identity(), &fields(), "0x04aa", 30)
            .await
            .unwrap();

        assert_auth_error!(
            harness.credentials.revoke_certificate(&session.claims, &alice.identity(), "").await,
            Forbidden
        );
        let status = harness.credentials.certificate(&session.claims, &alice.identity()).await;
        assert!(!status.unwrap().certificate().unwrap().is_revoked);
    }

    #[tokio::test]
    async fn test_admin_revokes_with_cascade() {
        let harness = Harness::with_admin().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;
        harness.credentials.add_key(&session.claims, "0x04bb").await.unwrap();
        harness
            .credentials
            .issue_certificate(&session.claims, &alice.identity(), &fields(), "0x04bb", 30)
            .await
            .unwrap();

        let admin = harness.admin_session().await;
        let revocation = harness
            .credentials
            .revoke_certificate(&admin.claims, &alice.identity(), "key compromised")
            .await
            .unwrap();
        assert_eq!(revocation.keys_deactivated, 1);
        assert_eq!(revocation.certificate.revocation_reason.as_deref(), Some("key compromised"));

        assert_auth_error!(
            harness.credentials.active_key(&session.claims, &alice.identity()).await,
            NoActiveKey
        );
        let revoked = harness
            .audit
            .events()
            .into_iter()
            .find(|e| e.action == AuditAction::CertificateRevoked)
            .unwrap();
        assert_eq!(revoked.actor, admin.claims.sub.as_str());
        assert_eq!(revoked.metadata_value("keys_deactivated"), Some("1"));
    }

    #[tokio::test]
    async fn test_repeat_revocation_audits_requested_reason() {
        let harness = Harness::with_admin().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;
        harness
            .credentials
            .issue_certificate(&session.claims, &alice.identity(), &fields(), "0x04aa", 30)
            .await
            .unwrap();

        let admin = harness.admin_session().await;
        harness
            .credentials
            .revoke_certificate(&admin.claims, &alice.identity(), "key compromised")
            .await
            .unwrap();
        let again = harness
            .credentials
            .revoke_certificate(&admin.claims, &alice.identity(), "  superseded  ")
            .await
            .unwrap();
        assert_eq!(again.certificate.revocation_reason.as_deref(), Some("key compromised"));

        let revocations: Vec<_> = harness
            .audit
            .events()
            .into_iter()
            .filter(|e| e.action == AuditAction::CertificateRevoked)
            .collect();
        assert_eq!(revocations.len(), 2);
        assert_eq!(revocations[0].metadata_value("reason"), Some("key compromised"));
        assert_eq!(revocations[1].metadata_value("reason"), Some("superseded"));
        assert_eq!(revocations[1].metadata_value("stored_reason"), Some("key compromised"));
    }

    #[tokio::test]
    async fn test_user_cannot_read_other_profile() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let bob = harness.register(2).await;
        let session = harness.login(&alice).await;

        assert_auth_error!(
            harness.credentials.profile(&session.claims, &bob.identity()).await,
            Forbidden
        );
        let denied = harness.audit.events().into_iter().last().unwrap();
        assert_eq!(denied.action, AuditAction::AccessDenied);
        assert_eq!(denied.identity, bob.identity().as_str());
        assert_eq!(denied.metadata_value("attempted"), Some("get_user_profile"));
        assert_eq!(denied.status.reason(), Some("forbidden"));
    }

    #[tokio::test]
    async fn test_list_identities_is_admin_only() {
        let harness = Harness::with_admin().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;

        assert_auth_error!(harness.credentials.list_identities(&session.claims).await, Forbidden);

        let admin = harness.admin_session().await;
        let identities = harness.credentials.list_identities(&admin.claims).await.unwrap();
        assert!(identities.contains(&alice.identity()));
        assert!(identities.contains(&admin.claims.sub));
    }

    #[tokio::test]
    async fn test_failures_are_audited_with_reason() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;

        assert_auth_error!(harness.credentials.deactivate_key(&session.claims, 0).await, OnlyActiveKey);
        let event = harness.audit.events().into_iter().last().unwrap();
        assert_eq!(event.action, AuditAction::PublicKeyDeactivated);
        assert_eq!(event.status.reason(), Some("only_active_key"));
        assert_eq!(event.metadata_value("index"), Some("0"));
    }

    #[tokio::test]
    async fn test_profile_owner_and_admin() {
        let harness = Harness::with_admin().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;

        let profile = harness.credentials.profile(&session.claims, &alice.identity()).await.unwrap();
        assert_eq!(profile.identity, alice.identity());
        let read = harness.audit.events().into_iter().last().unwrap();
        assert_eq!(read.action, AuditAction::GetUserProfile);
        assert_eq!(read.status, AuditStatus::Success);

        let admin = harness.admin_session().await;
        let stranger = crate::testutil::EthKeypair::generate();
        assert_auth_error!(
            harness.credentials.profile(&admin.claims, &stranger.identity()).await,
            IdentityNotRegistered
        );
    }

    #[tokio::test]
    async fn test_certificate_not_issued() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let session = harness.login(&alice).await;

        let status = harness.credentials.certificate(&session.claims, &alice.identity()).await;
        assert_eq!(status.unwrap(), CertificateStatus::NotIssued);
        let event = harness.audit.events().into_iter().last().unwrap();
        assert_eq!(event.metadata_value("status"), Some("not_issued"));
    }
}
