//! Challenge-response login.
//!
//! ```text
//! request_challenge ──► ChallengeRequested ──► SignaturePending
//!                                                   │ verify
//!                                                   ▼
//!                                 Verified ──► SessionIssued
//! ```
//!
//! Every exit, successful or not, produces a `login` or `nonce_issued`
//! audit record carrying the stage it ended in.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use fail::fail_point;
use trustkey_storage::{Identity, RecordStore};

use crate::{
    audit::{ANONYMOUS_ACTOR, AuditAction, AuditEvent, AuditLogger, AuditStatus, TracingAuditLogger},
    config::AuthConfig,
    error::{AuthError, Result},
    nonce::NonceManager,
    session::{Role, SessionClaims, SessionIssuer, SessionToken},
    signature::{PersonalSignVerifier, SignatureVerifier},
};

/// Stage of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginStage {
    /// A challenge was requested and is being issued.
    ChallengeRequested,
    /// A challenge is outstanding; the signature is being checked.
    SignaturePending,
    /// The signature matched the claimed identity.
    Verified,
    /// A session token was minted.
    SessionIssued,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChallengeRequested => write!(f, "challenge_requested"),
            Self::SignaturePending => write!(f, "signature_pending"),
            Self::Verified => write!(f, "verified"),
            Self::SessionIssued => write!(f, "session_issued"),
        }
    }
}

/// A challenge for the client to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Identity the challenge belongs to.
    pub identity: Identity,
    /// The message to sign with `personal_sign`.
    pub nonce: String,
    /// When the challenge stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Turns a signed challenge into a session token.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use trustkey_authn::{AuthenticationFlow, SessionIssuer};
/// use trustkey_storage::MemoryRecordStore;
///
/// # async fn example(signature: &str) -> Result<(), Box<dyn std::error::Error>> {
/// let flow = AuthenticationFlow::builder()
///     .store(Arc::new(MemoryRecordStore::new()))
///     .sessions(Arc::new(SessionIssuer::generate("trustkey", std::time::Duration::from_secs(3600))?))
///     .build()?;
///
/// let challenge = flow.request_challenge("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").await?;
/// // The client signs `challenge.nonce` with its wallet.
/// let session = flow.verify("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed", signature).await?;
/// println!("token: {}", session.token);
/// # Ok(())
/// # }
/// ```
pub struct AuthenticationFlow {
    nonces: NonceManager,
    verifier: Arc<dyn SignatureVerifier>,
    sessions: Arc<SessionIssuer>,
    audit: Arc<dyn AuditLogger>,
    admins: Vec<Identity>,
}

#[bon::bon]
impl AuthenticationFlow {
    /// Creates a login flow.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `config` fails validation.
    #[builder]
    pub fn new(
        store: Arc<dyn RecordStore>,
        sessions: Arc<SessionIssuer>,
        #[builder(default = Arc::new(TracingAuditLogger))] audit: Arc<dyn AuditLogger>,
        #[builder(default = Arc::new(PersonalSignVerifier))] verifier: Arc<dyn SignatureVerifier>,
        #[builder(default)] config: AuthConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            nonces: NonceManager::new(store, &config),
            verifier,
            sessions,
            audit,
            admins: config.admins().to_vec(),
        })
    }

    /// Issues a challenge for a registered identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidIdentity`] if `claimed` is not an address
    /// - [`AuthError::UnregisteredIdentity`] if the identity is not registered
    /// - [`AuthError::Storage`] if the registration check fails
    #[tracing::instrument(skip(self))]
    pub async fn request_challenge(&self, claimed: &str) -> Result<Challenge> {
        let identity = match Identity::parse(claimed) {
            Ok(identity) => identity,
            Err(_) => {
                let err = AuthError::InvalidIdentity;
                self.login_failed(claimed, LoginStage::ChallengeRequested, &err).await;
                return Err(err);
            },
        };

        match self.nonces.issue(&identity).await {
            Ok(nonce) => {
                let event = AuditEvent::builder()
                    .actor(ANONYMOUS_ACTOR)
                    .action(AuditAction::NonceIssued)
                    .identity(identity.as_str())
                    .status(AuditStatus::Pending)
                    .metadata(HashMap::from([
                        ("stage".to_owned(), LoginStage::SignaturePending.to_string()),
                        ("expires_at".to_owned(), nonce.expires_at.to_rfc3339()),
                    ]))
                    .build();
                self.audit.log(&event).await;
                Ok(Challenge { identity, nonce: nonce.value, expires_at: nonce.expires_at })
            },
            Err(err) => {
                self.login_failed(identity.as_str(), LoginStage::ChallengeRequested, &err).await;
                Err(err)
            },
        }
    }

    /// Completes a login against the identity's live challenge.
    ///
    /// The challenge is consumed before the signature is checked, so it is
    /// gone whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NonceExpiredOrMissing`] if no challenge is live
    /// - [`AuthError::MalformedSignature`] if the signature is undecodable
    /// - [`AuthError::SignatureMismatch`] if another key signed the challenge
    pub async fn verify(&self, claimed: &str, signature: &str) -> Result<SessionToken> {
        self.complete(claimed, None, signature).await
    }

    /// Like [`verify`](Self::verify), but also requires the client to echo
    /// the challenge it signed. A superseded challenge fails with
    /// [`AuthError::NonceExpiredOrMissing`].
    ///
    /// # Errors
    ///
    /// As [`verify`](Self::verify).
    pub async fn verify_with_nonce(
        &self,
        claimed: &str,
        nonce: &str,
        signature: &str,
    ) -> Result<SessionToken> {
        self.complete(claimed, Some(nonce), signature).await
    }

    /// Verifies the bearer token of an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// See [`SessionIssuer::authenticate`].
    pub fn authenticate(&self, authorization: &str) -> Result<SessionClaims> {
        self.sessions.authenticate(authorization)
    }

    /// Role granted to `identity` at login.
    #[must_use]
    pub fn role_for(&self, identity: &Identity) -> Role {
        if self.admins.contains(identity) { Role::Admin } else { Role::User }
    }

    #[tracing::instrument(skip(self, presented, signature))]
    async fn complete(
        &self,
        claimed: &str,
        presented: Option<&str>,
        signature: &str,
    ) -> Result<SessionToken> {
        let identity = match Identity::parse(claimed) {
            Ok(identity) => identity,
            Err(_) => {
                let err = AuthError::InvalidIdentity;
                self.login_failed(claimed, LoginStage::SignaturePending, &err).await;
                return Err(err);
            },
        };

        match self.attempt(&identity, presented, signature).await {
            Ok(session) => {
                tracing::debug!(identity = %identity, role = %session.claims.role, "login succeeded");
                let event = AuditEvent::builder()
                    .actor(identity.as_str())
                    .action(AuditAction::Login)
                    .identity(identity.as_str())
                    .status(AuditStatus::Success)
                    .metadata(HashMap::from([
                        ("stage".to_owned(), LoginStage::SessionIssued.to_string()),
                        ("role".to_owned(), session.claims.role.to_string()),
                    ]))
                    .build();
                self.audit.log(&event).await;
                Ok(session)
            },
            Err((stage, err)) => {
                self.login_failed(identity.as_str(), stage, &err).await;
                Err(err)
            },
        }
    }

    async fn attempt(
        &self,
        identity: &Identity,
        presented: Option<&str>,
        signature: &str,
    ) -> std::result::Result<SessionToken, (LoginStage, AuthError)> {
        let pending = |err| (LoginStage::SignaturePending, err);

        let nonce = self.nonces.consume(identity, presented).await.map_err(pending)?;

        fail_point!("authn-after-nonce-consume", |_| {
            Err(pending(AuthError::Storage(trustkey_storage::StorageError::internal(
                "injected failure after nonce consume",
            ))))
        });

        let recovered = self.verifier.recover(&nonce.value, signature).map_err(pending)?;
        if &recovered != identity {
            return Err(pending(AuthError::SignatureMismatch));
        }

        let role = self.role_for(identity);
        self.sessions.mint(identity, role).map_err(|err| (LoginStage::Verified, err))
    }

    async fn login_failed(&self, identity: &str, stage: LoginStage, err: &AuthError) {
        tracing::warn!(stage = %stage, reason = err.reason(), "login attempt failed");
        let event = AuditEvent::builder()
            .actor(ANONYMOUS_ACTOR)
            .action(AuditAction::Login)
            .identity(identity)
            .status(AuditStatus::Failure(err.reason().to_owned()))
            .metadata(HashMap::from([("stage".to_owned(), stage.to_string())]))
            .build();
        self.audit.log(&event).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{
        assert_auth_error,
        testutil::{EthKeypair, Harness},
    };

    #[tokio::test]
    async fn test_login_round_trip() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;

        let challenge = harness.auth.request_challenge(alice.address()).await.unwrap();
        assert_eq!(challenge.identity, alice.identity());

        let session =
            harness.auth.verify(alice.address(), &alice.sign(&challenge.nonce)).await.unwrap();
        assert_eq!(session.claims.sub, alice.identity());
        assert_eq!(session.claims.role, Role::User);
        assert_eq!(harness.auth.authenticate(&format!("Bearer {}", session.token)).unwrap(), session.claims);
    }

    #[tokio::test]
    async fn test_claimed_identity_is_case_insensitive() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let shouting = format!("0x{}", alice.address()[2..].to_uppercase());

        let challenge = harness.auth.request_challenge(&shouting).await.unwrap();
        let session = harness.auth.verify(&shouting, &alice.sign(&challenge.nonce)).await;
        assert!(session.is_ok());
    }

    #[tokio::test]
    async fn test_configured_admin_gets_admin_role() {
        let admin = EthKeypair::generate();
        let config = AuthConfig::builder().admins(vec![admin.identity()]).build().unwrap();
        let harness = Harness::with_config(config).await;
        harness.register_keypair(&admin, 1);

        let challenge = harness.auth.request_challenge(admin.address()).await.unwrap();
        let session = harness.auth.verify(admin.address(), &admin.sign(&challenge.nonce)).await.unwrap();
        assert_eq!(session.claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_unregistered_is_audited_with_reason() {
        let harness = Harness::new().await;
        let stranger = EthKeypair::generate();

        assert_auth_error!(
            harness.auth.request_challenge(stranger.address()).await,
            UnregisteredIdentity
        );
        let events = harness.audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Login);
        assert_eq!(events[0].status.reason(), Some("unregistered_user"));
        assert_eq!(events[0].metadata_value("stage"), Some("challenge_requested"));
    }

    #[tokio::test]
    async fn test_malformed_identity() {
        let harness = Harness::new().await;
        assert_auth_error!(harness.auth.request_challenge("alice").await, InvalidIdentity);
        assert_auth_error!(harness.auth.verify("0x12", "0x00").await, InvalidIdentity);
    }

    #[tokio::test]
    async fn test_malformed_signature_consumes_nonce() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let challenge = harness.auth.request_challenge(alice.address()).await.unwrap();

        assert_auth_error!(harness.auth.verify(alice.address(), "0xnothex").await, MalformedSignature);
        assert_auth_error!(
            harness.auth.verify(alice.address(), &alice.sign(&challenge.nonce)).await,
            NonceExpiredOrMissing
        );
        let reasons: Vec<_> =
            harness.audit.events().iter().filter_map(|e| e.status.reason().map(str::to_owned)).collect();
        assert_eq!(reasons, vec!["invalid_signature", "invalid_nonce"]);
    }

    #[tokio::test]
    async fn test_verify_with_stale_nonce_fails() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        let first = harness.auth.request_challenge(alice.address()).await.unwrap();
        let _second = harness.auth.request_challenge(alice.address()).await.unwrap();

        assert_auth_error!(
            harness
                .auth
                .verify_with_nonce(alice.address(), &first.nonce, &alice.sign(&first.nonce))
                .await,
            NonceExpiredOrMissing
        );
    }

    #[tokio::test]
    async fn test_challenge_audit_is_pending() {
        let harness = Harness::new().await;
        let alice = harness.register(1).await;
        harness.auth.request_challenge(alice.address()).await.unwrap();

        let events = harness.audit.events();
        assert_eq!(events[0].action, AuditAction::NonceIssued);
        assert_eq!(events[0].status, AuditStatus::Pending);
        assert_eq!(events[0].metadata_value("stage"), Some("signature_pending"));
    }

    #[test]
    fn test_login_stage_display() {
        assert_eq!(LoginStage::ChallengeRequested.to_string(), "challenge_requested");
        assert_eq!(LoginStage::SignaturePending.to_string(), "signature_pending");
        assert_eq!(LoginStage::Verified.to_string(), "verified");
        assert_eq!(LoginStage::SessionIssued.to_string(), "session_issued");
    }
}
