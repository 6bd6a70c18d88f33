//! Shared test utilities for authentication testing.
//!
//! Wallet key pairs that sign like a browser wallet, raw JWT crafting for
//! attack tests, an audit sink that records events, a store that never
//! answers in time, and a [`Harness`] wiring both flows over a
//! [`MemoryRecordStore`]. Feature-gated behind `testutil` so none of it
//! reaches production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! trustkey-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use trustkey_authn::testutil::{EthKeypair, Harness};
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use k256::ecdsa::SigningKey;
use parking_lot::Mutex;
use rand_core::OsRng;
use trustkey_storage::{
    Certificate, Identity, IdentityProfile, MemoryRecordStore, Mutation, MutationOutcome,
    PublicKeyRecord, RecordStore, StorageResult,
};

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger},
    config::AuthConfig,
    flow::{AuthenticationFlow, CredentialLifecycleFlow},
    session::{SessionIssuer, SessionToken},
    signature::{identity_from_verifying_key, personal_message_hash},
};

/// A secp256k1 wallet key and the identity it controls.
#[derive(Clone)]
pub struct EthKeypair {
    signing_key: SigningKey,
    identity: Identity,
}

impl EthKeypair {
    /// Generates a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let identity = identity_from_verifying_key(signing_key.verifying_key());
        Self { signing_key, identity }
    }

    /// The identity this key controls.
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity.clone()
    }

    /// The identity as a lowercase address string.
    #[must_use]
    pub fn address(&self) -> &str {
        self.identity.as_str()
    }

    /// The underlying signing key.
    #[must_use]
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Uncompressed public key, `0x`-prefixed hex.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.signing_key.verifying_key().to_encoded_point(false)))
    }

    /// Signs `message` with `personal_sign`.
    #[must_use]
    pub fn sign(&self, message: &str) -> String {
        sign_personal_message(&self.signing_key, message)
    }
}

impl std::fmt::Debug for EthKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EthKeypair").field("identity", &self.identity).finish_non_exhaustive()
    }
}

/// Produces a `personal_sign` signature: `0x` ‖ hex(r ‖ s ‖ v) with `v` in {27, 28}.
///
/// # Panics
///
/// Panics if signing fails (cannot happen for a 32-byte digest).
pub fn sign_personal_message(key: &SigningKey, message: &str) -> String {
    let hash = personal_message_hash(message);
    let (signature, recovery_id) =
        key.sign_prehash_recoverable(&hash).expect("prehash signing with a valid digest");
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    format!("0x{}", hex::encode(bytes))
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The result is `{header_b64}.{payload_b64}.` with an empty signature, for
/// testing rejection of `alg: "none"` and other forged tokens.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Audit logger that keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Actions of recorded events in emission order.
    #[must_use]
    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|event| event.action).collect()
    }

    /// Drops every recorded event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl AuditLogger for MemoryAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Record store that sleeps for a fixed delay before every call, then
/// answers as an empty store.
#[derive(Debug)]
pub struct SlowStore {
    delay: Duration,
    inner: MemoryRecordStore,
}

impl SlowStore {
    /// Creates a store that delays every call by `delay`.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay, inner: MemoryRecordStore::new() }
    }
}

#[async_trait]
impl RecordStore for SlowStore {
    async fn is_identity_registered(&self, identity: &Identity) -> StorageResult<bool> {
        tokio::time::sleep(self.delay).await;
        self.inner.is_identity_registered(identity).await
    }

    async fn read_keys(&self, identity: &Identity) -> StorageResult<Vec<PublicKeyRecord>> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_keys(identity).await
    }

    async fn read_certificate(&self, identity: &Identity) -> StorageResult<Option<Certificate>> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_certificate(identity).await
    }

    async fn apply_mutation(&self, mutation: &Mutation) -> StorageResult<MutationOutcome> {
        tokio::time::sleep(self.delay).await;
        self.inner.apply_mutation(mutation).await
    }

    async fn read_profile(&self, identity: &Identity) -> StorageResult<Option<IdentityProfile>> {
        tokio::time::sleep(self.delay).await;
        self.inner.read_profile(identity).await
    }

    async fn list_identities(&self) -> StorageResult<Vec<Identity>> {
        tokio::time::sleep(self.delay).await;
        self.inner.list_identities().await
    }
}

/// Both flows wired over one [`MemoryRecordStore`] with a recording audit
/// sink.
pub struct Harness {
    /// The shared record store.
    pub store: Arc<MemoryRecordStore>,
    /// Every audit event either flow emitted.
    pub audit: Arc<MemoryAuditLogger>,
    /// Login flow.
    pub auth: AuthenticationFlow,
    /// Key and certificate flow.
    pub credentials: CredentialLifecycleFlow,
    admin: Option<EthKeypair>,
}

impl Harness {
    /// Harness with the default configuration.
    pub async fn new() -> Self {
        Self::with_config(AuthConfig::default()).await
    }

    /// Harness with a registered admin, reachable through
    /// [`admin_session`](Self::admin_session).
    ///
    /// # Panics
    ///
    /// Panics if the configuration is rejected.
    pub async fn with_admin() -> Self {
        let admin = EthKeypair::generate();
        let config = AuthConfig::builder().admins(vec![admin.identity()]).build().expect("config");
        let mut harness = Self::with_config(config).await;
        harness.register_keypair(&admin, 0);
        harness.admin = Some(admin);
        harness
    }

    /// Harness with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is rejected.
    pub async fn with_config(config: AuthConfig) -> Self {
        let store = Arc::new(MemoryRecordStore::new());
        let audit = Arc::new(MemoryAuditLogger::new());
        let sessions = Arc::new(
            SessionIssuer::generate(config.session_issuer(), config.session_ttl())
                .expect("session issuer"),
        );
        let auth = AuthenticationFlow::builder()
            .store(store.clone())
            .sessions(sessions)
            .audit(audit.clone())
            .config(config.clone())
            .build()
            .expect("authentication flow");
        let credentials = CredentialLifecycleFlow::builder()
            .store(store.clone())
            .audit(audit.clone())
            .config(config)
            .build()
            .expect("credential flow");
        Self { store, audit, auth, credentials, admin: None }
    }

    /// Registers a fresh wallet whose public key is its initial active key.
    pub async fn register(&self, n: u8) -> EthKeypair {
        let keypair = EthKeypair::generate();
        self.register_keypair(&keypair, n);
        keypair
    }

    /// Registers `keypair` with its public key as initial active key.
    ///
    /// # Panics
    ///
    /// Panics if the identity is already registered.
    pub fn register_keypair(&self, keypair: &EthKeypair, n: u8) {
        let profile = IdentityProfile::builder()
            .identity(keypair.identity())
            .username(format!("user{n}"))
            .email(format!("user{n}@example.com"))
            .build();
        self.store.register(profile, Some(keypair.public_key_hex())).expect("register");
    }

    /// Runs a full challenge-response login.
    ///
    /// # Panics
    ///
    /// Panics if any login step fails.
    pub async fn login(&self, keypair: &EthKeypair) -> SessionToken {
        let challenge = self.auth.request_challenge(keypair.address()).await.expect("challenge");
        self.auth.verify(keypair.address(), &keypair.sign(&challenge.nonce)).await.expect("login")
    }

    /// Logs in as the configured admin.
    ///
    /// # Panics
    ///
    /// Panics unless built with [`with_admin`](Self::with_admin).
    pub async fn admin_session(&self) -> SessionToken {
        let admin = self.admin.as_ref().expect("harness built without admin");
        self.login(admin).await
    }
}

/// Asserts that a [`Result<T, AuthError>`](crate::error::AuthError) is an
/// `Err` matching the given variant.
///
/// The result expression is evaluated once.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use trustkey_authn::{AuthError, assert_auth_error};
///
/// let result: Result<(), AuthError> = Err(AuthError::OnlyActiveKey);
/// assert_auth_error!(result, OnlyActiveKey);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            result,
        );
    }};
    ($result:expr, $variant:ident, $msg:expr) => {{
        let result = $result;
        assert!(
            matches!(result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            result,
        );
    }};
}
