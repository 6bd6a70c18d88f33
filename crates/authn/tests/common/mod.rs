//! Helpers shared by the integration tests.
#![allow(dead_code, clippy::expect_used)]

use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use parking_lot::Mutex;
use rand_core::OsRng;
use trustkey_authn::{
    AuditAction, AuditEvent, AuditLogger, AuthConfig, AuthenticationFlow,
    CredentialLifecycleFlow, SessionIssuer, SessionToken,
    signature::{identity_from_verifying_key, personal_message_hash},
};
use trustkey_storage::{Identity, IdentityProfile, MemoryRecordStore};

/// A browser-style wallet.
pub struct Wallet {
    key: SigningKey,
    identity: Identity,
}

impl Wallet {
    pub fn generate() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let identity = identity_from_verifying_key(key.verifying_key());
        Self { key, identity }
    }

    pub fn identity(&self) -> Identity {
        self.identity.clone()
    }

    pub fn address(&self) -> &str {
        self.identity.as_str()
    }

    pub fn public_key(&self) -> String {
        format!("0x{}", hex::encode(self.key.verifying_key().to_encoded_point(false)))
    }

    /// `personal_sign` over `message`, with `v` in {27, 28}.
    pub fn sign(&self, message: &str) -> String {
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&personal_message_hash(message))
            .expect("sign prehash");
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAudit {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events.lock().iter().map(|e| e.action).collect()
    }
}

#[async_trait]
impl AuditLogger for RecordingAudit {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

pub struct Fixture {
    pub store: Arc<MemoryRecordStore>,
    pub audit: Arc<RecordingAudit>,
    pub sessions: Arc<SessionIssuer>,
    pub auth: AuthenticationFlow,
    pub credentials: CredentialLifecycleFlow,
    pub admin: Wallet,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(|admin| AuthConfig::builder().admins(vec![admin]).build().expect("config"))
    }

    /// Builds a fixture from the configuration `config` returns for the
    /// admin wallet's identity. The admin wallet is registered either way.
    pub fn with(config: impl FnOnce(Identity) -> AuthConfig) -> Self {
        let admin = Wallet::generate();
        let config = config(admin.identity());

        let store = Arc::new(MemoryRecordStore::new());
        let audit = Arc::new(RecordingAudit::default());
        let sessions = Arc::new(
            SessionIssuer::generate(config.session_issuer(), config.session_ttl())
                .expect("session issuer"),
        );
        let auth = AuthenticationFlow::builder()
            .store(store.clone())
            .sessions(sessions.clone())
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

        let fixture = Self { store, audit, sessions, auth, credentials, admin };
        fixture.enroll(&fixture.admin, "admin");
        fixture
    }

    /// Registers a new wallet with its public key as the initial key.
    pub fn register(&self, username: &str) -> Wallet {
        let wallet = Wallet::generate();
        self.enroll(&wallet, username);
        wallet
    }

    fn enroll(&self, wallet: &Wallet, username: &str) {
        let profile = IdentityProfile::builder()
            .identity(wallet.identity())
            .username(username)
            .email(format!("{username}@example.com"))
            .build();
        self.store.register(profile, Some(wallet.public_key())).expect("register");
    }

    pub async fn login(&self, wallet: &Wallet) -> SessionToken {
        let challenge = self.auth.request_challenge(wallet.address()).await.expect("challenge");
        self.auth.verify(wallet.address(), &wallet.sign(&challenge.nonce)).await.expect("login")
    }

    pub async fn admin_session(&self) -> SessionToken {
        self.login(&self.admin).await
    }
}
