//! # trustkey Authentication
//!
//! Wallet-signature login and identity credential lifecycle.
//!
//! This crate provides:
//! - **Challenge-response login**: single-use nonces signed with Ethereum `personal_sign`
//! - **Sessions**: short-lived EdDSA JWTs with a `user` or `admin` role
//! - **Key registry**: append-only key history with exactly one active key
//! - **Certificates**: issuance and revocation, revocation deactivating every key
//! - **Audit**: a structured event for every login step and credential change
//!
//! All durable state sits behind [`trustkey_storage::RecordStore`]; only
//! nonces live in process memory.
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use trustkey_authn::{AuthenticationFlow, CredentialLifecycleFlow, SessionIssuer};
//! use trustkey_storage::MemoryRecordStore;
//!
//! # async fn example(signature: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryRecordStore::new());
//! let sessions = Arc::new(SessionIssuer::generate("trustkey", Duration::from_secs(3600))?);
//! let auth = AuthenticationFlow::builder().store(store.clone()).sessions(sessions).build()?;
//! let credentials = CredentialLifecycleFlow::builder().store(store).build()?;
//!
//! let address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
//! let challenge = auth.request_challenge(address).await?;
//! // The wallet signs `challenge.nonce`.
//! let session = auth.verify(address, signature).await?;
//!
//! let claims = auth.authenticate(&format!("Bearer {}", session.token))?;
//! credentials.add_key(&claims, "0x04c0ffee").await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Audit events and sinks.
pub mod audit;
/// Certificate issuance and revocation.
pub mod certificate;
/// Engine configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Login and credential flows.
pub mod flow;
/// Public key registry.
pub mod keys;
/// Login nonces.
pub mod nonce;
/// Session tokens.
pub mod session;
/// `personal_sign` recovery.
pub mod signature;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, missing_docs)]
pub mod testutil;
mod timeout;
/// Input validation.
pub mod validation;

// Re-export key types for convenience
pub use audit::{
    ANONYMOUS_ACTOR, AuditAction, AuditEvent, AuditLogger, AuditStatus, NoopAuditLogger,
    TracingAuditLogger,
};
pub use certificate::{CertificateFields, CertificateLedger, CertificateStatus, Revocation};
pub use config::AuthConfig;
pub use error::{AuthError, ErrorCategory, Result};
pub use flow::{AuthenticationFlow, Challenge, CredentialLifecycleFlow, LoginStage};
pub use keys::KeyRegistry;
pub use nonce::{Nonce, NonceManager};
pub use session::{Role, SessionClaims, SessionIssuer, SessionToken, parse_bearer};
pub use signature::{PersonalSignVerifier, SignatureVerifier};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
