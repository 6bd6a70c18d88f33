//! Audit trail for authentication and credential lifecycle events.
//!
//! Every login transition and every credential mutation produces one
//! [`AuditEvent`]: who acted, on which identity, what happened and how it
//! ended. Failed authentication carries the machine-readable reason from
//! [`AuthError::reason`](crate::AuthError::reason) so security monitoring can
//! tell replay from spoofing.
//!
//! The sink is fire-and-forget: [`AuditLogger::log`] returns nothing, and a
//! delivery problem must never fail the operation being audited.
//!
//! # Usage
//!
//! ```no_run
//! use trustkey_authn::audit::{AuditAction, AuditEvent, AuditLogger, AuditStatus, TracingAuditLogger};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
//!     .action(AuditAction::Login)
//!     .identity("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")
//!     .status(AuditStatus::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Actor recorded for events triggered before the caller is authenticated.
pub const ANONYMOUS_ACTOR: &str = "anonymous";

/// Audited event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    /// A login challenge was issued.
    NonceIssued,
    /// A login attempt completed or failed.
    Login,
    /// An admin capability was exercised.
    AdminAccess,
    /// A capability gate refused the caller.
    AccessDenied,
    /// A public key was appended.
    PublicKeyAdded,
    /// A public key was deactivated.
    PublicKeyDeactivated,
    /// A certificate was issued.
    CertificateCreated,
    /// A certificate was revoked.
    CertificateRevoked,
    /// An identity's key history was read.
    GetUserPublicKeys,
    /// An identity's certificate was read.
    GetUserCertificate,
    /// An identity's registration profile was read.
    GetUserProfile,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonceIssued => write!(f, "nonce_issued"),
            Self::Login => write!(f, "login"),
            Self::AdminAccess => write!(f, "admin_access"),
            Self::AccessDenied => write!(f, "access_denied"),
            Self::PublicKeyAdded => write!(f, "public_key_added"),
            Self::PublicKeyDeactivated => write!(f, "public_key_deactivated"),
            Self::CertificateCreated => write!(f, "certificate_created"),
            Self::CertificateRevoked => write!(f, "certificate_revoked"),
            Self::GetUserPublicKeys => write!(f, "get_user_public_keys"),
            Self::GetUserCertificate => write!(f, "get_user_certificate"),
            Self::GetUserProfile => write!(f, "get_user_profile"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditStatus {
    /// Operation completed successfully.
    Success,
    /// Operation started and awaits a follow-up (a challenge awaiting its signature).
    Pending,
    /// Operation failed with the given machine-readable reason.
    Failure(String),
}

impl AuditStatus {
    /// Returns the failure reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failure(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Pending => write!(f, "pending"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit record.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity of the caller, or [`ANONYMOUS_ACTOR`].
    #[builder(into)]
    pub actor: String,
    /// The event type.
    pub action: AuditAction,
    /// Identity the event concerns.
    #[builder(into)]
    pub identity: String,
    /// Outcome.
    pub status: AuditStatus,
    /// Additional context (stage, key index, serial number, reason).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    /// Returns a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// Audit log sink.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    ///
    /// Implementations surface delivery failures through tracing; they never
    /// return them.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events at INFO.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who acted
/// - `audit.action`: the event type (e.g. `login`)
/// - `audit.identity`: the identity concerned
/// - `audit.status`: `success`, `pending` or `failure: <reason>`
/// - `audit.metadata`: `key=value` pairs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let mut pairs: Vec<_> = event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        let metadata_str = pairs.join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.identity = %event.identity,
            audit.status = %event.status,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// Audit logger that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}
