//! Signed session tokens.
//!
//! A successful login yields an EdDSA (Ed25519) JWT asserting the identity
//! and its role. Tokens are stateless: validity is decided by signature,
//! issuer and expiry alone, and expiry is fixed when the token is minted.
//! There is no server-side revocation list, so a token outlives a
//! certificate revocation until it expires.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use trustkey_authn::session::{Role, SessionIssuer};
//! use trustkey_storage::Identity;
//!
//! let issuer = SessionIssuer::generate("trustkey", Duration::from_secs(3600)).unwrap();
//! let alice = Identity::parse("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
//!
//! let session = issuer.mint(&alice, Role::User).unwrap();
//! let claims = issuer.verify(&session.token).unwrap();
//! assert_eq!(claims.sub, alice);
//! assert_eq!(claims.role, Role::User);
//! ```

use std::{fmt, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use trustkey_storage::Identity;
use zeroize::Zeroizing;

use crate::{
    config::AuthConfig,
    error::{AuthError, Result},
    nonce::random_hex,
    validation::validate_algorithm,
};

/// PKCS#8 v1 prefix of an Ed25519 private key (RFC 8410).
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
];

/// Capability carried by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular identity holder.
    User,
    /// Administrator.
    Admin,
}

impl Role {
    /// Lowercase name as carried in the token.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Issuer.
    pub iss: String,
    /// The authenticated identity.
    pub sub: Identity,
    /// Capability of the session.
    pub role: Role,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Unique token id.
    pub jti: String,
}

impl SessionClaims {
    /// The authenticated identity.
    #[must_use]
    pub fn identity(&self) -> &Identity {
        &self.sub
    }

    /// Returns `true` for admin sessions.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.exp).ok().and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Capability gate: admins satisfy every role, users only `User`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] if the session lacks `required`.
    pub fn require_role(&self, required: Role) -> Result<()> {
        match (required, self.role) {
            (Role::User, _) | (Role::Admin, Role::Admin) => Ok(()),
            (Role::Admin, Role::User) => Err(AuthError::forbidden("admin")),
        }
    }

    /// Allows the session's own identity or any admin.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] for a user session acting on another
    /// identity.
    pub fn require_owner_or_admin(&self, target: &Identity) -> Result<()> {
        if &self.sub == target || self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::forbidden("owner or admin"))
        }
    }
}

/// A minted session token and its claims.
#[derive(Debug, Clone)]
pub struct SessionToken {
    /// Compact JWS serialization.
    pub token: String,
    /// Claims encoded in the token.
    pub claims: SessionClaims,
}

/// Mints and verifies session tokens.
pub struct SessionIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl fmt::Debug for SessionIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIssuer")
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SessionIssuer {
    /// Creates an issuer signing with `signing_key`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenEncoding`] if the key cannot be loaded.
    pub fn new(signing_key: &SigningKey, issuer: impl Into<String>, ttl: Duration) -> Result<Self> {
        let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
        let mut pkcs8_der = Zeroizing::new(ED25519_PKCS8_PREFIX.to_vec());
        pkcs8_der.extend_from_slice(&*private_bytes);

        let encoding_key = EncodingKey::from_ed_der(&pkcs8_der);
        let public_key = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());
        let decoding_key = DecodingKey::from_ed_components(&public_key)
            .map_err(|e| AuthError::TokenEncoding(format!("invalid verifying key: {e}")))?;

        Ok(Self { encoding_key, decoding_key, issuer: issuer.into(), ttl })
    }

    /// Creates an issuer with a fresh random signing key.
    ///
    /// Tokens minted by it do not survive a restart.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenEncoding`] if the key cannot be loaded.
    pub fn generate(issuer: impl Into<String>, ttl: Duration) -> Result<Self> {
        Self::new(&SigningKey::generate(&mut OsRng), issuer, ttl)
    }

    /// Creates an issuer with the issuer name and lifetime from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenEncoding`] if the key cannot be loaded.
    pub fn from_config(signing_key: &SigningKey, config: &AuthConfig) -> Result<Self> {
        Self::new(signing_key, config.session_issuer(), config.session_ttl())
    }

    /// The `iss` claim of minted tokens.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mints a token for `identity` expiring one TTL from now.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenEncoding`] if signing fails.
    pub fn mint(&self, identity: &Identity, role: Role) -> Result<SessionToken> {
        let iat = u64::try_from(Utc::now().timestamp())
            .map_err(|_| AuthError::TokenEncoding("clock before epoch".into()))?;
        let claims = SessionClaims {
            iss: self.issuer.clone(),
            sub: identity.clone(),
            role,
            iat,
            exp: iat.saturating_add(self.ttl.as_secs()),
            jti: random_hex(16),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::EdDSA), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenEncoding(e.to_string()))?;

        tracing::debug!(identity = %identity, role = %role, exp = claims.exp, "session minted");
        Ok(SessionToken { token, claims })
    }

    /// Verifies a token and returns its claims.
    ///
    /// Checks, in order: the header algorithm against the accepted and
    /// forbidden lists, the signature, the issuer, and expiry with no leeway.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidOrExpiredToken`] for every failure.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "undecodable token header");
            AuthError::InvalidOrExpiredToken
        })?;
        validate_algorithm(&format!("{:?}", header.alg)).map_err(|e| {
            tracing::warn!(error = %e, "token algorithm rejected");
            AuthError::InvalidOrExpiredToken
        })?;

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<SessionClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "token rejected");
            AuthError::InvalidOrExpiredToken
        })?;
        Ok(data.claims)
    }

    /// Verifies the bearer token in an `Authorization` header value.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidAuthorizationHeader`] for a malformed
    /// header and [`AuthError::InvalidOrExpiredToken`] for a bad token.
    pub fn authenticate(&self, authorization: &str) -> Result<SessionClaims> {
        self.verify(parse_bearer(authorization)?)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme is case-insensitive.
///
/// # Errors
///
/// Returns [`AuthError::InvalidAuthorizationHeader`] if the scheme is not
/// `Bearer` or the token is missing.
///
/// # Examples
///
/// ```
/// use trustkey_authn::session::parse_bearer;
///
/// assert_eq!(parse_bearer("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
/// assert!(parse_bearer("Basic dXNlcjpwdw==").is_err());
/// ```
pub fn parse_bearer(authorization: &str) -> Result<&str> {
    let (scheme, token) =
        authorization.trim().split_once(' ').ok_or(AuthError::InvalidAuthorizationHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer")
        || token.is_empty()
        || token.contains(char::is_whitespace)
    {
        return Err(AuthError::InvalidAuthorizationHeader);
    }
    Ok(token)
}
