//! Configuration for the authentication engine.
//!
//! [`AuthConfig`] is either deserialized (durations in humantime form such
//! as `"5m"`) or built through the validated builder:
//!
//! ```
//! use std::time::Duration;
//! use trustkey_authn::AuthConfig;
//!
//! let config = AuthConfig::builder()
//!     .session_ttl(Duration::from_secs(900))
//!     .session_issuer("trustkey-test")
//!     .build()
//!     .unwrap();
//! assert_eq!(config.nonce_ttl(), Duration::from_secs(300));
//!
//! let config: AuthConfig =
//!     serde_json::from_str(r#"{ "nonce_ttl": "2m", "session_issuer": "trustkey" }"#).unwrap();
//! assert!(config.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trustkey_storage::{ConfigError, DEFAULT_SIGNATURE_ALGORITHM, Identity};

/// Default lifetime of a login nonce.
pub const DEFAULT_NONCE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default bound on outstanding nonces.
pub const DEFAULT_NONCE_CAPACITY: u64 = 100_000;

/// Default prefix of a nonce value.
pub const DEFAULT_NONCE_PREFIX: &str = "trustkey-login-";

/// Default lifetime of a session token.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);

/// Default `iss` claim of session tokens.
pub const DEFAULT_SESSION_ISSUER: &str = "trustkey";

/// Default bound on a single record store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(with = "humantime_serde", default = "default_nonce_ttl")]
    nonce_ttl: Duration,

    #[serde(default = "default_nonce_capacity")]
    nonce_capacity: u64,

    #[serde(default = "default_nonce_prefix")]
    nonce_prefix: String,

    #[serde(with = "humantime_serde", default = "default_session_ttl")]
    session_ttl: Duration,

    #[serde(default = "default_session_issuer")]
    session_issuer: String,

    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    store_timeout: Duration,

    /// Identities minted with the admin role.
    #[serde(default)]
    admins: Vec<Identity>,

    #[serde(default = "default_signature_algorithm")]
    default_signature_algorithm: String,
}

fn default_nonce_ttl() -> Duration {
    DEFAULT_NONCE_TTL
}

fn default_nonce_capacity() -> u64 {
    DEFAULT_NONCE_CAPACITY
}

fn default_nonce_prefix() -> String {
    DEFAULT_NONCE_PREFIX.to_owned()
}

fn default_session_ttl() -> Duration {
    DEFAULT_SESSION_TTL
}

fn default_session_issuer() -> String {
    DEFAULT_SESSION_ISSUER.to_owned()
}

fn default_store_timeout() -> Duration {
    DEFAULT_STORE_TIMEOUT
}

fn default_signature_algorithm() -> String {
    DEFAULT_SIGNATURE_ALGORITHM.to_owned()
}

#[bon::bon]
impl AuthConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any check in [`validate`](Self::validate) fails.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_NONCE_TTL)] nonce_ttl: Duration,
        #[builder(default = DEFAULT_NONCE_CAPACITY)] nonce_capacity: u64,
        #[builder(into, default = DEFAULT_NONCE_PREFIX.to_owned())] nonce_prefix: String,
        #[builder(default = DEFAULT_SESSION_TTL)] session_ttl: Duration,
        #[builder(into, default = DEFAULT_SESSION_ISSUER.to_owned())] session_issuer: String,
        #[builder(default = DEFAULT_STORE_TIMEOUT)] store_timeout: Duration,
        #[builder(default)] admins: Vec<Identity>,
        #[builder(into, default = DEFAULT_SIGNATURE_ALGORITHM.to_owned())]
        default_signature_algorithm: String,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            nonce_ttl,
            nonce_capacity,
            nonce_prefix,
            session_ttl,
            session_issuer,
            store_timeout,
            admins,
            default_signature_algorithm,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every field.
    ///
    /// Deserialized configurations are not validated until this runs; the
    /// flow constructors call it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] for a zero duration or capacity
    /// and [`ConfigError::Invalid`] for a blank issuer or signature algorithm.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("nonce_ttl", self.nonce_ttl),
            ("session_ttl", self.session_ttl),
            ("store_timeout", self.store_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::BelowMinimum {
                    field,
                    min: "1ms".into(),
                    value: format!("{value:?}"),
                });
            }
        }
        if self.nonce_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "nonce_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if self.session_issuer.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "session_issuer",
                reason: "must not be empty".into(),
            });
        }
        if self.default_signature_algorithm.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "default_signature_algorithm",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Lifetime of a login nonce.
    #[must_use]
    pub fn nonce_ttl(&self) -> Duration {
        self.nonce_ttl
    }

    /// Maximum number of outstanding nonces.
    #[must_use]
    pub fn nonce_capacity(&self) -> u64 {
        self.nonce_capacity
    }

    /// Prefix of every nonce value.
    #[must_use]
    pub fn nonce_prefix(&self) -> &str {
        &self.nonce_prefix
    }

    /// Lifetime of a session token.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// `iss` claim of session tokens.
    #[must_use]
    pub fn session_issuer(&self) -> &str {
        &self.session_issuer
    }

    /// Bound on each record store call.
    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
    }

    /// Identities that receive the admin role at login.
    #[must_use]
    pub fn admins(&self) -> &[Identity] {
        &self.admins
    }

    /// Returns `true` if `identity` is configured as an admin.
    #[must_use]
    pub fn is_admin(&self, identity: &Identity) -> bool {
        self.admins.contains(identity)
    }

    /// Signature algorithm recorded on certificates that do not name one.
    #[must_use]
    pub fn default_signature_algorithm(&self) -> &str {
        &self.default_signature_algorithm
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            nonce_ttl: DEFAULT_NONCE_TTL,
            nonce_capacity: DEFAULT_NONCE_CAPACITY,
            nonce_prefix: default_nonce_prefix(),
            session_ttl: DEFAULT_SESSION_TTL,
            session_issuer: default_session_issuer(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            admins: Vec::new(),
            default_signature_algorithm: default_signature_algorithm(),
        }
    }
}
