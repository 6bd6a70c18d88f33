//! Input validation for tokens and credential data.
//!
//! # Security
//!
//! - Strict algorithm checks prevent algorithm substitution attacks on
//!   session tokens: only EdDSA is accepted, and `none` and the symmetric
//!   HMAC family are always rejected.
//! - Key data and revocation reasons are bounded and free of control
//!   characters before they reach the record store.

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted.
///
/// - `none`: no signature verification
/// - `HS256`, `HS384`, `HS512`: symmetric algorithms (shared secret)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms.
///
/// Session tokens are minted with Ed25519 only. Per RFC 8725 Section 3.1,
/// validators must reject algorithms they do not fully implement.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Maximum length in bytes of a public key's data.
pub const MAX_KEY_DATA_LEN: usize = 4096;

/// Maximum length in bytes of a revocation reason.
pub const MAX_REASON_LEN: usize = 1024;

/// Validate a JWT algorithm against security policies.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is
/// forbidden or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use trustkey_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("RS256").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only EdDSA is supported)"
        )));
    }

    Ok(())
}

/// Validate public key data before it is appended to an identity's history.
///
/// # Errors
///
/// Returns [`AuthError::InvalidField`] if the data is blank, longer than
/// [`MAX_KEY_DATA_LEN`] bytes, or contains control characters.
pub fn validate_key_data(key_data: &str) -> Result<(), AuthError> {
    if key_data.trim().is_empty() {
        return Err(AuthError::invalid_field("public_key", "must not be empty"));
    }
    if key_data.len() > MAX_KEY_DATA_LEN {
        return Err(AuthError::invalid_field(
            "public_key",
            format!("exceeds maximum length of {MAX_KEY_DATA_LEN} bytes"),
        ));
    }
    if key_data.chars().any(char::is_control) {
        return Err(AuthError::invalid_field("public_key", "must not contain control characters"));
    }
    Ok(())
}

/// Normalizes a revocation reason, defaulting a blank one.
///
/// # Errors
///
/// Returns [`AuthError::InvalidField`] if the reason exceeds
/// [`MAX_REASON_LEN`] bytes.
pub fn normalize_reason(reason: &str) -> Result<String, AuthError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Ok(DEFAULT_REVOCATION_REASON.to_owned());
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(AuthError::invalid_field(
            "reason",
            format!("exceeds maximum length of {MAX_REASON_LEN} bytes"),
        ));
    }
    Ok(reason.to_owned())
}

/// Reason recorded when a revocation does not give one.
pub const DEFAULT_REVOCATION_REASON: &str = "No reason provided";
