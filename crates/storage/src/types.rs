//! Common types shared by the record store and its consumers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of hex digits in an account address (20 bytes).
const ADDRESS_HEX_LEN: usize = 40;

/// Error returned when a string is not a well-formed account address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid identity: expected 0x followed by 40 hex digits")]
pub struct InvalidIdentity;

/// A stable, externally verifiable account address.
///
/// Identities are hex addresses derived from a secp256k1 public key. Letter
/// case carries no meaning, so the value is stored in canonical lowercase form
/// and equality on `Identity` is a case-insensitive comparison of addresses.
///
/// # Examples
///
/// ```
/// use trustkey_storage::Identity;
///
/// let a = Identity::parse("0xAbCdEf0123456789abcdef0123456789ABCDEF01").unwrap();
/// let b: Identity = "0xabcdef0123456789abcdef0123456789abcdef01".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
///
/// assert!(Identity::parse("alice").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Parses and normalizes an address.
    ///
    /// Surrounding whitespace is ignored and the `0x` prefix may be written
    /// in either case.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIdentity`] unless the input is `0x` followed by exactly
    /// 40 hex digits.
    pub fn parse(input: &str) -> Result<Self, InvalidIdentity> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or(InvalidIdentity)?;

        if digits.len() != ADDRESS_HEX_LEN || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidIdentity);
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Builds an identity from the 20 raw address bytes.
    #[must_use]
    pub fn from_address_bytes(bytes: &[u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    /// Returns the canonical lowercase address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identity {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Identity {
    type Error = InvalidIdentity;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
