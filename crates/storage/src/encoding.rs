//! Boundary normalization of ledger responses.
//!
//! The ledger returns the same logical field in several shapes depending on
//! the call path: key material as raw bytes, as a `0x` hex string, or wrapped
//! in an object; timestamps as integers, decimal strings or RFC 3339; and
//! certificates as positional tuples or as objects. Each shape is one variant
//! of a closed enum here, and a single function per entity turns it into the
//! canonical record from [`crate::records`]. Nothing past this module ever
//! sees a raw encoding.
//!
//! # Example
//!
//! ```
//! use trustkey_storage::encoding::{RawKeyData, normalize_key_data};
//!
//! // "k1" hex-encoded by the contract call path
//! let key = normalize_key_data(&RawKeyData::Hex("0x6b31".into())).unwrap();
//! assert_eq!(key, "k1");
//!
//! // Binary key material stays hex
//! let key = normalize_key_data(&RawKeyData::Bytes(vec![0x04, 0xff, 0x00])).unwrap();
//! assert_eq!(key, "0x04ff00");
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::{
    error::{StorageError, StorageResult},
    records::{Certificate, DEFAULT_SIGNATURE_ALGORITHM, PublicKeyRecord},
};

/// Key material as returned by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum RawKeyData {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Hex string, with or without a `0x` prefix.
    Hex(String),
    /// Object carrying the key under `keyData`, `key_data` or `publicKey`.
    /// A string value is the key as submitted and is kept verbatim.
    Structured(Value),
}

/// Timestamp as returned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTimestamp {
    /// Unix seconds.
    Seconds(u64),
    /// Unix seconds rendered as a decimal string (big-integer call results).
    Decimal(String),
    /// RFC 3339 string.
    Rfc3339(String),
}

/// One key history entry as returned by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct RawKeyRecord {
    /// Encoded key material.
    pub key_data: RawKeyData,
    /// Active flag.
    pub is_active: bool,
    /// Encoded append time.
    pub added_at: RawTimestamp,
}

/// Certificate as returned by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCertificate {
    /// The ledger reported no certificate.
    Absent,
    /// Tuple `[serial, commonName, organization, validFrom, validTo, isRevoked]`,
    /// optionally followed by `country, state, locality, publicKey,
    /// signatureAlgorithm`. An empty serial means no certificate.
    Positional(Vec<Value>),
    /// Object with camelCase or snake_case field names.
    Structured(Value),
}

/// Number of leading positions every positional certificate carries.
const POSITIONAL_REQUIRED: usize = 6;

/// Converts encoded key material to its canonical string form.
///
/// Bytes that form printable UTF-8 are kept as text; anything else is
/// rendered as lowercase `0x` hex. A string inside a structured object is
/// returned unchanged, even when it looks like hex.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] for invalid hex or an object that
/// carries no recognizable key field.
pub fn normalize_key_data(raw: &RawKeyData) -> StorageResult<String> {
    match raw {
        RawKeyData::Bytes(bytes) => Ok(bytes_to_key_string(bytes)),
        RawKeyData::Hex(hex_str) => decode_hex(hex_str).map(|bytes| bytes_to_key_string(&bytes)),
        RawKeyData::Structured(value) => {
            let inner = field(value, &["keyData", "key_data", "publicKey", "public_key"])
                .ok_or_else(|| StorageError::serialization("key object has no key field"))?;
            match inner {
                Value::String(s) => Ok(s.clone()),
                Value::Array(items) => {
                    let bytes = items
                        .iter()
                        .map(|item| {
                            item.as_u64().and_then(|n| u8::try_from(n).ok()).ok_or_else(|| {
                                StorageError::serialization("key byte array holds a non-byte value")
                            })
                        })
                        .collect::<StorageResult<Vec<u8>>>()?;
                    Ok(bytes_to_key_string(&bytes))
                },
                other => Err(StorageError::serialization(format!(
                    "unsupported key field encoding: {other}"
                ))),
            }
        },
    }
}

/// Converts an encoded timestamp to UTC.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] if the value cannot be parsed or
/// lies outside the representable range.
pub fn normalize_timestamp(raw: &RawTimestamp) -> StorageResult<DateTime<Utc>> {
    match raw {
        RawTimestamp::Seconds(secs) => seconds_to_datetime(*secs),
        RawTimestamp::Decimal(s) => {
            let secs = s.trim().parse::<u64>().map_err(|e| {
                StorageError::serialization_with_source(format!("invalid timestamp '{s}'"), e)
            })?;
            seconds_to_datetime(secs)
        },
        RawTimestamp::Rfc3339(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                StorageError::serialization_with_source(format!("invalid timestamp '{s}'"), e)
            }),
    }
}

/// Converts a ledger key history into canonical records.
///
/// Indices are assigned from ledger order, which is insertion order.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] if any entry fails to decode.
pub fn normalize_key_records(raw: &[RawKeyRecord]) -> StorageResult<Vec<PublicKeyRecord>> {
    raw.iter()
        .enumerate()
        .map(|(position, entry)| {
            let index = u32::try_from(position)
                .map_err(|_| StorageError::serialization("key history exceeds u32 indices"))?;
            Ok(PublicKeyRecord {
                index,
                key_data: normalize_key_data(&entry.key_data)?,
                is_active: entry.is_active,
                added_at: normalize_timestamp(&entry.added_at)?,
            })
        })
        .collect()
}

/// Converts a ledger certificate into the canonical record.
///
/// Returns `Ok(None)` when the ledger reports no certificate, including the
/// positional form with an empty serial number.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`] for truncated tuples, missing
/// fields or undecodable values.
pub fn normalize_certificate(raw: &RawCertificate) -> StorageResult<Option<Certificate>> {
    match raw {
        RawCertificate::Absent => Ok(None),
        RawCertificate::Positional(items) => normalize_positional(items),
        RawCertificate::Structured(value) => normalize_structured(value),
    }
}

fn normalize_positional(items: &[Value]) -> StorageResult<Option<Certificate>> {
    if items.len() < POSITIONAL_REQUIRED {
        return Err(StorageError::serialization(format!(
            "certificate tuple has {} fields, expected at least {POSITIONAL_REQUIRED}",
            items.len()
        )));
    }

    let serial = value_to_string(&items[0], "serialNumber")?;
    if serial.is_empty() {
        return Ok(None);
    }

    let optional = |position: usize, name: &str| -> StorageResult<Option<String>> {
        items.get(position).map(|v| value_to_string(v, name)).transpose()
    };

    let certificate = Certificate::builder()
        .serial_number(serial)
        .common_name(value_to_string(&items[1], "commonName")?)
        .organization(value_to_string(&items[2], "organization")?)
        .valid_from(value_to_timestamp(&items[3], "validFrom")?)
        .valid_to(value_to_timestamp(&items[4], "validTo")?)
        .is_revoked(value_to_bool(&items[5], "isRevoked")?)
        .country(optional(6, "country")?.unwrap_or_default())
        .state(optional(7, "state")?.unwrap_or_default())
        .locality(optional(8, "locality")?.unwrap_or_default())
        .public_key(optional(9, "publicKey")?.unwrap_or_default())
        .signature_algorithm(
            optional(10, "signatureAlgorithm")?
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SIGNATURE_ALGORITHM.to_owned()),
        )
        .build();

    Ok(Some(certificate))
}

fn normalize_structured(value: &Value) -> StorageResult<Option<Certificate>> {
    if value.is_null() {
        return Ok(None);
    }
    if !value.is_object() {
        return Err(StorageError::serialization("certificate is neither an object nor null"));
    }

    let serial = match field(value, &["serialNumber", "serial_number"]) {
        Some(v) => value_to_string(v, "serialNumber")?,
        None => return Ok(None),
    };
    if serial.is_empty() {
        return Ok(None);
    }

    let text = |names: &[&str]| -> StorageResult<String> {
        field(value, names).map(|v| value_to_string(v, names[0])).transpose().map(Option::unwrap_or_default)
    };
    let required_time = |names: &[&str]| -> StorageResult<DateTime<Utc>> {
        let v = field(value, names).ok_or_else(|| {
            StorageError::serialization(format!("certificate is missing {}", names[0]))
        })?;
        value_to_timestamp(v, names[0])
    };

    let revoked_at = field(value, &["revokedAt", "revoked_at"])
        .filter(|v| !v.is_null() && v.as_u64() != Some(0))
        .map(|v| value_to_timestamp(v, "revokedAt"))
        .transpose()?;
    let revocation_reason = field(value, &["revocationReason", "revocation_reason"])
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let signature_algorithm = text(&["signatureAlgorithm", "signature_algorithm"])?;

    let certificate = Certificate::builder()
        .serial_number(serial)
        .common_name(text(&["commonName", "common_name"])?)
        .organization(text(&["organization"])?)
        .country(text(&["country"])?)
        .state(text(&["state"])?)
        .locality(text(&["locality"])?)
        .public_key(text(&["publicKey", "public_key"])?)
        .signature_algorithm(if signature_algorithm.is_empty() {
            DEFAULT_SIGNATURE_ALGORITHM.to_owned()
        } else {
            signature_algorithm
        })
        .valid_from(required_time(&["validFrom", "valid_from"])?)
        .valid_to(required_time(&["validTo", "valid_to"])?)
        .is_revoked(
            field(value, &["isRevoked", "is_revoked"])
                .map(|v| value_to_bool(v, "isRevoked"))
                .transpose()?
                .unwrap_or(false),
        )
        .maybe_revoked_at(revoked_at)
        .maybe_revocation_reason(revocation_reason)
        .build();

    Ok(Some(certificate))
}

fn field<'a>(value: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| value.get(*name))
}

fn value_to_string(value: &Value, name: &str) -> StorageResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(StorageError::serialization(format!("{name} is not a string: {other}"))),
    }
}

fn value_to_timestamp(value: &Value, name: &str) -> StorageResult<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| StorageError::serialization(format!("{name} is not a u64: {n}")))
            .and_then(seconds_to_datetime),
        Value::String(s) if s.contains('T') => normalize_timestamp(&RawTimestamp::Rfc3339(s.clone())),
        Value::String(s) => normalize_timestamp(&RawTimestamp::Decimal(s.clone())),
        other => Err(StorageError::serialization(format!("{name} is not a timestamp: {other}"))),
    }
}

fn value_to_bool(value: &Value, name: &str) -> StorageResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(false),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(StorageError::serialization(format!("{name} is not a boolean: {other}"))),
    }
}

fn seconds_to_datetime(secs: u64) -> StorageResult<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| StorageError::serialization(format!("timestamp {secs} is out of range")))
}

fn decode_hex(s: &str) -> StorageResult<Vec<u8>> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    hex::decode(digits)
        .map_err(|e| StorageError::serialization_with_source(format!("invalid hex key data '{s}'"), e))
}

fn bytes_to_key_string(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.is_empty() && !text.chars().any(char::is_control) => text.to_owned(),
        _ => format!("0x{}", hex::encode(bytes)),
    }
}
