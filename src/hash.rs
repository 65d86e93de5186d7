//! Canonical hashing & encoding (spec §4.1).
//!
//! Two primitives everything else builds on: a stable SHA-256 over raw
//! bytes, and a canonical JSON encoding used only for hashing (object keys
//! sorted, no insignificant whitespace, stable non-ASCII escaping). Two
//! independent runs over the same logical value must produce byte-identical
//! output, or snapshot identity breaks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A validated 64-character lowercase hex SHA-256 digest.
///
/// The storage key for blobs and manifests, and the hash half of every
/// file entry in a [`crate::manifest::Manifest`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hex(String);

impl Sha256Hex {
    /// Build from a pre-validated hex string.
    ///
    /// # Errors
    /// Returns an error if `s` is not exactly 64 lowercase hex characters.
    pub fn new(s: &str) -> Result<Self, HashError> {
        Self::validate(s)?;
        Ok(Self(s.to_owned()))
    }

    /// Hash `bytes` and wrap the digest.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(hash_bytes(bytes))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), HashError> {
        if s.len() != 64 {
            return Err(HashError::InvalidHex {
                value: s.to_owned(),
                reason: format!("expected 64 hex characters, got {}", s.len()),
            });
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            return Err(HashError::InvalidHex {
                value: s.to_owned(),
                reason: "must contain only lowercase hex characters (0-9, a-f)".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Sha256Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Sha256Hex {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Sha256Hex {
    type Error = HashError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Sha256Hex> for String {
    fn from(h: Sha256Hex) -> Self {
        h.0
    }
}

/// A validation error for a hash-shaped value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashError {
    /// The string was not a 64-character lowercase hex digest.
    InvalidHex { value: String, reason: String },
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHex { value, reason } => {
                write!(f, "invalid sha256 hex {value:?}: {reason}")
            }
        }
    }
}

impl std::error::Error for HashError {}

/// Hash raw bytes, returning lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Encode a [`serde_json::Value`] as canonical JSON: UTF-8 bytes, object
/// keys sorted lexicographically by their UTF-8 byte sequence, no
/// insignificant whitespace, and non-ASCII code points escaped as `\uXXXX`
/// (stable regardless of `serde_json` version or feature flags).
///
/// This is deliberately hand-rolled rather than delegating to
/// `serde_json::to_vec`: that function's key order follows a `Map`'s
/// iteration order (insertion order unless the `preserve_order` feature is
/// off, in which case it's whatever `BTreeMap` gives — both of which are
/// accidents of representation, not a stated contract), and its escaping
/// policy is not documented as stable across versions. Hashing must not
/// depend on either.
#[must_use]
pub fn canonical_json(value: &serde_json::Value) -> Vec<u8> {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out.into_bytes()
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        serde_json::Value::Number(n) => out.push_str(&n.to_string()),
        serde_json::Value::String(s) => write_canonical_string(s, out),
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_string(key, out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

fn write_canonical_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c if (c as u32) < 0x80 => out.push(c),
            c => {
                // Stable non-ASCII escaping regardless of locale/terminal encoding.
                let mut buf = [0u16; 2];
                for unit in c.encode_utf16(&mut buf) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
        }
    }
    out.push('"');
}

/// Hash a value by first rendering it to canonical JSON.
#[must_use]
pub fn hash_json(value: &serde_json::Value) -> String {
    hash_bytes(&canonical_json(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_bytes_is_deterministic() {
        let a = hash_bytes(b"hello");
        let b = hash_bytes(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_bytes_differs_for_different_input() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"world"));
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let v = json!({"b": 1, "a": 2});
        let bytes = canonical_json(&v);
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn canonical_json_no_whitespace() {
        let v = json!({"x": [1, 2, 3], "y": "z"});
        let s = String::from_utf8(canonical_json(&v)).unwrap();
        assert!(!s.contains(' '));
        assert!(!s.contains('\n'));
    }

    #[test]
    fn canonical_json_order_independent_of_construction_order() {
        let v1 = json!({"a": 1, "b": 2, "c": 3});
        let v2: serde_json::Value = serde_json::from_str(r#"{"c":3,"b":2,"a":1}"#).unwrap();
        assert_eq!(canonical_json(&v1), canonical_json(&v2));
    }

    #[test]
    fn canonical_json_escapes_non_ascii() {
        let v = json!({"name": "café"});
        let s = String::from_utf8(canonical_json(&v)).unwrap();
        assert!(s.contains("\\u00e9"));
    }

    #[test]
    fn sha256_hex_rejects_short() {
        assert!(Sha256Hex::new("abc").is_err());
    }

    #[test]
    fn sha256_hex_rejects_uppercase() {
        let hex = "A".repeat(64);
        assert!(Sha256Hex::new(&hex).is_err());
    }

    #[test]
    fn sha256_hex_of_roundtrips_through_serde() {
        let h = Sha256Hex::of(b"hello");
        let json = serde_json::to_string(&h).unwrap();
        let decoded: Sha256Hex = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn hash_json_stable_across_key_order() {
        let v1 = json!({"version": 1, "entries": []});
        let v2: serde_json::Value =
            serde_json::from_str(r#"{"entries":[],"version":1}"#).unwrap();
        assert_eq!(hash_json(&v1), hash_json(&v2));
    }
}
