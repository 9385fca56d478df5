//! Canonical JSON emission and SHA-256 helpers.
//!
//! Every JSON document that is hashed or committed (manifest, audit trails,
//! cache keys, config fingerprints) goes through RFC 8785 (JCS): keys sorted
//! recursively, compact separators, deterministic number rendering. This is
//! the standard emission path; ad-hoc `serde_json::to_string` is reserved for
//! debug output.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Emit a value as JCS-canonical JSON (RFC 8785).
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let json_value =
        serde_json::to_value(value).with_context(|| "failed to serialize value to JSON")?;
    let bytes = serde_json_canonicalizer::to_vec(&json_value)
        .with_context(|| "failed to canonicalize JSON")?;
    String::from_utf8(bytes).with_context(|| "canonical JSON contained invalid UTF-8")
}

/// SHA-256 of `bytes` as 64 lowercase hex chars.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a string as 64 lowercase hex chars.
#[must_use]
pub fn sha256_hex_str(s: &str) -> String {
    sha256_hex(s.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Sample {
        zebra: i32,
        apple: &'static str,
    }

    #[test]
    fn canonical_json_sorts_keys_and_is_compact() {
        let json = to_canonical_json(&Sample {
            zebra: 1,
            apple: "x",
        })
        .unwrap();
        assert_eq!(json, r#"{"apple":"x","zebra":1}"#);
    }

    #[test]
    fn canonical_json_is_insensitive_to_map_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"a":{"c":3,"d":2},"b":1}"#).unwrap();
        assert_eq!(
            to_canonical_json(&a).unwrap(),
            to_canonical_json(&b).unwrap()
        );
    }

    #[test]
    fn sha256_known_vector() {
        // printf '' | sha256sum
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            sha256_hex_str("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    proptest! {
        #[test]
        fn hash_is_lowercase_hex_of_fixed_width(data: Vec<u8>) {
            let h = sha256_hex(&data);
            prop_assert_eq!(h.len(), 64);
            prop_assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }

        #[test]
        fn hash_is_deterministic(data: Vec<u8>) {
            prop_assert_eq!(sha256_hex(&data), sha256_hex(&data));
        }
    }
}
