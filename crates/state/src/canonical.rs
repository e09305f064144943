// crates/state/src/canonical.rs
//! Canonical serialization and checksums.
//!
//! Canonical encoding is compact serde_json with struct fields in
//! declaration order and every map a `BTreeMap` (sorted keys). The same
//! value always encodes to the same bytes, so checksums and byte-for-byte
//! round-trip comparisons are meaningful.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Canonical byte encoding of any serde value.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Hex SHA-256 over the canonical encoding.
pub fn checksum<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(checksum_bytes(&encode(value)?))
}

pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Fast integrity tag for audit-log lines.
pub fn crc_tag(bytes: &[u8]) -> String {
    format!("{:08x}", crc32fast::hash(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn test_encoding_is_stable_for_maps() {
        let mut a = BTreeMap::new();
        a.insert("zebra", 1);
        a.insert("alpha", 2);
        let mut b = BTreeMap::new();
        b.insert("alpha", 2);
        b.insert("zebra", 1);
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = checksum(&vec![1, 2, 3]).unwrap();
        let b = checksum(&vec![1, 2, 4]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_crc_tag_is_eight_hex_chars() {
        let tag = crc_tag(b"hello");
        assert_eq!(tag.len(), 8);
        assert_eq!(tag, crc_tag(b"hello"));
        assert_ne!(tag, crc_tag(b"hellp"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn checksum_is_deterministic(
                entries in proptest::collection::btree_map(
                    (0u32..10_000).prop_map(|k| format!("key-{k}")),
                    0u64..1_000_000,
                    0..24,
                )
            ) {
                prop_assert_eq!(checksum(&entries).unwrap(), checksum(&entries).unwrap());
                // And it matches the checksum of the canonical bytes.
                let bytes = encode(&entries).unwrap();
                prop_assert_eq!(checksum(&entries).unwrap(), checksum_bytes(&bytes));
            }
        }
    }
}
