//! Stamp computation (§3.3, §4.1.8, §6.3): a deterministic fingerprint of a
//! dataset's content and metadata ids. The wire format is exact — each
//! `entries` element is a single-key `{"<path>":"<hash>"}` object, not a
//! path/hash pair — because two independently built indexes over identical
//! content must produce byte-identical stamps (§8).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hashing::sha256_bytes;

/// One `{"<path>":"<hash>"}` element of `Stamp::entries`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StampEntry {
    pub path: String,
    pub hash: String,
}

impl Serialize for StampEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = BTreeMap::new();
        map.insert(self.path.clone(), self.hash.clone());
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StampEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map: BTreeMap<String, String> = BTreeMap::deserialize(deserializer)?;
        let (path, hash) = map
            .into_iter()
            .next()
            .ok_or_else(|| serde::de::Error::custom("empty stamp entry object"))?;
        Ok(StampEntry { path, hash })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stamp {
    pub entries: Vec<StampEntry>,
    pub meta: Vec<Uuid>,
    pub checksum: String,
}

impl Stamp {
    /// Builds a stamp from unsorted `(path, hash)` pairs and meta ids,
    /// sorting both and computing the checksum over the canonical
    /// serialization of `entries` + `meta` (§3.3).
    pub fn build(mut entries: Vec<StampEntry>, mut meta: Vec<Uuid>) -> Stamp {
        entries.sort();
        meta.sort();

        #[derive(Serialize)]
        struct Canonical<'a> {
            entries: &'a [StampEntry],
            meta: &'a [Uuid],
        }
        let canonical = Canonical {
            entries: &entries,
            meta: &meta,
        };
        let bytes = serde_json::to_vec(&canonical).expect("stamp serialization cannot fail");
        let checksum = sha256_bytes(&bytes);

        Stamp {
            entries,
            meta,
            checksum,
        }
    }

    /// True for two datasets with identical content (§3.3): equivalent to
    /// comparing checksums, since the checksum is derived from the full
    /// canonical body.
    pub fn equivalent(&self, other: &Stamp) -> bool {
        self.checksum == other.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_is_deterministic_regardless_of_input_order() {
        let a = Stamp::build(
            vec![
                StampEntry { path: "b.jpg".into(), hash: "h2".into() },
                StampEntry { path: "a.jpg".into(), hash: "h1".into() },
            ],
            vec![],
        );
        let b = Stamp::build(
            vec![
                StampEntry { path: "a.jpg".into(), hash: "h1".into() },
                StampEntry { path: "b.jpg".into(), hash: "h2".into() },
            ],
            vec![],
        );
        assert_eq!(a.checksum, b.checksum);
        assert!(a.equivalent(&b));
    }

    #[test]
    fn empty_stamp_has_stable_checksum() {
        let s = Stamp::build(vec![], vec![]);
        assert!(!s.checksum.is_empty());
    }

    #[test]
    fn serializes_entries_as_single_key_objects() {
        let s = Stamp::build(vec![StampEntry { path: "photo.JPG".into(), hash: "abc".into() }], vec![]);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["entries"][0], serde_json::json!({"photo.JPG": "abc"}));
    }
}
