//! Delta engine (C7): diff two stamps, classify conflicts, apply a patch
//! under a merge strategy while preserving referential invariants (§4.3).
//! Follows the `library/delta.cpp` and `library/registry.cpp::applyDelta`
//! semantics, treated as canonical over an older, divergent duplicate
//! elsewhere in the source tree (see DESIGN.md's Open Question decisions).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::Entry;
use crate::error::Result;
use crate::index::stamp::{Stamp, StampEntry};
use crate::index::IndexDatabase;
use crate::meta::MetaItem;
use crate::pathutils;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddAction {
    pub path: String,
    pub hash: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveAction {
    pub path: String,
    /// The hash the path carried in `destination` at diff time, so
    /// `apply_delta` can tell a genuine local edit (current hash differs
    /// from this) from an untouched file (§4.3.2 step 1).
    pub hash: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Delta {
    pub adds: Vec<AddAction>,
    pub removes: Vec<RemoveAction>,
    pub meta_adds: Vec<Uuid>,
    pub meta_removes: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    DontMerge,
    KeepOurs,
    KeepTheirs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    BothModified,
    RemoteDeleteLocalModified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub path: String,
    pub kind: ConflictKind,
}

/// `getDelta(S, D)` (§4.3.1): adds are entries in `source` with no matching
/// `(path, hash)` in `destination`; removes are entries in `destination`
/// with no matching path (same is-directory flag) in `source`. A
/// directory's hash is the empty string, used as the is-directory flag,
/// exactly as the original does.
pub fn get_delta(source: &Stamp, destination: &Stamp) -> Delta {
    let dest_set: BTreeSet<(&str, &str)> = destination
        .entries
        .iter()
        .map(|e| (e.path.as_str(), e.hash.as_str()))
        .collect();
    let dest_paths: BTreeSet<&str> = destination.entries.iter().map(|e| e.path.as_str()).collect();
    let src_paths: BTreeSet<&str> = source.entries.iter().map(|e| e.path.as_str()).collect();

    let mut adds: Vec<AddAction> = source
        .entries
        .iter()
        .filter(|e| !dest_set.contains(&(e.path.as_str(), e.hash.as_str())))
        .map(|e| AddAction {
            path: e.path.clone(),
            hash: e.hash.clone(),
            is_directory: e.hash.is_empty(),
        })
        .collect();
    adds.sort_by(|a, b| a.path.cmp(&b.path));

    let mut removes: Vec<RemoveAction> = destination
        .entries
        .iter()
        .filter(|e| !src_paths.contains(e.path.as_str()))
        .map(|e| RemoveAction {
            path: e.path.clone(),
            hash: e.hash.clone(),
            is_directory: e.hash.is_empty(),
        })
        .collect();
    // Sorted by path descending so deep-first deletion is safe (§4.3.1).
    removes.sort_by(|a, b| b.path.cmp(&a.path));
    let _ = dest_paths;

    let src_meta: BTreeSet<Uuid> = source.meta.iter().copied().collect();
    let dest_meta: BTreeSet<Uuid> = destination.meta.iter().copied().collect();
    let meta_adds: Vec<Uuid> = src_meta.difference(&dest_meta).copied().collect();
    let meta_removes: Vec<Uuid> = dest_meta.difference(&src_meta).copied().collect();

    Delta {
        adds,
        removes,
        meta_adds,
        meta_removes,
    }
}

/// Text rendering of a delta (§B supplement, `delta()` free function in the
/// original): `A\t<path>` / `D\t<path>`, with `(D)` suffixed for directories.
pub fn render_text(delta: &Delta) -> String {
    let mut out = String::new();
    for add in &delta.adds {
        out.push_str("A\t");
        out.push_str(&add.path);
        if add.is_directory {
            out.push_str(" (D)");
        }
        out.push('\n');
    }
    for remove in &delta.removes {
        out.push_str("D\t");
        out.push_str(&remove.path);
        if remove.is_directory {
            out.push_str(" (D)");
        }
        out.push('\n');
    }
    out
}

pub fn render_json(delta: &Delta) -> Result<String> {
    Ok(serde_json::to_string_pretty(delta)?)
}

/// Scans `destination` for an entry whose hash matches an add's hash and
/// verifies it by filesystem mtime or re-hash (§4.3.3, §B supplement).
/// Returns the absolute path of the reusable local copy, if any.
async fn find_local_reuse(
    destination: &IndexDatabase,
    hash: &str,
) -> Result<Option<PathBuf>> {
    if hash.is_empty() {
        return Ok(None);
    }
    let matches = destination.list(&["*".to_string()], None).await?;
    for entry in matches {
        if entry.hash != hash {
            continue;
        }
        let abs = destination.root().join(&entry.path);
        if !abs.exists() {
            continue;
        }
        let fs_mtime_ok = pathutils::mtime_of(&abs).map(|m| m == entry.mtime).unwrap_or(false);
        let rehash_ok = crate::hashing::sha256_file(&abs).map(|h| h == hash).unwrap_or(false);
        if fs_mtime_ok || rehash_ok {
            return Ok(Some(abs));
        }
    }
    Ok(None)
}

/// `applyDelta(delta, source_path, destination, strategy, source_meta_dump)`
/// (§4.3.2). Returns the list of unresolved conflicts; a non-empty result
/// means the destination filesystem and index were left untouched for the
/// offending paths (§4.3.2's "state unchanged on disk" guarantee is upheld
/// by resolving conflicts before any file operation for a given path).
pub async fn apply_delta(
    delta: &Delta,
    source_path: &Path,
    destination: &IndexDatabase,
    strategy: MergeStrategy,
    source_meta_dump: &[MetaItem],
) -> Result<Vec<Conflict>> {
    let mut conflicts = Vec::new();
    let mut modified_paths = Vec::new();

    let scratch = destination
        .root()
        .join(".ddb")
        .join("tmp")
        .join(random_token());
    std::fs::create_dir_all(&scratch)?;

    for remove in &delta.removes {
        let existing = destination.list(&[remove.path.clone()], None).await?;
        let existing = existing.into_iter().find(|e| e.path == remove.path);

        if let Some(existing) = &existing {
            let hash_differs = existing_modified(existing, remove);
            if hash_differs {
                match strategy {
                    MergeStrategy::DontMerge => {
                        conflicts.push(Conflict {
                            path: remove.path.clone(),
                            kind: ConflictKind::RemoteDeleteLocalModified,
                        });
                        continue;
                    }
                    MergeStrategy::KeepOurs => continue,
                    MergeStrategy::KeepTheirs => {}
                }
            }
        }

        let abs = destination.root().join(&remove.path);
        pathutils::remove_if_exists(&abs)?;
        destination.remove(&[remove.path.clone()]).await?;
        modified_paths.push(remove.path.clone());
    }

    for add in &delta.adds {
        let existing = destination.list(&[add.path.clone()], None).await?;
        let existing = existing.into_iter().find(|e| e.path == add.path);

        if let Some(existing) = &existing {
            if !add.is_directory && existing.hash != add.hash && !existing.hash.is_empty() {
                match strategy {
                    MergeStrategy::DontMerge => {
                        conflicts.push(Conflict {
                            path: add.path.clone(),
                            kind: ConflictKind::BothModified,
                        });
                        continue;
                    }
                    MergeStrategy::KeepOurs => continue,
                    MergeStrategy::KeepTheirs => {}
                }
            }
        }

        let dest_abs = destination.root().join(&add.path);
        if add.is_directory {
            std::fs::create_dir_all(&dest_abs)?;
        } else {
            let local_reuse = find_local_reuse(destination, &add.hash).await?;
            let src_abs = local_reuse.unwrap_or_else(|| source_path.join(&add.path));
            pathutils::copy_file(&src_abs, &dest_abs)?;
        }
        destination
            .add(&[dest_abs], &crate::index::Options::default(), |_, _| {})
            .await?;
        modified_paths.push(add.path.clone());
    }

    pathutils::remove_if_exists(&scratch)?;

    if !conflicts.is_empty() {
        return Ok(conflicts);
    }

    // Synchronize local mtimes to stored ones so a subsequent `sync` sees no
    // spurious changes (§4.3.2 step 3).
    for path in &modified_paths {
        if let Some(entry) = destination
            .list(&[path.clone()], None)
            .await?
            .into_iter()
            .find(|e| &e.path == path)
        {
            let abs = destination.root().join(path);
            if abs.exists() {
                let _ = pathutils::set_mtime(&abs, entry.mtime);
            }
        }
    }

    let meta_manager = crate::meta::MetaManager::new(destination.db());
    if !delta.meta_adds.is_empty() {
        let restore: Vec<MetaItem> = source_meta_dump
            .iter()
            .filter(|m| delta.meta_adds.contains(&m.id))
            .cloned()
            .collect();
        meta_manager.restore(&restore).await?;
    }
    if !delta.meta_removes.is_empty() {
        meta_manager.bulk_remove(&delta.meta_removes).await?;
    }

    Ok(conflicts)
}

/// True when the live destination entry at `remove`'s path has a hash that
/// diverges from the hash it carried when the delta was computed — i.e. the
/// local copy was edited after the fact and the remote deletion would
/// discard that edit (§4.3.2 step 1).
fn existing_modified(existing: &Entry, remove: &RemoveAction) -> bool {
    !remove.is_directory && !existing.hash.is_empty() && existing.hash != remove.hash
}

fn random_token() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
            CHARS[rng.gen_range(0..CHARS.len())] as char
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_hash(hash: &str) -> Entry {
        Entry {
            path: "f.tif".into(),
            hash: hash.to_string(),
            entry_type: crate::entry::EntryType::GeoRaster,
            properties: serde_json::Value::Null,
            mtime: 0,
            size: 0,
            depth: 0,
            point_geom: None,
            polygon_geom: None,
            meta: None,
        }
    }

    #[test]
    fn remove_is_not_a_conflict_when_destination_is_unchanged() {
        // The destination's live hash still matches what the delta recorded
        // at diff time: no local edit happened, so the remote deletion
        // should proceed without a conflict.
        let remove = RemoveAction { path: "f.tif".into(), hash: "same".into(), is_directory: false };
        assert!(!existing_modified(&entry_with_hash("same"), &remove));
    }

    #[test]
    fn remove_is_a_conflict_when_destination_diverged_since_the_diff() {
        let remove = RemoveAction { path: "f.tif".into(), hash: "original".into(), is_directory: false };
        assert!(existing_modified(&entry_with_hash("locally-edited"), &remove));
    }

    fn stamp(entries: &[(&str, &str)], meta: &[Uuid]) -> Stamp {
        Stamp::build(
            entries
                .iter()
                .map(|(p, h)| StampEntry { path: p.to_string(), hash: h.to_string() })
                .collect(),
            meta.to_vec(),
        )
    }

    #[test]
    fn delta_of_identical_stamps_is_empty() {
        let s = stamp(&[("x", "h1"), ("y", "h2")], &[]);
        let d = get_delta(&s, &s);
        assert!(d.adds.is_empty());
        assert!(d.removes.is_empty());
        assert!(d.meta_adds.is_empty());
        assert!(d.meta_removes.is_empty());
    }

    #[test]
    fn delta_round_trip_scenario() {
        // A has {x,y}; B has {y,z}: adds=[x], removes=[z].
        let a = stamp(&[("x", "hx"), ("y", "hy")], &[]);
        let b = stamp(&[("y", "hy"), ("z", "hz")], &[]);
        let d = get_delta(&a, &b);
        assert_eq!(d.adds.len(), 1);
        assert_eq!(d.adds[0].path, "x");
        assert_eq!(d.removes.len(), 1);
        assert_eq!(d.removes[0].path, "z");
    }

    #[test]
    fn text_rendering_marks_directories() {
        let d = Delta {
            adds: vec![AddAction { path: "dir".into(), hash: "".into(), is_directory: true }],
            removes: vec![],
            meta_adds: vec![],
            meta_removes: vec![],
        };
        let text = render_text(&d);
        assert!(text.contains("A\tdir (D)"));
    }
}
