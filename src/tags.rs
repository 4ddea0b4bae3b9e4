//! Remote bookmarks (C11, §3.4, §6.1): `.ddb/tags.json` names the remote a
//! dataset is linked to; `.ddb/sync.json` records the last-known stamp the
//! registry client observed per remote, so `pull`/`push` can diff against
//! it instead of the empty stamp. Scoped to the dataset container (unlike
//! `profile::UserProfile`, which is per-user, not per-dataset).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};
use crate::index::stamp::Stamp;
use crate::pathutils::DDB_FOLDER;
use crate::registry::{SyncBook, Tag};

/// On-disk shape of `tags.json` (§6.1): a single `tag` field holding the
/// rendered `<registryUrl>/<org>/<dataset>` triple, or absent when the
/// dataset has never been tagged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TagsFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    tag: Option<String>,
}

fn tags_path(ddb_root: &Path) -> std::path::PathBuf {
    ddb_root.join(DDB_FOLDER).join("tags.json")
}

fn sync_path(ddb_root: &Path) -> std::path::PathBuf {
    ddb_root.join(DDB_FOLDER).join("sync.json")
}

/// Reads the dataset's tag, if any. `ddb_root` is the dataset root (the
/// directory containing `.ddb/`), matching `IndexDatabase::root()`.
pub fn read_tag(ddb_root: &Path) -> Result<Option<Tag>> {
    let path = tags_path(ddb_root);
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(&path).map_err(FsError::Io)?;
    let file: TagsFile = serde_json::from_str(&json)?;
    Ok(file.tag.as_deref().and_then(Tag::parse))
}

/// Writes (overwriting) the dataset's tag.
pub fn write_tag(ddb_root: &Path, tag: &Tag) -> Result<()> {
    let path = tags_path(ddb_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(FsError::Io)?;
    }
    let file = TagsFile { tag: Some(tag.render()) };
    fs::write(&path, serde_json::to_string_pretty(&file)?).map_err(FsError::Io)?;
    Ok(())
}

/// Reads `sync.json`, defaulting to an empty bookmark set when absent.
pub fn read_sync_book(ddb_root: &Path) -> Result<SyncBook> {
    let path = sync_path(ddb_root);
    if !path.exists() {
        return Ok(SyncBook::default());
    }
    let json = fs::read_to_string(&path).map_err(FsError::Io)?;
    Ok(serde_json::from_str(&json)?)
}

pub fn write_sync_book(ddb_root: &Path, book: &SyncBook) -> Result<()> {
    let path = sync_path(ddb_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(FsError::Io)?;
    }
    fs::write(&path, serde_json::to_string_pretty(book)?).map_err(FsError::Io)?;
    Ok(())
}

/// Last-known stamp for `registry_url`, or an empty stamp (no entries, no
/// meta) when this is the dataset's first sync with that remote — the
/// delta engine then treats the whole remote content as one big add set.
pub fn last_known_stamp(ddb_root: &Path, registry_url: &str) -> Result<Stamp> {
    let book = read_sync_book(ddb_root)?;
    Ok(book.entries.get(registry_url).cloned().unwrap_or_else(|| Stamp::build(Vec::new(), Vec::new())))
}

/// Persists `stamp` as the new last-known bookmark for `registry_url`
/// (§4.6.3 step 8, §4.6.4 step 6).
pub fn set_last_known_stamp(ddb_root: &Path, registry_url: &str, stamp: &Stamp) -> Result<()> {
    let mut book = read_sync_book(ddb_root)?;
    book.entries.insert(registry_url.to_string(), stamp.clone());
    write_sync_book(ddb_root, &book)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::stamp::StampEntry;

    #[test]
    fn tag_round_trips_through_tags_json() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_tag(dir.path()).unwrap().is_none());

        let tag = Tag::parse("hub.dronedb.app/acme/survey-2026").unwrap();
        write_tag(dir.path(), &tag).unwrap();

        let read_back = read_tag(dir.path()).unwrap().unwrap();
        assert_eq!(read_back.render(), tag.render());
    }

    #[test]
    fn sync_book_tracks_stamp_per_registry() {
        let dir = tempfile::tempdir().unwrap();
        let empty = last_known_stamp(dir.path(), "hub.dronedb.app").unwrap();
        assert!(empty.entries.is_empty());

        let stamp = Stamp::build(vec![StampEntry { path: "a.jpg".into(), hash: "h1".into() }], vec![]);
        set_last_known_stamp(dir.path(), "hub.dronedb.app", &stamp).unwrap();

        let read_back = last_known_stamp(dir.path(), "hub.dronedb.app").unwrap();
        assert_eq!(read_back.checksum, stamp.checksum);
    }
}
