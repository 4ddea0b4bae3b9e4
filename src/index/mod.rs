//! Index engine (C5): open/init the database, add/remove/move/sync/status,
//! pattern-based list/search, stamp computation (§4.1).

pub mod stamp;

use std::path::{Path, PathBuf};

use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::entities::{entry as entry_entity, meta_item as meta_entity};
use crate::db::Database as SqlDatabase;
use crate::entry::{classify_by_extension, Entry, EntryType};
use crate::error::{DbError, FsError, InvalidArgsError, Result};
use crate::hashing::sha256_file;
use crate::pathutils::{self, depth_of};
use stamp::{Stamp, StampEntry};

/// Filesystem change classification from §4.1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCheck {
    NotModified,
    Modified,
    Deleted,
}

/// Line emitted by `sync`/`status` (§4.1.6): `U\t<path>` / `D\t<path>`, or
/// `N\t<path>` for untracked files `status` additionally reports.
#[derive(Debug, Clone)]
pub enum ChangeLine {
    Updated(String),
    Deleted(String),
    NotIndexed(String),
}

/// The dataset-local index engine, rooted at a directory containing `.ddb/`.
pub struct IndexDatabase {
    db: SqlDatabase,
    root: PathBuf,
}

/// Hook for the EXIF/GDAL/PDAL-derived classification and geometry steps
/// named but not implemented by §4.1.3-§4.1.5 ("we specify what must be
/// extracted, not how" — §1). The default implementation classifies by
/// extension only and leaves geometry empty; embedders that link GDAL/EXIF
/// libraries supply a richer implementation.
pub trait EntryExtractor: Send + Sync {
    /// Returns the entry type and properties JSON for a given file, given
    /// its extension-based classification as a starting point.
    fn classify(&self, path: &Path, fallback: EntryType) -> (EntryType, serde_json::Value) {
        (fallback, serde_json::Value::Object(Default::default()))
    }

    /// Computes point/polygon geometry for types that carry it (GeoImage,
    /// GeoRaster, PointCloud, GeoVideo, GeoPanorama). Returns `None` when the
    /// file carries no geolocation.
    fn geometry(
        &self,
        _path: &Path,
        _entry_type: EntryType,
    ) -> (Option<crate::entry::Point3D>, Option<crate::entry::Polygon>) {
        (None, None)
    }
}

/// Default extractor: extension-only classification, no geometry.
pub struct DefaultExtractor;
impl EntryExtractor for DefaultExtractor {}

pub struct Options<'a> {
    pub extractor: &'a dyn EntryExtractor,
    pub stop_on_error: bool,
}

impl<'a> Default for Options<'a> {
    fn default() -> Self {
        Options {
            extractor: &DefaultExtractor,
            stop_on_error: false,
        }
    }
}

impl IndexDatabase {
    /// `init(dir) → ddb_path` (§4.1.1): creates `.ddb/` and a freshly
    /// initialized database. Fails with `AlreadyInitialized` if `.ddb/`
    /// exists.
    pub async fn init(dir: &Path) -> Result<PathBuf> {
        let ddb = dir.join(pathutils::DDB_FOLDER);
        if ddb.exists() {
            return Err(DbError::AlreadyInitialized(ddb).into());
        }
        std::fs::create_dir_all(&ddb)?;
        std::fs::create_dir_all(ddb.join("build"))?;
        std::fs::create_dir_all(ddb.join("tmp"))?;
        let sqlite = ddb.join("dbase.sqlite");
        SqlDatabase::create_or_open(&sqlite).await?;
        info!(path = %ddb.display(), "initialized dronedb database");
        Ok(ddb)
    }

    /// `open(dir, traverse_up) → Database` (§4.1.1): walks upward looking
    /// for `.ddb/dbase.sqlite`.
    pub async fn open(dir: &Path, traverse_up: bool) -> Result<IndexDatabase> {
        let start = pathutils::canonicalize_lenient(dir)?;
        let mut current = start.clone();
        loop {
            let candidate = current.join(pathutils::DDB_FOLDER).join("dbase.sqlite");
            if candidate.exists() {
                let db = SqlDatabase::open_existing(&candidate).await?;
                let engine = IndexDatabase { db, root: current };
                engine.ensure_schema_consistency().await?;
                return Ok(engine);
            }
            if !traverse_up {
                return Err(DbError::NotADatabase.into());
            }
            match current.parent() {
                Some(p) => current = p.to_path_buf(),
                None => return Err(DbError::NotADatabase.into()),
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db(&self) -> &SqlDatabase {
        &self.db
    }

    /// Synthesizes missing intermediate directory entries (§B supplement,
    /// ported from the original's `ensureSchemaConsistency`). Every
    /// non-root path's parent must be represented as a `Directory` entry
    /// (§3.1 invariant).
    pub async fn ensure_schema_consistency(&self) -> Result<()> {
        let rows = entry_entity::Entity::find().all(self.db.conn()).await.map_err(DbError::Sea)?;
        let existing: std::collections::HashSet<String> = rows.iter().map(|r| r.path.clone()).collect();
        let mut missing = std::collections::BTreeSet::new();
        for row in &rows {
            let mut ancestor = Path::new(&row.path).parent();
            while let Some(a) = ancestor {
                let a_str = pathutils_to_string(a);
                if a_str.is_empty() || existing.contains(&a_str) || missing.contains(&a_str) {
                    break;
                }
                missing.insert(a_str);
                ancestor = a.parent();
            }
        }
        if missing.is_empty() {
            return Ok(());
        }
        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;
        for path in missing {
            let dir = Entry::new_directory(path);
            self.upsert_entry(&txn, &dir).await?;
        }
        txn.commit().await.map_err(DbError::Sea)?;
        Ok(())
    }

    async fn upsert_entry(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        entry: &Entry,
    ) -> Result<()> {
        let (min_lon, min_lat, max_lon, max_lat) = entry
            .polygon_geom
            .as_ref()
            .and_then(|p| p.bbox())
            .map(|(a, b, c, d)| (Some(a), Some(b), Some(c), Some(d)))
            .unwrap_or((None, None, None, None));

        let existing = entry_entity::Entity::find_by_id(entry.path.clone())
            .one(txn)
            .await
            .map_err(DbError::Sea)?;

        let am = entry_entity::ActiveModel {
            path: Set(entry.path.clone()),
            hash: Set(entry.hash.clone()),
            entry_type: Set(entry.entry_type as i32),
            properties: Set(serde_json::to_string(&entry.properties)?),
            mtime: Set(entry.mtime),
            size: Set(entry.size as i64),
            depth: Set(entry.depth as i32),
            point_geom: Set(entry.point_geom.as_ref().map(|p| p.to_wkt())),
            polygon_geom: Set(entry.polygon_geom.as_ref().map(|p| p.to_wkt())),
            min_lon: Set(min_lon),
            min_lat: Set(min_lat),
            max_lon: Set(max_lon),
            max_lat: Set(max_lat),
        };

        if existing.is_some() {
            am.update(txn).await.map_err(DbError::Sea)?;
        } else {
            am.insert(txn).await.map_err(DbError::Sea)?;
        }
        Ok(())
    }

    /// Builds an `Entry` for a path on disk, dispatching by extension (and,
    /// via `extractor`, by content probes) per §4.1.3.
    async fn parse_entry(&self, abs_path: &Path, extractor: &dyn EntryExtractor) -> Result<Entry> {
        let rel_path = pathutils::relative_to(&self.root, abs_path)?;
        let depth = depth_of(&rel_path);

        if abs_path.is_dir() {
            return Ok(Entry {
                path: rel_path,
                hash: String::new(),
                entry_type: EntryType::Directory,
                properties: serde_json::Value::Object(Default::default()),
                mtime: pathutils::mtime_of(abs_path)?,
                size: 0,
                depth,
                point_geom: None,
                polygon_geom: None,
                meta: None,
            });
        }

        let fallback = classify_by_extension(abs_path);
        let (entry_type, properties) = extractor.classify(abs_path, fallback);
        let (point_geom, polygon_geom) = extractor.geometry(abs_path, entry_type);
        let hash = sha256_file(abs_path)?;
        let size = std::fs::metadata(abs_path)?.len();
        let mtime = pathutils::mtime_of(abs_path)?;

        Ok(Entry {
            path: rel_path,
            hash,
            entry_type,
            properties,
            mtime,
            size,
            depth,
            point_geom,
            polygon_geom,
            meta: None,
        })
    }

    /// `add(inputs, cb)` (§4.1.6): in one exclusive transaction, INSERT on
    /// miss or UPDATE on modification. `cb` receives `(entry, updated)`.
    pub async fn add(
        &self,
        inputs: &[PathBuf],
        opts: &Options<'_>,
        mut cb: impl FnMut(&Entry, bool),
    ) -> Result<()> {
        let paths = pathutils::index_path_list(&self.root, inputs, true)?;
        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;

        for path in paths {
            let entry = match self.parse_entry(&path, opts.extractor).await {
                Ok(e) => e,
                Err(e) if !opts.stop_on_error => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file during add");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let existed = entry_entity::Entity::find_by_id(entry.path.clone())
                .one(&txn)
                .await
                .map_err(DbError::Sea)?
                .is_some();
            self.upsert_entry(&txn, &entry).await?;
            cb(&entry, existed);
        }
        txn.commit().await.map_err(DbError::Sea)?;
        Ok(())
    }

    /// `remove(patterns)` (§4.1.6): deletes matching entries, their
    /// `build/<hash>/` artifacts, and their meta rows, in one transaction.
    pub async fn remove(&self, patterns: &[String]) -> Result<u64> {
        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;
        let mut total = 0u64;
        for pattern in patterns {
            let like = glob_to_like(pattern);
            let matches = entry_entity::Entity::find()
                .filter(path_like_escaped(&like))
                .all(&txn)
                .await
                .map_err(DbError::Sea)?;
            for m in matches {
                let build_dir = self.root.join(pathutils::DDB_FOLDER).join("build").join(&m.hash);
                if !m.hash.is_empty() {
                    pathutils::remove_if_exists(&build_dir)?;
                }
                meta_entity::Entity::delete_many()
                    .filter(meta_entity::Column::Path.eq(m.path.clone()))
                    .exec(&txn)
                    .await
                    .map_err(DbError::Sea)?;
                entry_entity::Entity::delete_by_id(m.path)
                    .exec(&txn)
                    .await
                    .map_err(DbError::Sea)?;
                total += 1;
            }
        }
        txn.commit().await.map_err(DbError::Sea)?;
        Ok(total)
    }

    /// `move(source, dest)` (§4.1.6): rejects dotted components and
    /// directory/file clashes; rewrites descendant paths and depths;
    /// transports meta rows; fills in newly-required parent directories.
    pub async fn move_entry(&self, source: &str, dest: &str) -> Result<()> {
        if pathutils::has_dotted_component(Path::new(source))
            || pathutils::has_dotted_component(Path::new(dest))
        {
            return Err(InvalidArgsError::DottedComponent(format!("{source} -> {dest}")).into());
        }
        let src_row = entry_entity::Entity::find_by_id(source.to_string())
            .one(self.db.conn())
            .await
            .map_err(DbError::Sea)?
            .ok_or_else(|| InvalidArgsError::Other(format!("source not found: {source}")))?;

        let dest_row = entry_entity::Entity::find_by_id(dest.to_string())
            .one(self.db.conn())
            .await
            .map_err(DbError::Sea)?;

        let src_is_dir = src_row.entry_type == EntryType::Directory as i32
            || src_row.entry_type == EntryType::DroneDB as i32;
        if let Some(d) = &dest_row {
            let dest_is_dir =
                d.entry_type == EntryType::Directory as i32 || d.entry_type == EntryType::DroneDB as i32;
            if src_is_dir != dest_is_dir {
                return Err(InvalidArgsError::Other(
                    "cannot move directory over file or file over directory".into(),
                )
                .into());
            }
        }

        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;

        let descendants = if src_is_dir {
            let prefix = format!("{source}/");
            entry_entity::Entity::find()
                .filter(entry_entity::Column::Path.starts_with(prefix.as_str()))
                .all(&txn)
                .await
                .map_err(DbError::Sea)?
        } else {
            Vec::new()
        };

        for row in &descendants {
            let new_path = format!("{dest}{}", &row.path[source.len()..]);
            self.rename_entry(&txn, &row.path, &new_path).await?;
        }
        self.rename_entry(&txn, source, dest).await?;

        // Fill in intermediate directories for the new location.
        if let Some(parent) = Path::new(dest).parent() {
            let parent = pathutils_to_string(parent);
            if !parent.is_empty() {
                let exists = entry_entity::Entity::find_by_id(parent.clone())
                    .one(&txn)
                    .await
                    .map_err(DbError::Sea)?
                    .is_some();
                if !exists {
                    self.upsert_entry(&txn, &Entry::new_directory(parent)).await?;
                }
            }
        }

        txn.commit().await.map_err(DbError::Sea)?;
        Ok(())
    }

    async fn rename_entry(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let row = entry_entity::Entity::find_by_id(old_path.to_string())
            .one(txn)
            .await
            .map_err(DbError::Sea)?
            .ok_or_else(|| InvalidArgsError::Other(format!("entry vanished during move: {old_path}")))?;

        let mut new_row = row.clone();
        new_row.path = new_path.to_string();
        new_row.depth = depth_of(new_path) as i32;
        entry_entity::ActiveModel::from(new_row).insert(txn).await.map_err(DbError::Sea)?;
        entry_entity::Entity::delete_by_id(old_path.to_string())
            .exec(txn)
            .await
            .map_err(DbError::Sea)?;

        meta_entity::Entity::update_many()
            .filter(meta_entity::Column::Path.eq(old_path))
            .col_expr(meta_entity::Column::Path, sea_orm::sea_query::Expr::value(new_path))
            .exec(txn)
            .await
            .map_err(DbError::Sea)?;
        Ok(())
    }

    /// §4.1.5 update check: compares filesystem mtime, then hash, to stored
    /// values.
    fn check_update(&self, abs_path: &Path, row: &entry_entity::Model) -> Result<UpdateCheck> {
        if !abs_path.exists() {
            return Ok(UpdateCheck::Deleted);
        }
        if abs_path.is_dir() {
            return Ok(UpdateCheck::NotModified);
        }
        let fs_mtime = pathutils::mtime_of(abs_path)?;
        if fs_mtime == row.mtime {
            return Ok(UpdateCheck::NotModified);
        }
        let hash = sha256_file(abs_path)?;
        if hash == row.hash {
            Ok(UpdateCheck::NotModified)
        } else {
            Ok(UpdateCheck::Modified)
        }
    }

    /// `sync` (§4.1.6): applies the Modified/Deleted classification to every
    /// tracked entry in one transaction, emitting change lines.
    pub async fn sync(&self, opts: &Options<'_>) -> Result<Vec<ChangeLine>> {
        let rows = entry_entity::Entity::find().all(self.db.conn()).await.map_err(DbError::Sea)?;
        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;
        let mut lines = Vec::new();

        for row in rows {
            let abs_path = self.root.join(&row.path);
            let status = self.check_update(&abs_path, &row)?;
            match status {
                UpdateCheck::NotModified => {
                    if abs_path.exists() && !abs_path.is_dir() {
                        let fs_mtime = pathutils::mtime_of(&abs_path)?;
                        if fs_mtime != row.mtime {
                            let mut am: entry_entity::ActiveModel = row.clone().into();
                            am.mtime = Set(fs_mtime);
                            am.update(&txn).await.map_err(DbError::Sea)?;
                        }
                    }
                }
                UpdateCheck::Modified => {
                    let entry = self.parse_entry(&abs_path, opts.extractor).await?;
                    self.upsert_entry(&txn, &entry).await?;
                    lines.push(ChangeLine::Updated(row.path.clone()));
                }
                UpdateCheck::Deleted => {
                    entry_entity::Entity::delete_by_id(row.path.clone())
                        .exec(&txn)
                        .await
                        .map_err(DbError::Sea)?;
                    meta_entity::Entity::delete_many()
                        .filter(meta_entity::Column::Path.eq(row.path.clone()))
                        .exec(&txn)
                        .await
                        .map_err(DbError::Sea)?;
                    lines.push(ChangeLine::Deleted(row.path.clone()));
                }
            }
        }
        txn.commit().await.map_err(DbError::Sea)?;
        debug!(changes = lines.len(), "sync completed");
        Ok(lines)
    }

    /// Non-mutating variant of `sync`: also reports `NotIndexed` for
    /// untracked filesystem files under the root (§4.1.6).
    pub async fn status(&self) -> Result<Vec<ChangeLine>> {
        let rows = entry_entity::Entity::find().all(self.db.conn()).await.map_err(DbError::Sea)?;
        let tracked: std::collections::HashSet<String> = rows.iter().map(|r| r.path.clone()).collect();
        let mut lines = Vec::new();

        for row in &rows {
            let abs_path = self.root.join(&row.path);
            match self.check_update(&abs_path, row)? {
                UpdateCheck::Modified => lines.push(ChangeLine::Updated(row.path.clone())),
                UpdateCheck::Deleted => lines.push(ChangeLine::Deleted(row.path.clone())),
                UpdateCheck::NotModified => {}
            }
        }

        let on_disk = pathutils::expand_paths(&[self.root.clone()], true, 0)?;
        for path in on_disk {
            if path == self.root {
                continue;
            }
            let rel = pathutils::relative_to(&self.root, &path)?;
            if !tracked.contains(&rel) {
                lines.push(ChangeLine::NotIndexed(rel));
            }
        }
        Ok(lines)
    }

    /// `list`/`search` (§4.1.7): pattern-matches paths via SQL `LIKE`,
    /// deduplicates, sorts by `(type, path)`.
    pub async fn list(&self, patterns: &[String], max_depth: Option<u32>) -> Result<Vec<Entry>> {
        let mut seen = std::collections::BTreeSet::new();
        let mut rows = Vec::new();
        let patterns: Vec<String> = if patterns.is_empty() {
            vec!["*".to_string()]
        } else {
            patterns.to_vec()
        };
        for pattern in &patterns {
            let like = glob_to_like(pattern);
            let mut query = entry_entity::Entity::find().filter(path_like_escaped(&like));
            if let Some(d) = max_depth {
                query = query.filter(entry_entity::Column::Depth.lte(d as i32));
            }
            let matches = query.all(self.db.conn()).await.map_err(DbError::Sea)?;
            for m in matches {
                if seen.insert(m.path.clone()) {
                    rows.push(m);
                }
            }
        }
        rows.sort_by(|a, b| a.entry_type.cmp(&b.entry_type).then_with(|| a.path.cmp(&b.path)));
        Ok(rows.into_iter().map(row_to_entry).collect())
    }

    /// Alias of `list` without a depth ceiling, used by the `search` surface
    /// (§4.1.7 groups list/search/remove under the same pattern semantics).
    pub async fn search(&self, patterns: &[String]) -> Result<Vec<Entry>> {
        self.list(patterns, None).await
    }

    /// `stamp` (§4.1.8, §3.3): builds `entries` from non-directory rows and
    /// `meta` from all meta ids, sorted, with a SHA-256 checksum.
    pub async fn stamp(&self) -> Result<Stamp> {
        let rows = entry_entity::Entity::find()
            .filter(entry_entity::Column::EntryType.ne(EntryType::Directory as i32))
            .filter(entry_entity::Column::EntryType.ne(EntryType::DroneDB as i32))
            .all(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        let entries: Vec<StampEntry> = rows
            .into_iter()
            .map(|r| StampEntry { path: r.path, hash: r.hash })
            .collect();

        let meta_rows = meta_entity::Entity::find().all(self.db.conn()).await.map_err(DbError::Sea)?;
        let meta: Vec<Uuid> = meta_rows.into_iter().map(|m| m.id).collect();

        Ok(Stamp::build(entries, meta))
    }
}

fn row_to_entry(row: entry_entity::Model) -> Entry {
    Entry {
        path: row.path,
        hash: row.hash,
        entry_type: entry_type_from_i32(row.entry_type),
        properties: serde_json::from_str(&row.properties).unwrap_or(serde_json::Value::Null),
        mtime: row.mtime,
        size: row.size as u64,
        depth: row.depth as u32,
        point_geom: None,
        polygon_geom: None,
        meta: None,
    }
}

fn entry_type_from_i32(v: i32) -> EntryType {
    const TYPES: [EntryType; 15] = [
        EntryType::Undefined,
        EntryType::Directory,
        EntryType::Generic,
        EntryType::GeoImage,
        EntryType::GeoRaster,
        EntryType::PointCloud,
        EntryType::Image,
        EntryType::DroneDB,
        EntryType::Markdown,
        EntryType::Video,
        EntryType::GeoVideo,
        EntryType::Panorama,
        EntryType::GeoPanorama,
        EntryType::Model,
        EntryType::Vector,
    ];
    TYPES.get(v as usize).copied().unwrap_or(EntryType::Undefined)
}

fn pathutils_to_string(p: &Path) -> String {
    p.components()
        .filter_map(|c| match c {
            std::path::Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `path LIKE ? ESCAPE '/'` (§4.1.7): `'/'` is the pattern engine's own
/// escape character (see `glob_to_like`), so the SQL clause must name it
/// explicitly rather than rely on SQLite's default (unescaped) `LIKE`.
fn path_like_escaped(like: &str) -> sea_orm::Condition {
    sea_orm::Condition::all().add(sea_orm::sea_query::Expr::cust_with_values(
        "path LIKE ? ESCAPE '/'",
        [like],
    ))
}

/// Converts a `*` glob pattern into a SQL `LIKE` pattern, escaping `_` and
/// `/` as the original's pattern engine does (§4.1.7, §8's `*`↔`%` property).
pub fn glob_to_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        match c {
            '*' => out.push('%'),
            '_' => out.push_str("/_"),
            '/' => out.push_str("//"),
            '%' => out.push_str("/%"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_maps_to_percent() {
        assert_eq!(glob_to_like("*.jpg"), "%.jpg");
        assert_eq!(glob_to_like("a/*"), "a//%");
    }

    #[test]
    fn entry_type_roundtrips_through_index() {
        for (i, t) in [
            EntryType::Undefined,
            EntryType::Directory,
            EntryType::GeoImage,
            EntryType::Vector,
        ]
        .into_iter()
        .enumerate()
        {
            let _ = i;
            assert_eq!(entry_type_from_i32(t as i32), t);
        }
    }
}
