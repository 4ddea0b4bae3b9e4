//! Metadata manager (C6): key-scoped JSON metadata attached to entries or to
//! the dataset as a whole (§4.2). Every operation is ported from the
//! original `metamanager.cpp`'s validation rules (key pluralization, JSON
//! coercion, `entryPath` existence check) and reimplemented over sea-orm.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, TransactionTrait,
};
use serde_json::Value;
use uuid::Uuid;

use crate::db::entities::{database_meta, meta_item as meta_entity};
use crate::db::Database;
use crate::error::{DbError, InvalidArgsError, Result};

/// In-memory shape of one metadata row (§3.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetaItem {
    pub id: Uuid,
    pub path: String,
    pub key: String,
    pub data: Value,
    pub mtime: i64,
}

impl From<meta_entity::Model> for MetaItem {
    fn from(m: meta_entity::Model) -> Self {
        MetaItem {
            id: m.id,
            path: m.path,
            key: m.key,
            data: serde_json::from_str(&m.data).unwrap_or(Value::Null),
            mtime: m.mtime,
        }
    }
}

pub struct MetaManager<'a> {
    db: &'a Database,
}

impl<'a> MetaManager<'a> {
    pub fn new(db: &'a Database) -> MetaManager<'a> {
        MetaManager { db }
    }

    /// Normalizes a caller-supplied path: empty/`.` means dataset-level;
    /// anything else must name an existing entry (`entryPath` in the
    /// original).
    async fn entry_path(&self, path: Option<&str>) -> Result<String> {
        let path = path.unwrap_or("").trim();
        if path.is_empty() || path == "." {
            return Ok(String::new());
        }
        let exists = crate::db::entities::entry::Entity::find_by_id(path.to_string())
            .one(self.db.conn())
            .await
            .map_err(DbError::Sea)?
            .is_some();
        if !exists {
            return Err(InvalidArgsError::Other(format!("path does not exist in index: {path}")).into());
        }
        Ok(path.to_string())
    }

    /// Enforces the plural/singular policy (§4.2, §9 Open Question —
    /// resolved as "reject singular keys on `add`", see DESIGN.md).
    fn validate_key(key: &str, want_list: bool) -> Result<()> {
        if key.is_empty() {
            return Err(InvalidArgsError::Empty("key").into());
        }
        let is_plural = key.ends_with('s');
        if want_list && !is_plural {
            return Err(InvalidArgsError::BadKey(key.to_string(), "must be plural when used with add").into());
        }
        if !want_list && is_plural {
            return Err(InvalidArgsError::BadKey(key.to_string(), "must be singular when used with set").into());
        }
        Ok(())
    }

    /// Validates `data` as JSON, re-wrapping bare scalars in quotes the way
    /// the original falls back before giving up, and returns the
    /// canonicalized (re-serialized) form.
    fn validate_data(data: &str) -> Result<String> {
        if let Ok(v) = serde_json::from_str::<Value>(data) {
            return Ok(serde_json::to_string(&v)?);
        }
        let quoted = format!("\"{}\"", data.replace('"', "\\\""));
        match serde_json::from_str::<Value>(&quoted) {
            Ok(v) => Ok(serde_json::to_string(&v)?),
            Err(e) => Err(InvalidArgsError::InvalidJson(e.to_string()).into()),
        }
    }

    async fn bump_last_update(&self, txn: &DatabaseTransaction) -> Result<()> {
        if let Some(row) = database_meta::Entity::find_by_id(0)
            .one(txn)
            .await
            .map_err(DbError::Sea)?
        {
            let mut am: database_meta::ActiveModel = row.into();
            am.last_update = Set(Utc::now().timestamp());
            am.update(txn).await.map_err(DbError::Sea)?;
        }
        Ok(())
    }

    /// `add`: key must be plural (list-valued); always inserts a new row.
    pub async fn add(&self, key: &str, data: &str, path: Option<&str>) -> Result<MetaItem> {
        Self::validate_key(key, true)?;
        let json = Self::validate_data(data)?;
        let path = self.entry_path(path).await?;

        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;
        let id = Uuid::new_v4();
        let now = Utc::now().timestamp();
        let am = meta_entity::ActiveModel {
            id: Set(id),
            path: Set(path.clone()),
            key: Set(key.to_string()),
            data: Set(json.clone()),
            mtime: Set(now),
        };
        am.insert(&txn).await.map_err(DbError::Sea)?;
        self.bump_last_update(&txn).await?;
        txn.commit().await.map_err(DbError::Sea)?;

        Ok(MetaItem {
            id,
            path,
            key: key.to_string(),
            data: serde_json::from_str(&json)?,
            mtime: now,
        })
    }

    /// `set`: key must be singular; upserts keyed by (path, key).
    pub async fn set(&self, key: &str, data: &str, path: Option<&str>) -> Result<MetaItem> {
        Self::validate_key(key, false)?;
        let json = Self::validate_data(data)?;
        let path = self.entry_path(path).await?;

        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;
        let existing = meta_entity::Entity::find()
            .filter(meta_entity::Column::Path.eq(path.clone()))
            .filter(meta_entity::Column::Key.eq(key))
            .one(&txn)
            .await
            .map_err(DbError::Sea)?;

        let now = Utc::now().timestamp();
        let id = match existing {
            Some(row) => {
                let id = row.id;
                let mut am: meta_entity::ActiveModel = row.into();
                am.data = Set(json.clone());
                am.mtime = Set(now);
                am.update(&txn).await.map_err(DbError::Sea)?;
                id
            }
            None => {
                let id = Uuid::new_v4();
                let am = meta_entity::ActiveModel {
                    id: Set(id),
                    path: Set(path.clone()),
                    key: Set(key.to_string()),
                    data: Set(json.clone()),
                    mtime: Set(now),
                };
                am.insert(&txn).await.map_err(DbError::Sea)?;
                id
            }
        };
        self.bump_last_update(&txn).await?;
        txn.commit().await.map_err(DbError::Sea)?;

        Ok(MetaItem {
            id,
            path,
            key: key.to_string(),
            data: serde_json::from_str(&json)?,
            mtime: now,
        })
    }

    /// Deletes one row by id.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        meta_entity::Entity::delete_by_id(id)
            .exec(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        Ok(())
    }

    /// Deletes all rows with `(path, key)`.
    pub async fn unset(&self, key: &str, path: Option<&str>) -> Result<u64> {
        let path = self.entry_path(path).await?;
        let result = meta_entity::Entity::delete_many()
            .filter(meta_entity::Column::Path.eq(path))
            .filter(meta_entity::Column::Key.eq(key))
            .exec(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        Ok(result.rows_affected)
    }

    /// Returns every row matching `(path, key)` (list semantics) or at most
    /// one row for a singleton key, per §4.2.
    pub async fn get(&self, key: &str, path: Option<&str>) -> Result<Vec<MetaItem>> {
        let path = self.entry_path(path).await?;
        let rows = meta_entity::Entity::find()
            .filter(meta_entity::Column::Path.eq(path))
            .filter(meta_entity::Column::Key.eq(key))
            .all(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        Ok(rows.into_iter().map(MetaItem::from).collect())
    }

    /// Lists the distinct keys present at `path`.
    pub async fn list(&self, path: Option<&str>) -> Result<Vec<String>> {
        let path = self.entry_path(path).await?;
        let rows = meta_entity::Entity::find()
            .filter(meta_entity::Column::Path.eq(path))
            .all(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        let mut keys: Vec<String> = rows.into_iter().map(|r| r.key).collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Dumps rows by id set; an empty set dumps everything. Used to
    /// round-trip metadata through the registry push/pull protocol
    /// (§4.6.1's `meta/dump`) and through `apply_delta` (§4.3.2 step 4).
    pub async fn dump(&self, ids: &[Uuid]) -> Result<Vec<MetaItem>> {
        let rows = if ids.is_empty() {
            meta_entity::Entity::find().all(self.db.conn()).await
        } else {
            meta_entity::Entity::find()
                .filter(meta_entity::Column::Id.is_in(ids.iter().copied()))
                .all(self.db.conn())
                .await
        }
        .map_err(DbError::Sea)?;
        Ok(rows.into_iter().map(MetaItem::from).collect())
    }

    /// Inserts each row exactly as dumped, preserving its original id, so
    /// meta survives a delta apply unchanged (§4.3.2 step 4, §B supplement).
    pub async fn restore(&self, dump: &[MetaItem]) -> Result<()> {
        if dump.is_empty() {
            return Ok(());
        }
        let txn = self.db.conn().begin().await.map_err(DbError::Sea)?;
        for item in dump {
            let am = meta_entity::ActiveModel {
                id: Set(item.id),
                path: Set(item.path.clone()),
                key: Set(item.key.clone()),
                data: Set(serde_json::to_string(&item.data)?),
                mtime: Set(item.mtime),
            };
            // restore is idempotent: a retried pull/push may replay the same ids.
            meta_entity::Entity::insert(am)
                .on_conflict(
                    sea_orm::sea_query::OnConflict::column(meta_entity::Column::Id)
                        .update_columns([
                            meta_entity::Column::Path,
                            meta_entity::Column::Key,
                            meta_entity::Column::Data,
                            meta_entity::Column::Mtime,
                        ])
                        .to_owned(),
                )
                .exec(&txn)
                .await
                .map_err(DbError::Sea)?;
        }
        self.bump_last_update(&txn).await?;
        txn.commit().await.map_err(DbError::Sea)?;
        Ok(())
    }

    /// Deletes rows by id set.
    pub async fn bulk_remove(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = meta_entity::Entity::delete_many()
            .filter(meta_entity::Column::Id.is_in(ids.iter().copied()))
            .exec(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation_matches_pluralization_rule() {
        assert!(MetaManager::validate_key("tags", true).is_ok());
        assert!(MetaManager::validate_key("tag", true).is_err());
        assert!(MetaManager::validate_key("tag", false).is_ok());
        assert!(MetaManager::validate_key("tags", false).is_err());
    }

    #[test]
    fn data_validation_wraps_bare_scalars() {
        assert_eq!(MetaManager::validate_data("\"hi\"").unwrap(), "\"hi\"");
        assert_eq!(MetaManager::validate_data("42").unwrap(), "42");
        assert_eq!(MetaManager::validate_data("hello").unwrap(), "\"hello\"");
        // Malformed JSON falls back to a quoted string literal rather than
        // failing outright, matching the original's second-chance coercion.
        assert_eq!(
            MetaManager::validate_data("{not json").unwrap(),
            serde_json::to_string("{not json").unwrap()
        );
    }
}
