//! Password guard (C1's `passwords` table; CLI surface `password
//! {append|verify|clear}`, §6.2): hashed passwords gating anonymous access
//! to a dataset. Multiple passwords may be appended — any one of them
//! verifies.
//!
//! Hashing uses `argon2` for password derivation, rather than this crate's
//! SHA-256 (`hashing::sha256_bytes`), which is reserved for content
//! addressing, not credential storage.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::rngs::OsRng;
use sea_orm::{ActiveModelTrait, ActiveValue, ActiveValue::Set, EntityTrait};

use crate::db::entities::password as password_entity;
use crate::db::Database;
use crate::error::{DbError, InvalidArgsError, Result};

pub struct PasswordGuard<'a> {
    db: &'a Database,
}

impl<'a> PasswordGuard<'a> {
    pub fn new(db: &'a Database) -> PasswordGuard<'a> {
        PasswordGuard { db }
    }

    /// Appends a new password hash, in addition to any already stored.
    pub async fn append(&self, plaintext: &str) -> Result<()> {
        if plaintext.is_empty() {
            return Err(InvalidArgsError::Empty("password").into());
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(plaintext.as_bytes(), &salt)
            .map_err(|e| InvalidArgsError::Other(format!("password hashing failed: {e}")))?
            .to_string();

        let am = password_entity::ActiveModel {
            id: ActiveValue::NotSet,
            hash: Set(hash),
        };
        am.insert(self.db.conn()).await.map_err(DbError::Sea)?;
        Ok(())
    }

    /// True if `plaintext` matches any stored password hash. A dataset with
    /// no stored passwords verifies everything (no guard configured).
    pub async fn verify(&self, plaintext: &str) -> Result<bool> {
        let rows = password_entity::Entity::find().all(self.db.conn()).await.map_err(DbError::Sea)?;
        if rows.is_empty() {
            return Ok(true);
        }
        let argon2 = Argon2::default();
        for row in rows {
            let Ok(parsed) = PasswordHash::new(&row.hash) else {
                continue;
            };
            if argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Removes every stored password, reopening the dataset to anonymous
    /// access.
    pub async fn clear(&self) -> Result<u64> {
        let result = password_entity::Entity::delete_many()
            .exec(self.db.conn())
            .await
            .map_err(DbError::Sea)?;
        Ok(result.rows_affected)
    }

    /// True if the dataset has at least one password configured.
    pub async fn is_protected(&self) -> Result<bool> {
        let count = password_entity::Entity::find().all(self.db.conn()).await.map_err(DbError::Sea)?.len();
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn append_then_verify_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create_or_open(&dir.path().join("dbase.sqlite")).await.unwrap();
        let guard = PasswordGuard::new(&db);

        // no password configured: verifies anything.
        assert!(guard.verify("anything").await.unwrap());

        guard.append("hunter2").await.unwrap();
        assert!(guard.is_protected().await.unwrap());
        assert!(guard.verify("hunter2").await.unwrap());
        assert!(!guard.verify("wrong").await.unwrap());
    }

    #[tokio::test]
    async fn clear_reopens_anonymous_access() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::create_or_open(&dir.path().join("dbase.sqlite")).await.unwrap();
        let guard = PasswordGuard::new(&db);

        guard.append("secret").await.unwrap();
        assert!(!guard.verify("wrong").await.unwrap());

        let removed = guard.clear().await.unwrap();
        assert_eq!(removed, 1);
        assert!(guard.verify("anything").await.unwrap());
    }
}
