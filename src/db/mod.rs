//! Embedded relational store (C1): a SQLite-class engine for entries,
//! metadata and credentials, opened with a WAL-mode PRAGMA sequence and
//! connection-pool shape tuned for a single-writer, many-readers embedded
//! database.
//!
//! Geometries are stored as canonical WKT text columns rather than through a
//! loaded spatial extension — `sea-orm`/`sqlx` carry no SpatiaLite binding —
//! with bounding-box prefiltering done in application code. See DESIGN.md
//! for the full rationale.

pub mod entities;
pub mod migration;

use std::path::Path;
use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection, Statement};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::error::{DbError, Result};

/// Wraps a `sea_orm::DatabaseConnection` to `.ddb/dbase.sqlite`.
pub struct Database {
    conn: DatabaseConnection,
}

async fn apply_pragmas(conn: &DatabaseConnection) {
    for pragma in [
        "PRAGMA journal_mode=WAL",
        "PRAGMA synchronous=NORMAL",
        "PRAGMA temp_store=MEMORY",
        "PRAGMA cache_size=-20000",
        "PRAGMA mmap_size=67108864",
        "PRAGMA foreign_keys=ON",
    ] {
        let _ = conn
            .execute(Statement::from_string(sea_orm::DatabaseBackend::Sqlite, pragma))
            .await;
    }
}

fn connect_options(url: String) -> ConnectOptions {
    let mut opt = ConnectOptions::new(url);
    opt.max_connections(10)
        .min_connections(5)
        .connect_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(8))
        .max_lifetime(Duration::from_secs(8))
        .sqlx_logging(false);
    opt
}

impl Database {
    /// Opens (creating the sqlite file if missing) `.ddb/dbase.sqlite` and
    /// runs pending migrations. `init` (§4.1.1) uses this with a fresh path;
    /// `open` (§4.1.1) uses it on an existing one.
    pub async fn create_or_open(path: &Path) -> Result<Database> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let conn = SeaDatabase::connect(connect_options(url))
            .await
            .map_err(DbError::Sea)?;
        apply_pragmas(&conn).await;
        migration::Migrator::up(&conn, None)
            .await
            .map_err(DbError::Sea)?;
        info!(path = %path.display(), "opened dronedb database");
        Ok(Database { conn })
    }

    /// Opens an existing database file without creating one, returning
    /// `DbError::NotADatabase` when it doesn't exist (§4.1.1 `open`).
    pub async fn open_existing(path: &Path) -> Result<Database> {
        if !path.exists() {
            return Err(DbError::NotADatabase.into());
        }
        let url = format!("sqlite://{}", path.display());
        let conn = SeaDatabase::connect(connect_options(url))
            .await
            .map_err(DbError::Sea)?;
        apply_pragmas(&conn).await;
        migration::Migrator::up(&conn, None)
            .await
            .map_err(DbError::Sea)?;
        Ok(Database { conn })
    }

    pub fn conn(&self) -> &DatabaseConnection {
        &self.conn
    }
}
