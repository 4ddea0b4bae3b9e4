//! Crate-wide error taxonomy.
//!
//! One `thiserror` enum per subsystem (filesystem, database, invalid args,
//! build/GDAL/point-cloud, registry/network, merge), folded into a single
//! top-level [`DdbError`] via `#[from]` and composed at call boundaries.

use std::path::PathBuf;
use thiserror::Error;

/// Coarse numeric code for the boundary described in spec §7: no language
/// bindings are built here, but callers embedding this crate behind a
/// narrower ABI need the same three-way split the original C ABI exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    None = 0,
    Exception = 1,
    BuildDepMissing = 2,
}

#[derive(Error, Debug)]
pub enum FsError {
    #[error("path not found: {0}")]
    NotFound(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("path {0} is not contained under root {1}")]
    NotUnderRoot(PathBuf, PathBuf),
    #[error("rename/copy failed: {0}")]
    CopyFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database schema missing or not a dronedb database")]
    NotADatabase,
    #[error("database already initialized at {0}")]
    AlreadyInitialized(PathBuf),
    #[error("database locked")]
    Locked,
    #[error(transparent)]
    Sea(#[from] sea_orm::DbErr),
}

#[derive(Error, Debug)]
pub enum InvalidArgsError {
    #[error("required parameter is empty: {0}")]
    Empty(&'static str),
    #[error("invalid meta key {0:?}: {1}")]
    BadKey(String, &'static str),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("path contains dotted component: {0}")]
    DottedComponent(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("cannot apply delta: {0} unresolved conflict(s)")]
    Conflicts(usize),
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("transport error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("authentication failed: no stored credentials for {0}")]
    NoCredentials(String),
    #[error("authentication failed: bad credentials")]
    BadCredentials,
    #[error("authentication failed: server returned 401")]
    Unauthorized,
    #[error("server returned a structured error: {0}")]
    Server(String),
    #[error("remote has advanced past our last-known stamp; pull required")]
    PullRequired,
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("missing build dependency: {0}")]
    DepMissing(String),
    #[error("raster library error: {0}")]
    Gdal(String),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("point cloud library error: {0}")]
    PointCloud(String),
}

/// Top-level error, the union every public API in this crate returns.
#[derive(Error, Debug)]
pub enum DdbError {
    #[error(transparent)]
    Fs(#[from] FsError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    InvalidArgs(#[from] InvalidArgsError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl DdbError {
    /// Coarse classification used by embedders that need the C-ABI-shaped
    /// `(errcode, last_error_string)` pair from spec §7, without this crate
    /// itself building a `cdylib`.
    pub fn code(&self) -> ErrorCode {
        match self {
            DdbError::Build(BuildError::DepMissing(_)) => ErrorCode::BuildDepMissing,
            _ => ErrorCode::Exception,
        }
    }
}

pub type Result<T> = std::result::Result<T, DdbError>;

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<String>> = std::cell::RefCell::new(None);
}

/// Records `err` in the calling thread's last-error slot and returns it
/// unchanged, for use at public API boundaries (`op().inspect_err(record_last_error)`).
pub fn record_last_error(err: &DdbError) {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(err.to_string()));
}

/// Retrieves (without clearing) the last error recorded on this thread.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}
