//! Build pipeline (C9): per-entry-type derived artifacts under
//! `<ddb>/build/<entry.hash>/` (§4.5).

pub mod cog;
pub mod nexus;
pub mod pointcloud;
pub mod thumb;
pub mod vector;

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::entry::{Entry, EntryType};
use crate::error::Result;

/// One artifact a builder produced, relative to its `build/<hash>/` output
/// directory.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub relative_path: PathBuf,
    pub kind: &'static str,
}

/// Per-entry-type builder dispatch (§9 "tagged variant plus dispatch table"
/// design note, replacing the source's tiler/builder class hierarchy).
pub trait Builder: Send + Sync {
    fn build(&self, entry: &Entry, source: &Path, out_dir: &Path) -> Result<Vec<Artifact>>;
}

pub struct BuildContext<'a> {
    pub cog: &'a dyn cog::CogBackend,
    pub nexus: &'a dyn nexus::NexusBackend,
    pub pointcloud: &'a dyn pointcloud::PointCloudBackend,
    pub thumb: &'a dyn thumb::ThumbBackend,
}

impl<'a> Default for BuildContext<'a> {
    fn default() -> Self {
        BuildContext {
            cog: &cog::CopyOnlyCogBackend,
            nexus: &nexus::CopyOnlyNexusBackend,
            pointcloud: &pointcloud::EmptyPointCloudBackend,
            thumb: &thumb::ImageCrateThumbBackend,
        }
    }
}

/// `ddb/<hash>/` artifact directory for one entry.
pub fn build_dir(ddb_root: &Path, hash: &str) -> PathBuf {
    ddb_root.join(".ddb").join("build").join(hash)
}

/// True when artifacts already exist for `entry`'s hash (used by
/// `buildPending` to skip already-built entries, §4.5).
pub fn has_artifacts(ddb_root: &Path, entry: &Entry) -> bool {
    let dir = build_dir(ddb_root, &entry.hash);
    dir.exists() && std::fs::read_dir(&dir).map(|mut it| it.next().is_some()).unwrap_or(false)
}

/// Dispatches one entry to its builder per the §4.5 table. Entry types with
/// no artifact (directories, generic files, markdown, etc.) return an empty
/// artifact list without error.
pub fn build_one(
    ctx: &BuildContext<'_>,
    ddb_root: &Path,
    source: &Path,
    entry: &Entry,
) -> Result<Vec<Artifact>> {
    if entry.hash.is_empty() {
        return Ok(Vec::new());
    }
    let out_dir = build_dir(ddb_root, &entry.hash);
    std::fs::create_dir_all(&out_dir)?;

    let artifacts = match entry.entry_type {
        EntryType::GeoRaster => cog::CogBuilder { backend: ctx.cog }.build(entry, source, &out_dir)?,
        EntryType::Model => nexus::NexusBuilder { backend: ctx.nexus }.build(entry, source, &out_dir)?,
        EntryType::PointCloud => {
            pointcloud::PointCloudBuilder { backend: ctx.pointcloud }.build(entry, source, &out_dir)?
        }
        EntryType::Image | EntryType::GeoImage | EntryType::Panorama | EntryType::GeoPanorama => {
            thumb::ThumbBuilder { backend: ctx.thumb }.build(entry, source, &out_dir)?
        }
        EntryType::Vector => vector::VectorBuilder.build(entry, source, &out_dir)?,
        _ => Vec::new(),
    };
    debug!(path = %entry.path, artifacts = artifacts.len(), "build dispatched");
    Ok(artifacts)
}

/// `buildAll` (§4.5): builds every entry with an on-disk source file.
pub fn build_all<'a>(
    ctx: &BuildContext<'_>,
    ddb_root: &Path,
    entries: impl Iterator<Item = (&'a Entry, PathBuf)>,
) -> Result<usize> {
    let mut count = 0;
    for (entry, source) in entries {
        build_one(ctx, ddb_root, &source, entry)?;
        count += 1;
    }
    info!(count, "build: all entries processed");
    Ok(count)
}

/// `buildPending` (§4.5): builds only entries whose hash has no artifact
/// directory yet.
pub fn build_pending<'a>(
    ctx: &BuildContext<'_>,
    ddb_root: &Path,
    entries: impl Iterator<Item = (&'a Entry, PathBuf)>,
) -> Result<usize> {
    let mut count = 0;
    for (entry, source) in entries {
        if has_artifacts(ddb_root, entry) {
            continue;
        }
        build_one(ctx, ddb_root, &source, entry)?;
        count += 1;
    }
    info!(count, "build: pending entries processed");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_dir_is_scoped_by_hash() {
        let dir = build_dir(Path::new("/work/dataset"), "abc123");
        assert_eq!(dir, PathBuf::from("/work/dataset/.ddb/build/abc123"));
    }
}
