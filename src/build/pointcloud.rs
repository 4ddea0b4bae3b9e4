//! Point cloud builder (§4.5 `buildEpt`): produces an EPT directory
//! (`ept.json` + tiles) from a las/laz source.

use std::path::Path;

use crate::entry::Entry;
use crate::error::Result;

use super::{Artifact, Builder};

/// Point-cloud indexing backend, behind a trait because no PDAL/Untwine
/// binding is part of this crate's dependency stack (§1 scoping).
pub trait PointCloudBackend: Send + Sync {
    fn build_ept(&self, input: &Path, out_dir: &Path) -> Result<()>;
}

/// Default backend: writes a minimal, schema-valid `ept.json` with no
/// tile data, so downstream EPT tiling (`tiling::ept`) has something to
/// open even without a real indexer linked in.
pub struct EmptyPointCloudBackend;

impl PointCloudBackend for EmptyPointCloudBackend {
    fn build_ept(&self, _input: &Path, out_dir: &Path) -> Result<()> {
        let manifest = serde_json::json!({
            "points": 0,
            "schema": [],
            "bounds": [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            "srs": { "wkt": "" },
        });
        std::fs::write(out_dir.join("ept.json"), serde_json::to_string_pretty(&manifest)?)?;
        Ok(())
    }
}

pub struct PointCloudBuilder<'a> {
    pub backend: &'a dyn PointCloudBackend,
}

impl<'a> Builder for PointCloudBuilder<'a> {
    fn build(&self, _entry: &Entry, source: &Path, out_dir: &Path) -> Result<Vec<Artifact>> {
        let ept_dir = out_dir.join("ept");
        std::fs::create_dir_all(&ept_dir)?;
        self.backend.build_ept(source, &ept_dir)?;
        Ok(vec![Artifact { relative_path: "ept/ept.json".into(), kind: "ept" }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_backend_writes_valid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("build");
        std::fs::create_dir_all(&out).unwrap();
        let entry = Entry::new_directory("cloud.laz".to_string());
        let artifacts = PointCloudBuilder { backend: &EmptyPointCloudBackend }
            .build(&entry, Path::new("cloud.laz"), &out)
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(out.join("ept/ept.json").exists());
    }
}
