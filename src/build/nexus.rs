//! Mesh builder (§4.5 `buildNexus`): compresses a mesh (obj/ply) into the
//! Nexus multiresolution format and copies referenced textures alongside.

use std::path::Path;

use crate::entry::Entry;
use crate::error::{BuildError, Result};

use super::{Artifact, Builder};

/// Mesh compression backend, behind a trait because no Nexus/vcglib
/// binding is part of this crate's dependency stack (§1 scoping, same
/// pattern as `CogBackend`).
pub trait NexusBackend: Send + Sync {
    fn compress(&self, input: &Path, output: &Path) -> Result<()>;

    /// Referenced material file, if the mesh format names one (e.g. an
    /// `.obj`'s `mtllib` directive). A missing referenced file is the
    /// `BuildDepMissing` case from §7.
    fn referenced_material(&self, input: &Path) -> Result<Option<std::path::PathBuf>>;
}

/// Default backend: copies the source through unchanged and only checks
/// for a sibling `.mtl` file named by a simple `mtllib` scan, so the
/// `BuildDepMissing` error path is still reachable without a real mesh
/// compressor linked in.
pub struct CopyOnlyNexusBackend;

impl NexusBackend for CopyOnlyNexusBackend {
    fn compress(&self, input: &Path, output: &Path) -> Result<()> {
        std::fs::copy(input, output)?;
        Ok(())
    }

    fn referenced_material(&self, input: &Path) -> Result<Option<std::path::PathBuf>> {
        if input.extension().and_then(|e| e.to_str()) != Some("obj") {
            return Ok(None);
        }
        let text = std::fs::read_to_string(input)?;
        for line in text.lines() {
            if let Some(name) = line.strip_prefix("mtllib ") {
                return Ok(Some(input.with_file_name(name.trim())));
            }
        }
        Ok(None)
    }
}

pub struct NexusBuilder<'a> {
    pub backend: &'a dyn NexusBackend,
}

impl<'a> Builder for NexusBuilder<'a> {
    fn build(&self, _entry: &Entry, source: &Path, out_dir: &Path) -> Result<Vec<Artifact>> {
        if let Some(mtl) = self.backend.referenced_material(source)? {
            if !mtl.exists() {
                return Err(BuildError::DepMissing(format!(
                    "{} references missing material {}",
                    source.display(),
                    mtl.display()
                ))
                .into());
            }
            let dest = out_dir.join(mtl.file_name().unwrap_or_default());
            std::fs::copy(&mtl, &dest)?;
        }

        let output = out_dir.join("mesh.nxs");
        self.backend.compress(source, &output)?;

        Ok(vec![Artifact { relative_path: "mesh.nxs".into(), kind: "nexus" }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_referenced_material_surfaces_as_dep_missing() {
        let dir = tempfile::tempdir().unwrap();
        let obj = dir.path().join("model.obj");
        std::fs::write(&obj, "mtllib missing.mtl\n").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let backend = CopyOnlyNexusBackend;
        let entry = Entry::new_directory("model.obj".to_string());
        let result = NexusBuilder { backend: &backend }.build(&entry, &obj, &out);
        assert!(matches!(
            result,
            Err(crate::error::DdbError::Build(BuildError::DepMissing(_)))
        ));
    }
}
