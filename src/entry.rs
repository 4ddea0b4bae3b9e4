//! Entry model (C4): a typed record for one filesystem object, including
//! type fingerprint, geometry and free-form properties (§3.1).

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pathutils::depth_of;

/// Closed set of entry type tags (§3.1), classified by extension and
/// content probes. A plain `strum`-derived discriminant rather than a
/// payload-carrying variant, since every type here is already a leaf tag;
/// type-specific data lives in `properties`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "PascalCase")]
pub enum EntryType {
    Undefined,
    Directory,
    Generic,
    GeoImage,
    GeoRaster,
    PointCloud,
    Image,
    DroneDB,
    Markdown,
    Video,
    GeoVideo,
    Panorama,
    GeoPanorama,
    Model,
    Vector,
}

impl Default for EntryType {
    fn default() -> Self {
        EntryType::Undefined
    }
}

impl EntryType {
    /// True for the two type tags the stamp and delta engines treat as
    /// non-content (directories, and nested datasets) — see §4.1.8.
    pub fn is_directory_like(self) -> bool {
        matches!(self, EntryType::Directory | EntryType::DroneDB)
    }
}

/// A 3D point in WGS84, axis order (longitude, latitude, altitude) per §3.1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

/// A closed polygon ring in WGS84. By convention the first and last points
/// are equal (§4.1.4's `(ul, ll, lr, ur, ul)` shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub points: Vec<Point3D>,
}

impl Polygon {
    pub fn closed_ring(points: Vec<(f64, f64, f64)>) -> Polygon {
        Polygon {
            points: points
                .into_iter()
                .map(|(lon, lat, alt)| Point3D { lon, lat, alt })
                .collect(),
        }
    }

    /// Axis-aligned bounding box (min_lon, min_lat, max_lon, max_lat), used
    /// for the SQL bounding-box prefilter that substitutes for a loaded
    /// spatial index extension (see DESIGN.md).
    pub fn bbox(&self) -> Option<(f64, f64, f64, f64)> {
        if self.points.is_empty() {
            return None;
        }
        let mut min_lon = f64::MAX;
        let mut min_lat = f64::MAX;
        let mut max_lon = f64::MIN;
        let mut max_lat = f64::MIN;
        for p in &self.points {
            min_lon = min_lon.min(p.lon);
            min_lat = min_lat.min(p.lat);
            max_lon = max_lon.max(p.lon);
            max_lat = max_lat.max(p.lat);
        }
        Some((min_lon, min_lat, max_lon, max_lat))
    }

    /// Renders as WKT `POLYGON Z (...)`, the text column format the embedded
    /// store uses in place of a native spatial column (see DESIGN.md).
    pub fn to_wkt(&self) -> String {
        let coords: Vec<String> = self
            .points
            .iter()
            .map(|p| format!("{} {} {}", p.lon, p.lat, p.alt))
            .collect();
        format!("POLYGON Z (({}))", coords.join(", "))
    }
}

impl Point3D {
    pub fn to_wkt(&self) -> String {
        format!("POINT Z ({} {} {})", self.lon, self.lat, self.alt)
    }
}

/// One tracked filesystem object (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    /// Forward-slash relative path under the dataset root; unique primary key.
    pub path: String,
    /// Lowercase hex SHA-256; empty for directories and dataset-roots.
    pub hash: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub properties: Value,
    pub mtime: i64,
    pub size: u64,
    pub depth: u32,
    pub point_geom: Option<Point3D>,
    pub polygon_geom: Option<Polygon>,
    /// Materialized from C6 when queried; `None` when the caller didn't ask
    /// for metadata to be joined in.
    pub meta: Option<Value>,
}

impl Entry {
    /// Builds a bare directory entry for `path`, the shape the index engine
    /// synthesizes for intermediate parents (§3.1 invariant, §8 scenario).
    pub fn new_directory(path: impl Into<String>) -> Entry {
        let path = path.into();
        let depth = depth_of(&path);
        Entry {
            path,
            hash: String::new(),
            entry_type: EntryType::Directory,
            properties: Value::Object(Default::default()),
            mtime: 0,
            size: 0,
            depth,
            point_geom: None,
            polygon_geom: None,
            meta: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.entry_type.is_directory_like()
    }
}

/// Classifies a path by extension alone (the coarse first pass of §4.1.3;
/// finer EXIF/content probes for images/videos/point-clouds live in
/// `index::classify`, which calls this as its fallback).
pub fn classify_by_extension(path: &Path) -> EntryType {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "md" | "markdown" => EntryType::Markdown,
        "las" | "laz" => EntryType::PointCloud,
        "obj" => EntryType::Model,
        "geojson" | "shp" | "gpkg" | "kml" | "dxf" => EntryType::Vector,
        "jpg" | "jpeg" | "png" | "tif" | "tiff" | "bmp" | "gif" | "webp" => EntryType::Image,
        "mp4" | "mov" | "avi" | "mkv" => EntryType::Video,
        "ddb" => EntryType::DroneDB,
        _ => EntryType::Generic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_has_empty_hash_and_computed_depth() {
        let e = Entry::new_directory("a/b");
        assert_eq!(e.hash, "");
        assert_eq!(e.depth, 1);
        assert!(e.is_directory());
    }

    #[test]
    fn classify_recognizes_extensions() {
        assert_eq!(classify_by_extension(Path::new("x.md")), EntryType::Markdown);
        assert_eq!(classify_by_extension(Path::new("x.laz")), EntryType::PointCloud);
        assert_eq!(classify_by_extension(Path::new("x.unknownext")), EntryType::Generic);
    }

    #[test]
    fn polygon_bbox_and_wkt() {
        let poly = Polygon::closed_ring(vec![
            (9.0, 45.0, 0.0),
            (9.0, 46.0, 0.0),
            (10.0, 46.0, 0.0),
            (10.0, 45.0, 0.0),
            (9.0, 45.0, 0.0),
        ]);
        assert_eq!(poly.bbox(), Some((9.0, 45.0, 10.0, 46.0)));
        assert!(poly.to_wkt().starts_with("POLYGON Z"));
    }
}
