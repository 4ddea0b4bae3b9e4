//! EPT (Entwine Point Tile) tiling pipeline (§4.4.3): rasterize a tile's
//! worth of a point cloud into a 256×256 RGB buffer.

use std::path::Path;

use crate::error::Result;

pub use super::MercatorBounds;

/// A single point already reprojected into EPSG:3857, with its RGB color.
#[derive(Debug, Clone, Copy)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
    pub rgb: [u8; 3],
}

/// Reads points from an `ept.json` point-cloud source, restricted to a
/// query bound and resolution hint (§4.4.3 step 1). The crate ships no real
/// EPT reader (no PDAL/Untwine binding is part of the dependency stack,
/// §1); `EmptyEptReader` is the default, returning no points so the
/// rasterizer still produces a valid (blank) tile.
pub trait EptReader: Send + Sync {
    fn read(&self, source: &Path, bounds: MercatorBounds, resolution_hint: f64) -> Result<Vec<ProjectedPoint>>;
}

pub struct EmptyEptReader;
impl EptReader for EmptyEptReader {
    fn read(&self, _source: &Path, _bounds: MercatorBounds, _resolution_hint: f64) -> Result<Vec<ProjectedPoint>> {
        Ok(Vec::new())
    }
}

/// Rasterizes points into a `size × size` RGB buffer (§4.4.3 steps 3-4):
/// `(x - bounds.min_x) / scale` rounds to a pixel column, the row is
/// flipped since raster row 0 is the top; points outside the tile are
/// skipped.
pub fn rasterize(points: &[ProjectedPoint], bounds: MercatorBounds, size: u32) -> image::RgbImage {
    let mut img = image::RgbImage::from_pixel(size, size, image::Rgb([255, 255, 255]));
    let scale = bounds.width() / size as f64;
    if scale <= 0.0 {
        return img;
    }
    for p in points {
        let px = ((p.x - bounds.min_x) / scale).round();
        let py = ((bounds.max_y - p.y) / scale).round();
        if px < 0.0 || py < 0.0 || px >= size as f64 || py >= size as f64 {
            continue;
        }
        img.put_pixel(px as u32, py as u32, image::Rgb(p.rgb));
    }
    img
}

/// Encodes a rasterized tile as PNG bytes, as the caller's generic `tile()`
/// surface expects regardless of source type (§4.4.2 step 3, §4.4.3 step 5).
pub fn encode_png(img: &image::RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    img.write_to(&mut cursor, image::ImageFormat::Png)
        .map_err(crate::error::BuildError::Image)?;
    Ok(bytes)
}

/// Builds one EPT tile end to end: read points restricted to the tile's
/// mercator bounds, rasterize, encode.
pub fn build_tile(
    reader: &dyn EptReader,
    source: &Path,
    bounds: MercatorBounds,
    size: u32,
    resolution_hint: f64,
) -> Result<Vec<u8>> {
    let points = reader.read(source, bounds, resolution_hint)?;
    let img = rasterize(&points, bounds, size);
    encode_png(&img)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rasterize_skips_out_of_bounds_points() {
        let bounds = MercatorBounds { min_x: 0.0, min_y: 0.0, max_x: 256.0, max_y: 256.0 };
        let points = vec![
            ProjectedPoint { x: 10.0, y: 10.0, rgb: [255, 0, 0] },
            ProjectedPoint { x: 1000.0, y: 1000.0, rgb: [0, 255, 0] },
        ];
        let img = rasterize(&points, bounds, 256);
        assert_eq!(img.width(), 256);
        // the in-bounds point should be colored; far corner stays background.
        assert_ne!(*img.get_pixel(10, 246), image::Rgb([255, 255, 255]));
    }

    #[test]
    fn empty_reader_yields_blank_png() {
        let reader = EmptyEptReader;
        let bytes = build_tile(
            &reader,
            Path::new("ept.json"),
            MercatorBounds { min_x: 0.0, min_y: 0.0, max_x: 100.0, max_y: 100.0 },
            64,
            1.0,
        )
        .unwrap();
        assert!(!bytes.is_empty());
    }
}
