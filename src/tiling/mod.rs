//! Tiling cache (C8): serves one tile of a raster or point cloud at
//! `(z, x, y)`, building on demand and caching per content hash (§4.4).

pub mod ept;
pub mod georaster;

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

use crate::error::Result;
use crate::hashing::{tile_cache_key, url_cache_key};
use crate::pathutils::ScopedLock;
use crate::profile::UserProfile;

/// Half the circumference of the Web Mercator (EPSG:3857) world square, in
/// meters — the projection's extent is `[-ORIGIN, ORIGIN]` on both axes.
const WEB_MERCATOR_ORIGIN: f64 = 20_037_508.342_789_244;

/// Web Mercator bounding box, meters, shared by the georaster and EPT
/// tiling pipelines (§4.4.2 step 2, §4.4.3 step 1).
#[derive(Debug, Clone, Copy)]
pub struct MercatorBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl MercatorBounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }
}

/// A single tile coordinate, Web Mercator convention (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// XYZ tile (z, x, y) → EPSG:3857 bounding box (§4.4.2 step 2): the
    /// world square is `2^z` tiles wide; `y` grows downward (XYZ, not TMS),
    /// so tile 0,0 at any zoom is the northwest corner.
    pub fn mercator_bounds(&self, tile_size: u32) -> MercatorBounds {
        let _ = tile_size; // tile pixel size doesn't affect the world-space bounds
        let n = 2f64.powi(self.z as i32);
        let tile_world_size = 2.0 * WEB_MERCATOR_ORIGIN / n;
        let min_x = self.x as f64 * tile_world_size - WEB_MERCATOR_ORIGIN;
        let max_x = min_x + tile_world_size;
        let max_y = WEB_MERCATOR_ORIGIN - self.y as f64 * tile_world_size;
        let min_y = max_y - tile_world_size;
        MercatorBounds { min_x, min_y, max_x, max_y }
    }

    /// Same tile addressed in TMS convention (`y` flipped), used when a
    /// source speaks TMS rather than XYZ (§6.2 CLI surface lists both).
    pub fn to_tms(&self) -> TileKey {
        let n = 1u32 << self.z;
        TileKey { z: self.z, x: self.x, y: n.saturating_sub(1).saturating_sub(self.y) }
    }
}

/// Renders the raster content of one tile to PNG bytes. Implementations
/// that link a raster library supply real warping/resampling; the crate
/// ships only `PlaceholderRasterTiler`, mirroring how `EntryExtractor`
/// stands in for GDAL/EXIF classification (§1: "we specify what must be
/// extracted, not how").
pub trait RasterTiler: Send + Sync {
    fn render_tile(&self, source: &Path, key: TileKey, tile_size: u32) -> Result<Vec<u8>>;

    /// True when `source` already carries a usable projection and can be
    /// tiled directly; false routes through the geoprojection step first
    /// (§4.4.2 step 1).
    fn is_georeferenced(&self, _source: &Path) -> bool {
        false
    }
}

/// Default tiler used when no raster backend is linked: emits a flat PNG of
/// the requested size so the cache/locking/addressing machinery around it is
/// still exercisable end to end.
pub struct PlaceholderRasterTiler;

impl RasterTiler for PlaceholderRasterTiler {
    fn render_tile(&self, _source: &Path, _key: TileKey, tile_size: u32) -> Result<Vec<u8>> {
        let img = image::RgbaImage::from_pixel(tile_size, tile_size, image::Rgba([0, 0, 0, 0]));
        let mut bytes = Vec::new();
        let mut cursor = std::io::Cursor::new(&mut bytes);
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .map_err(crate::error::BuildError::Image)?;
        Ok(bytes)
    }
}

/// Cache directories older than this are swept by `sweep_stale` (§4.4.1).
pub const STALE_AFTER: Duration = Duration::from_secs(5 * 24 * 60 * 60);

pub struct TileCache<'a> {
    profile: &'a UserProfile,
    tiler: &'a dyn RasterTiler,
}

impl<'a> TileCache<'a> {
    pub fn new(profile: &'a UserProfile, tiler: &'a dyn RasterTiler) -> TileCache<'a> {
        TileCache { profile, tiler }
    }

    /// `<user-tiles-dir>/<CRC64(source_path*mtime*tile_size)>` (§4.4.1).
    fn cache_dir(&self, source: &Path, mtime: i64, tile_size: u32) -> PathBuf {
        let key = tile_cache_key(&source.to_string_lossy(), mtime, tile_size);
        self.profile.tiles_dir(&key)
    }

    fn tile_path(cache_dir: &Path, key: TileKey) -> PathBuf {
        cache_dir
            .join(key.z.to_string())
            .join(key.x.to_string())
            .join(format!("{}.png", key.y))
    }

    /// `tile(z, x, y)` (§4.4.4): returns the cached path if present, else
    /// builds under a scoped single-flight lock and writes it.
    pub async fn get_tile(
        &self,
        source: &Path,
        tile_size: u32,
        key: TileKey,
        force_recreate: bool,
    ) -> Result<PathBuf> {
        let mtime = crate::pathutils::mtime_of(source)?;
        let cache_dir = self.cache_dir(source, mtime, tile_size);
        let dest = Self::tile_path(&cache_dir, key);

        if dest.exists() && !force_recreate {
            return Ok(dest);
        }

        let lock = ScopedLock::try_acquire(&dest, Duration::from_secs(60))?;
        if dest.exists() && !force_recreate {
            return Ok(dest);
        }

        let bytes = if self.tiler.is_georeferenced(source) {
            self.tiler.render_tile(source, key, tile_size)?
        } else {
            let geoprojected = georaster::ensure_geoprojected(self.tiler, &cache_dir, source)?;
            self.tiler.render_tile(&geoprojected, key, tile_size)?
        };

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &bytes)?;
        drop(lock);
        debug!(path = %dest.display(), "tile built");
        Ok(dest)
    }

    /// `tile(z, x, y)` for a point-cloud source (§4.4.3): restricts the EPT
    /// read to the tile's mercator bounds and rasterizes, reusing the same
    /// cache layout and single-flight lock as the raster path.
    pub async fn get_point_cloud_tile(
        &self,
        source: &Path,
        reader: &dyn ept::EptReader,
        tile_size: u32,
        key: TileKey,
        force_recreate: bool,
    ) -> Result<PathBuf> {
        let mtime = crate::pathutils::mtime_of(source)?;
        let cache_dir = self.cache_dir(source, mtime, tile_size);
        let dest = Self::tile_path(&cache_dir, key);

        if dest.exists() && !force_recreate {
            return Ok(dest);
        }

        let lock = ScopedLock::try_acquire(&dest, Duration::from_secs(60))?;
        if dest.exists() && !force_recreate {
            return Ok(dest);
        }

        let bounds = key.mercator_bounds(tile_size);
        let resolution_hint = bounds.width() / tile_size as f64;
        let bytes = ept::build_tile(reader, source, bounds, tile_size, resolution_hint)?;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&dest, &bytes)?;
        drop(lock);
        debug!(path = %dest.display(), "point cloud tile built");
        Ok(dest)
    }

    /// Removes cache directories under the user profile whose directory
    /// mtime is older than `STALE_AFTER` (§4.4.1 rationale).
    pub fn sweep_stale(&self) -> Result<u64> {
        let tiles_root = self.profile.root().join("tiles");
        if !tiles_root.exists() {
            return Ok(0);
        }
        let mut removed = 0u64;
        let now = SystemTime::now();
        for entry in std::fs::read_dir(&tiles_root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_dir() {
                continue;
            }
            let age = now.duration_since(meta.modified()?).unwrap_or_default();
            if age > STALE_AFTER {
                std::fs::remove_dir_all(entry.path())?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "swept stale tile cache directories");
        }
        Ok(removed)
    }
}

/// Downloads a remote raster/point-cloud source into the user tile cache,
/// single-flighted by a scoped lock (§4.4.5). `known_hash` takes precedence
/// over the URL-derived cache key, letting a caller who already knows the
/// content fingerprint skip the download entirely when the file exists.
pub async fn fetch_remote_source(
    profile: &UserProfile,
    url: &str,
    ext: &str,
    known_hash: Option<&str>,
) -> Result<PathBuf> {
    let cache_key = known_hash.map(str::to_string).unwrap_or_else(|| url_cache_key(url));
    let dest = profile.remote_download_path(&cache_key, ext);

    if dest.exists() {
        return Ok(dest);
    }
    let lock = ScopedLock::try_acquire(&dest, Duration::from_secs(600))?;
    if dest.exists() {
        return Ok(dest);
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let response = reqwest::get(url).await.map_err(crate::error::RegistryError::Network)?;
    let bytes = response.bytes().await.map_err(crate::error::RegistryError::Network)?;
    std::fs::write(&dest, &bytes)?;
    drop(lock);
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_path_nests_by_zxy() {
        let cache_dir = PathBuf::from("/cache/abc123");
        let key = TileKey { z: 14, x: 8603, y: 5946 };
        let p = TileCache::tile_path(&cache_dir, key);
        assert_eq!(p, PathBuf::from("/cache/abc123/14/8603/5946.png"));
    }

    #[test]
    fn zoom_0_tile_covers_whole_world() {
        let bounds = TileKey { z: 0, x: 0, y: 0 }.mercator_bounds(256);
        assert!((bounds.min_x + WEB_MERCATOR_ORIGIN).abs() < 1e-6);
        assert!((bounds.max_x - WEB_MERCATOR_ORIGIN).abs() < 1e-6);
        assert!((bounds.min_y + WEB_MERCATOR_ORIGIN).abs() < 1e-6);
        assert!((bounds.max_y - WEB_MERCATOR_ORIGIN).abs() < 1e-6);
    }

    #[test]
    fn xyz_tile_0_0_at_any_zoom_is_northwest_quadrant() {
        let bounds = TileKey { z: 4, x: 0, y: 0 }.mercator_bounds(256);
        assert!(bounds.min_x < 0.0 && bounds.max_y > 0.0);
    }

    #[test]
    fn to_tms_flips_y_about_the_zoom_height() {
        let xyz = TileKey { z: 3, x: 2, y: 1 };
        assert_eq!(xyz.to_tms(), TileKey { z: 3, x: 2, y: 6 });
    }

    #[test]
    fn placeholder_tiler_emits_requested_size() {
        let tiler = PlaceholderRasterTiler;
        let bytes = tiler
            .render_tile(Path::new("x.tif"), TileKey { z: 0, x: 0, y: 0 }, 256)
            .unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!(img.width(), 256);
        assert_eq!(img.height(), 256);
    }
}
