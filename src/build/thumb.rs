//! Thumbnail generation (§4.5 `generateThumb`), grounded on the original's
//! `ddb.cpp::generateThumb` dual entry point (write to a path, or into an
//! in-memory buffer).

use std::path::Path;

use image::imageops::FilterType;

use crate::entry::Entry;
use crate::error::{BuildError, Result};

use super::{Artifact, Builder};

/// Thumbnail rendering, behind a trait so GeoTIFFs (which need GDAL to
/// rasterize before thumbnailing) and plain images share one call shape;
/// `ImageCrateThumbBackend` handles ordinary image formats directly via the
/// `image` crate and returns `BuildDepMissing` for anything it can't decode.
pub trait ThumbBackend: Send + Sync {
    fn render(&self, input: &Path, max_size: u32) -> Result<image::DynamicImage>;
}

pub struct ImageCrateThumbBackend;

impl ThumbBackend for ImageCrateThumbBackend {
    fn render(&self, input: &Path, max_size: u32) -> Result<image::DynamicImage> {
        let img = image::open(input)
            .map_err(|e| BuildError::Gdal(format!("cannot decode {}: {e}", input.display())))?;
        Ok(img.resize(max_size, max_size, FilterType::Lanczos3))
    }
}

/// Default square thumbnail size, matching the `thumbs/<size>/` cache
/// layout (§6.1); builders write at this size unless the caller overrides.
pub const DEFAULT_THUMB_SIZE: u32 = 512;

pub struct ThumbBuilder<'a> {
    pub backend: &'a dyn ThumbBackend,
}

impl<'a> Builder for ThumbBuilder<'a> {
    fn build(&self, _entry: &Entry, source: &Path, out_dir: &Path) -> Result<Vec<Artifact>> {
        let thumb = self.backend.render(source, DEFAULT_THUMB_SIZE)?;
        let output = out_dir.join("thumb.jpg");
        thumb
            .to_rgb8()
            .save_with_format(&output, image::ImageFormat::Jpeg)
            .map_err(BuildError::Image)?;
        Ok(vec![Artifact { relative_path: "thumb.jpg".into(), kind: "thumb" }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_jpeg_thumbnail_from_source_image() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("in.png");
        let img = image::RgbImage::from_pixel(64, 48, image::Rgb([10, 20, 30]));
        img.save(&source).unwrap();

        let out = dir.path().join("build");
        std::fs::create_dir_all(&out).unwrap();
        let entry = Entry::new_directory("in.png".to_string());
        let artifacts = ThumbBuilder { backend: &ImageCrateThumbBackend }
            .build(&entry, &source, &out)
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(out.join("thumb.jpg").exists());
    }
}
