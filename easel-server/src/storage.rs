//! PNG persistence for generated images.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};
use uuid::Uuid;

/// Writes generated images under `<data_dir>/images` and produces the
/// `/file/...` URLs the static route serves them from.
pub struct ImageStore {
    images_dir: PathBuf,
}

impl ImageStore {
    pub fn new(images_dir: impl Into<PathBuf>) -> Result<Self> {
        let images_dir = images_dir.into();
        fs::create_dir_all(&images_dir)
            .with_context(|| format!("failed to create image dir {}", images_dir.display()))?;
        Ok(Self { images_dir })
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Short random id, e.g. `im_1f2e3d4c`.
    pub fn new_image_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("im_{}", &hex[..8])
    }

    pub fn save_png(&self, image_id: &str, image: &DynamicImage) -> Result<PathBuf> {
        let path = self.images_dir.join(format!("{image_id}.png"));
        image
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }

    pub fn url_for(&self, image_id: &str) -> String {
        format!("/file/{image_id}.png")
    }
}
