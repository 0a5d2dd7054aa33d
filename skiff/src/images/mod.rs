//! Image resolution.
//!
//! An image is an opaque, id-bearing handle on a root filesystem directory.
//! The engine never looks inside it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use skiff_shared::errors::{SkiffError, SkiffResult};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// `sha256:<hex>` of the canonical rootfs path.
    pub id: String,
    /// Reference the image was resolved from.
    pub name: String,
    pub rootfs: PathBuf,
}

impl Image {
    pub fn new(name: impl Into<String>, rootfs: PathBuf) -> Self {
        let digest = Sha256::digest(rootfs.to_string_lossy().as_bytes());
        Self {
            id: format!("sha256:{}", hex::encode(digest)),
            name: name.into(),
            rootfs,
        }
    }

    /// First 12 hex chars of the digest.
    pub fn short_id(&self) -> &str {
        let hex = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        &hex[..hex.len().min(12)]
    }
}

/// Resolves image references to usable root filesystems.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn resolve(&self, reference: &str) -> SkiffResult<Image>;
}

/// Images are directories: `<images_dir>/<name>`, or an absolute path.
pub struct LocalImageStore {
    images_dir: PathBuf,
}

impl LocalImageStore {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
        }
    }

    fn locate(&self, reference: &str) -> SkiffResult<PathBuf> {
        let path = Path::new(reference);
        if path.is_absolute() {
            return Ok(path.to_path_buf());
        }
        let plain = !reference.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
            && path.components().count() == 1;
        if !plain {
            return Err(SkiffError::Image(format!(
                "invalid image reference '{reference}'"
            )));
        }
        Ok(self.images_dir.join(reference))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn resolve(&self, reference: &str) -> SkiffResult<Image> {
        let path = self.locate(reference)?;
        let rootfs = tokio::fs::canonicalize(&path)
            .await
            .map_err(|_| SkiffError::Image(format!("image '{reference}' not found")))?;
        let metadata = tokio::fs::metadata(&rootfs).await?;
        if !metadata.is_dir() {
            return Err(SkiffError::Image(format!(
                "image '{reference}' is not a directory"
            )));
        }
        tracing::debug!(image = reference, rootfs = %rootfs.display(), "Resolved image");
        Ok(Image::new(reference, rootfs))
    }
}
