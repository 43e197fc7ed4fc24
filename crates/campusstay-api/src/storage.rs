use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Maximum number of images a listing may carry.
pub const MAX_IMAGES_PER_LISTING: usize = 5;

/// 5 MiB per uploaded image.
pub const MAX_IMAGE_SIZE: usize = 5 * 1024 * 1024;

/// Manages on-disk storage for listing images.
///
/// Each image is stored as a flat file at `{dir}/images-{uuid}.{ext}` and the
/// generated name is what listing rows reference. The directory is served
/// statically by the server under `/uploads`.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Map an uploaded part to a canonical extension, or reject it.
    /// Only JPEG and PNG images are accepted, judged by both the client file
    /// name and the declared content type when present.
    pub fn allowed_extension(file_name: Option<&str>, content_type: Option<&str>) -> Option<&'static str> {
        let ext = match file_name?.rsplit_once('.')?.1.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => "jpg",
            "png" => "png",
            _ => return None,
        };
        match content_type {
            Some("image/jpeg") if ext == "jpg" => Some(ext),
            Some("image/png") if ext == "png" => Some(ext),
            Some(_) => None,
            None => Some(ext),
        }
    }

    /// Write image bytes under a generated name and return the name.
    pub async fn save(&self, extension: &str, data: &[u8]) -> Result<String> {
        let name = format!("images-{}.{}", Uuid::new_v4(), extension);
        let path = self.dir.join(&name);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        Ok(name)
    }

    /// Delete a stored image. Names with path separators are rejected since
    /// every stored name is generated flat.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if name.contains('/') || name.contains('\\') {
            anyhow::bail!("Invalid image name: {}", name);
        }
        let path = self.dir.join(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Image {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filtering() {
        assert_eq!(ImageStore::allowed_extension(Some("room.jpg"), None), Some("jpg"));
        assert_eq!(ImageStore::allowed_extension(Some("room.JPEG"), None), Some("jpg"));
        assert_eq!(ImageStore::allowed_extension(Some("room.png"), Some("image/png")), Some("png"));
        assert_eq!(ImageStore::allowed_extension(Some("room.gif"), None), None);
        assert_eq!(ImageStore::allowed_extension(Some("room.png"), Some("image/jpeg")), None);
        assert_eq!(ImageStore::allowed_extension(Some("noextension"), None), None);
        assert_eq!(ImageStore::allowed_extension(None, Some("image/png")), None);
    }

    #[tokio::test]
    async fn save_and_delete_round_trip() {
        let dir = std::env::temp_dir().join(format!("campusstay-test-{}", Uuid::new_v4()));
        let store = ImageStore::new(dir.clone()).await.unwrap();

        let name = store.save("jpg", b"not a real jpeg").await.unwrap();
        assert!(name.starts_with("images-") && name.ends_with(".jpg"));
        assert!(dir.join(&name).exists());

        store.delete(&name).await.unwrap();
        assert!(!dir.join(&name).exists());
        // deleting twice is fine
        store.delete(&name).await.unwrap();

        assert!(store.delete("../escape.jpg").await.is_err());

        fs::remove_dir_all(&dir).await.unwrap();
    }
}
