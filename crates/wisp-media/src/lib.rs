use anyhow::{Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info};

/// On-disk image storage for message attachments and avatars.
///
/// Accepts base64 data URIs from clients, content-addresses the decoded bytes
/// by SHA-256 and returns a URL under `public_base`. Re-uploading identical
/// bytes maps to the same file.
pub struct ImageStore {
    dir: PathBuf,
    public_base: String,
}

impl ImageStore {
    pub async fn new(dir: PathBuf, public_base: String) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Image storage directory: {}", dir.display());
        Ok(Self {
            dir,
            public_base: public_base.trim_end_matches('/').to_string(),
        })
    }

    /// Decode `data:image/<fmt>;base64,<payload>` and persist it.
    /// Returns the serving URL for the stored image.
    pub async fn store_data_uri(&self, data_uri: &str) -> Result<String> {
        let (ext, payload) = split_data_uri(data_uri)?;
        let bytes = B64.decode(payload)?;
        if bytes.is_empty() {
            bail!("Empty image payload");
        }

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let name = format!("{}.{}", hex::encode(hasher.finalize()), ext);

        let path = self.dir.join(&name);
        if fs::try_exists(&path).await? {
            debug!("Image {} already stored", name);
        } else {
            fs::write(&path, &bytes).await?;
            info!("Stored image {} ({} bytes)", name, bytes.len());
        }

        Ok(format!("{}/{}", self.public_base, name))
    }

    /// Filesystem path for a stored image name, for the static serving route.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

/// Split a data URI into (extension, base64 payload).
fn split_data_uri(data_uri: &str) -> Result<(&str, &str)> {
    let rest = data_uri
        .strip_prefix("data:image/")
        .ok_or_else(|| anyhow::anyhow!("Not an image data URI"))?;
    let (fmt, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| anyhow::anyhow!("Missing base64 payload"))?;
    let ext = match fmt {
        "jpeg" => "jpg",
        "png" | "gif" | "webp" | "jpg" => fmt,
        other => bail!("Unsupported image format: {}", other),
    };
    Ok((ext, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store_dir() -> PathBuf {
        std::env::temp_dir().join(format!("wisp-media-test-{}", Uuid::new_v4()))
    }

    const PNG_URI: &str = "data:image/png;base64,aGVsbG8gd2lzcA==";

    #[tokio::test]
    async fn stores_and_content_addresses() {
        let dir = temp_store_dir();
        let store = ImageStore::new(dir.clone(), "http://localhost:3000/media/".into())
            .await
            .unwrap();

        let url = store.store_data_uri(PNG_URI).await.unwrap();
        assert!(url.starts_with("http://localhost:3000/media/"));
        assert!(url.ends_with(".png"));

        // same bytes, same URL, still one file on disk
        let again = store.store_data_uri(PNG_URI).await.unwrap();
        assert_eq!(url, again);

        let name = url.rsplit('/').next().unwrap();
        let on_disk = tokio::fs::read(store.file_path(name)).await.unwrap();
        assert_eq!(on_disk, b"hello wisp");

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_non_image_payloads() {
        let dir = temp_store_dir();
        let store = ImageStore::new(dir.clone(), "http://localhost".into())
            .await
            .unwrap();

        assert!(store.store_data_uri("data:text/plain;base64,aGk=").await.is_err());
        assert!(store.store_data_uri("data:image/png;base64,").await.is_err());
        assert!(store.store_data_uri("not a data uri").await.is_err());

        tokio::fs::remove_dir_all(dir).await.unwrap();
    }
}
