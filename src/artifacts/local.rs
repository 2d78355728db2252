//! Filesystem artifact store.
//!
//! Files live in one directory next to a JSONL manifest recording each
//! file's id, name and tags.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use super::{ArtifactError, ArtifactRecord, ArtifactStore, UploadError};
use crate::models::ArtifactId;
use crate::storage::{JsonlReader, JsonlWriter};

const MANIFEST: &str = "manifest.jsonl";

pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: Option<Url>,
    manifest_lock: Mutex<()>,
}

impl LocalArtifactStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// References are `public_base_url` joined with the stored file name
    /// when given, otherwise `file://` URLs.
    pub fn open(root: impl AsRef<Path>, public_base_url: Option<Url>) -> Result<Self, ArtifactError> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self {
            root,
            public_base_url: public_base_url.map(as_directory),
            manifest_lock: Mutex::new(()),
        })
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST)
    }

    fn reference_for(&self, stored_name: &str) -> Result<Url, ArtifactError> {
        match &self.public_base_url {
            Some(base) => base
                .join(stored_name)
                .map_err(|e| ArtifactError::InvalidResponse(e.to_string())),
            None => Url::from_file_path(self.root.join(stored_name)).map_err(|_| {
                ArtifactError::InvalidResponse(format!("cannot express {} as a URL", stored_name))
            }),
        }
    }

    async fn store_file(&self, bytes: Vec<u8>, name: &str, tag: &str) -> Result<Url, ArtifactError> {
        let file_id = ArtifactId::generate(&[tag.as_bytes(), name.as_bytes(), &bytes]);
        let stored_name = format!("{}_{}", file_id, name);
        let url = self.reference_for(&stored_name)?;

        tokio::fs::write(self.root.join(&stored_name), &bytes).await?;

        let record = ArtifactRecord {
            file_id: file_id.to_string(),
            name: stored_name,
            tags: vec![tag.to_string()],
            url: Some(url.clone()),
        };

        let _guard = self.manifest_lock.lock().await;
        let reader: JsonlReader<ArtifactRecord> = JsonlReader::new(self.manifest_path());
        let mut records = reader.read_all()?;
        records.retain(|r| r.file_id != record.file_id);
        records.push(record);
        JsonlWriter::new(self.manifest_path()).write_all(&records)?;

        debug!(file_id = %file_id, bytes = bytes.len(), "Stored artifact");
        Ok(url)
    }
}

/// Ensure the path ends in `/` so `join` appends instead of replacing the last segment.
fn as_directory(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str, tag: &str) -> Result<Url, UploadError> {
        self.store_file(bytes, name, tag)
            .await
            .map_err(|e| UploadError::new(name, e))
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        let _guard = self.manifest_lock.lock().await;
        let reader: JsonlReader<ArtifactRecord> = JsonlReader::new(self.manifest_path());
        Ok(reader.read_where(|r| r.has_tag(tag))?)
    }

    async fn delete(&self, file_id: &str) -> Result<(), ArtifactError> {
        let _guard = self.manifest_lock.lock().await;
        let reader: JsonlReader<ArtifactRecord> = JsonlReader::new(self.manifest_path());
        let mut records = reader.read_all()?;

        let Some(position) = records.iter().position(|r| r.file_id == file_id) else {
            return Err(ArtifactError::NotFound(file_id.to_string()));
        };
        let record = records.remove(position);

        match tokio::fs::remove_file(self.root.join(&record.name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        JsonlWriter::new(self.manifest_path()).write_all(&records)?;
        debug!(file_id, "Deleted artifact");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upload_writes_file_and_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::open(temp_dir.path().join("shots"), None).unwrap();

        let url = store.upload(b"jpeg".to_vec(), "Title_0.jpg", "t").await.unwrap();

        assert_eq!(url.scheme(), "file");
        let path = url.to_file_path().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg");
        assert!(path.file_name().unwrap().to_string_lossy().ends_with("_Title_0.jpg"));

        let listed = store.list_by_tag("t").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].url.as_ref(), Some(&url));
    }

    #[tokio::test]
    async fn test_public_base_url() {
        let temp_dir = TempDir::new().unwrap();
        let base = Url::parse("https://cdn.example/shots/").unwrap();
        let store = LocalArtifactStore::open(temp_dir.path(), Some(base)).unwrap();

        let url = store.upload(b"x".to_vec(), "a.jpg", "t").await.unwrap();

        assert!(url.as_str().starts_with("https://cdn.example/shots/"));
        assert!(url.as_str().ends_with("_a.jpg"));
    }

    #[tokio::test]
    async fn test_public_base_url_without_trailing_slash() {
        let temp_dir = TempDir::new().unwrap();
        let base = Url::parse("https://cdn.example/media/shots?v=1").unwrap();
        let store = LocalArtifactStore::open(temp_dir.path(), Some(base)).unwrap();

        let url = store.upload(b"x".to_vec(), "a.jpg", "t").await.unwrap();

        assert!(url.as_str().starts_with("https://cdn.example/media/shots/"));
        assert!(url.path().ends_with("_a.jpg"));
        assert_eq!(url.query(), None);
    }

    #[tokio::test]
    async fn test_same_content_upload_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::open(temp_dir.path(), None).unwrap();

        let first = store.upload(b"same".to_vec(), "a.jpg", "t").await.unwrap();
        let second = store.upload(b"same".to_vec(), "a.jpg", "t").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_by_tag("t").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::open(temp_dir.path(), None).unwrap();

        let url = store.upload(b"x".to_vec(), "a.jpg", "t").await.unwrap();
        let record = store.list_by_tag("t").await.unwrap().remove(0);

        store.delete(&record.file_id).await.unwrap();

        assert!(!url.to_file_path().unwrap().exists());
        assert!(store.list_by_tag("t").await.unwrap().is_empty());
        assert!(matches!(
            store.delete(&record.file_id).await,
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_uploads_all_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalArtifactStore::open(temp_dir.path(), None).unwrap();

        let uploads = (0..8).map(|i| {
            let store = &store;
            async move {
                store
                    .upload(vec![i as u8], &format!("shot_{}.jpg", i), "t")
                    .await
            }
        });
        let results = futures::future::join_all(uploads).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(store.list_by_tag("t").await.unwrap().len(), 8);
    }
}
