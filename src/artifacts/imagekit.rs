//! ImageKit media library client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{ArtifactError, ArtifactRecord, ArtifactStore, UploadError};
use crate::config::ImageKitConfig;

/// Remote store speaking the ImageKit upload and media APIs.
///
/// Requests authenticate with HTTP basic auth: the private key as user
/// name and an empty password.
pub struct ImageKitStore {
    client: Client,
    config: ImageKitConfig,
    private_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    file_id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteFile {
    file_id: String,
    name: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    url: Option<String>,
}

impl From<RemoteFile> for ArtifactRecord {
    fn from(file: RemoteFile) -> Self {
        Self {
            file_id: file.file_id,
            name: file.name,
            tags: file.tags.unwrap_or_default(),
            url: file.url.and_then(|u| Url::parse(&u).ok()),
        }
    }
}

impl ImageKitStore {
    pub fn new(config: ImageKitConfig, private_key: impl Into<String>) -> Result<Self, ArtifactError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            private_key: private_key.into(),
        })
    }

    /// Build a client whose key is read from the configured environment
    /// variable.
    pub fn from_env(config: ImageKitConfig) -> Result<Self, ArtifactError> {
        let key = std::env::var(&config.private_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ArtifactError::MissingCredentials(config.private_key_env.clone()))?;
        Self::new(config, key)
    }

    fn api_endpoint(&self, path: &str) -> Result<Url, ArtifactError> {
        self.config
            .api_url
            .join(path)
            .map_err(|e| ArtifactError::InvalidResponse(format!("bad API URL: {}", e)))
    }

    async fn check_status(response: Response) -> Result<Response, ArtifactError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("Unknown").to_string()
        } else {
            body
        };
        Err(ArtifactError::HttpStatus {
            status: status.as_u16(),
            message,
        })
    }

    async fn send_upload(&self, bytes: Vec<u8>, name: &str, tag: &str) -> Result<Url, ArtifactError> {
        let size = bytes.len();
        let file = Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("image/jpeg")?;

        let mut form = Form::new()
            .part("file", file)
            .text("fileName", name.to_string())
            .text("tags", tag.to_string())
            .text("useUniqueFileName", "true");
        if let Some(ref folder) = self.config.folder {
            form = form.text("folder", folder.clone());
        }

        let response = self
            .client
            .post(self.config.upload_url.clone())
            .basic_auth(&self.private_key, Some(""))
            .multipart(form)
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let body: UploadResponse = response.json().await?;
        let url = Url::parse(&body.url)
            .map_err(|e| ArtifactError::InvalidResponse(format!("upload URL {}: {}", body.url, e)))?;

        debug!(file_id = %body.file_id, name, size, "Uploaded artifact");
        Ok(url)
    }
}

#[async_trait]
impl ArtifactStore for ImageKitStore {
    fn name(&self) -> &'static str {
        "imagekit"
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str, tag: &str) -> Result<Url, UploadError> {
        self.send_upload(bytes, name, tag)
            .await
            .map_err(|e| UploadError::new(name, e))
    }

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<ArtifactRecord>, ArtifactError> {
        let response = self
            .client
            .get(self.api_endpoint("v1/files")?)
            .basic_auth(&self.private_key, Some(""))
            .query(&[("tags", tag)])
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let files: Vec<RemoteFile> = response.json().await?;
        let records: Vec<ArtifactRecord> = files
            .into_iter()
            .map(ArtifactRecord::from)
            .filter(|r| r.has_tag(tag))
            .collect();

        info!(tag, count = records.len(), "Listed remote artifacts");
        Ok(records)
    }

    async fn delete(&self, file_id: &str) -> Result<(), ArtifactError> {
        let response = self
            .client
            .delete(self.api_endpoint(&format!("v1/files/{}", file_id))?)
            .basic_auth(&self.private_key, Some(""))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ArtifactError::NotFound(file_id.to_string()));
        }
        Self::check_status(response).await?;

        debug!(file_id, "Deleted remote artifact");
        Ok(())
    }
}
