//! Configuration loading and validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::storage::{ReplaceStrategy, StorageConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Aggregator page harvesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// Page listing articles grouped by source
    #[serde(default = "default_target_url")]
    pub target_url: Url,

    /// User agent presented by the browsing context
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Hard limit for the listing page to load
    #[serde(default = "default_page_timeout")]
    pub navigation_timeout_seconds: u64,

    /// How long to wait for the article list container
    #[serde(default = "default_container_timeout")]
    pub container_timeout_seconds: u64,

    /// Selector that must match once the listing has rendered
    #[serde(default = "default_container_selector")]
    pub container_selector: String,

    /// Run the browser without a window
    #[serde(default = "default_true")]
    pub headless: bool,

    /// Explicit Chrome/Chromium binary; autodetected when unset
    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,
}

fn default_target_url() -> Url {
    Url::parse("https://brutalist.report/topic/tech?limit=100").expect("static URL parses")
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string()
}

fn default_page_timeout() -> u64 {
    60
}

fn default_container_timeout() -> u64 {
    30
}

fn default_container_selector() -> String {
    "div.brutal-grid > div > ul".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            user_agent: default_user_agent(),
            navigation_timeout_seconds: default_page_timeout(),
            container_timeout_seconds: default_container_timeout(),
            container_selector: default_container_selector(),
            headless: true,
            chrome_executable: None,
        }
    }
}

impl HarvesterConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }

    pub fn container_timeout(&self) -> Duration {
        Duration::from_secs(self.container_timeout_seconds)
    }
}

/// Screenshot enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Sources whose articles get screenshots
    #[serde(default = "default_target_sources")]
    pub target_sources: Vec<String>,

    /// Articles processed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-article navigation timeout
    #[serde(default = "default_item_timeout")]
    pub navigation_timeout_seconds: u64,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_target_sources() -> Vec<String> {
    vec!["Hacker News".to_string()]
}

fn default_batch_size() -> usize {
    10
}

fn default_item_timeout() -> u64 {
    10
}

fn default_viewport_width() -> u32 {
    800
}

fn default_viewport_height() -> u32 {
    600
}

fn default_jpeg_quality() -> u8 {
    70
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            target_sources: default_target_sources(),
            batch_size: default_batch_size(),
            navigation_timeout_seconds: default_item_timeout(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl EnrichmentConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_seconds)
    }
}

/// Which artifact store receives screenshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactBackendKind {
    #[default]
    Local,
    ImageKit,
}

/// ImageKit-compatible remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageKitConfig {
    #[serde(default = "default_upload_url")]
    pub upload_url: Url,

    #[serde(default = "default_api_url")]
    pub api_url: Url,

    /// Environment variable holding the private API key
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,

    /// Remote folder for uploads
    #[serde(default)]
    pub folder: Option<String>,

    #[serde(default = "default_http_timeout")]
    pub timeout_seconds: u64,
}

fn default_upload_url() -> Url {
    Url::parse("https://upload.imagekit.io/api/v1/files/upload").expect("static URL parses")
}

fn default_api_url() -> Url {
    Url::parse("https://api.imagekit.io").expect("static URL parses")
}

fn default_private_key_env() -> String {
    "IMAGEKIT_PRIVATE_KEY".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

impl Default for ImageKitConfig {
    fn default() -> Self {
        Self {
            upload_url: default_upload_url(),
            api_url: default_api_url(),
            private_key_env: default_private_key_env(),
            folder: None,
            timeout_seconds: default_http_timeout(),
        }
    }
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(default)]
    pub backend: ArtifactBackendKind,

    /// Tag applied to every screenshot of a run
    #[serde(default = "default_tag")]
    pub tag: String,

    /// Directory for the local backend (defaults under the data dir)
    #[serde(default)]
    pub local_dir: Option<PathBuf>,

    /// Public URL prefix for locally stored files
    #[serde(default)]
    pub public_base_url: Option<Url>,

    #[serde(default)]
    pub imagekit: ImageKitConfig,
}

fn default_tag() -> String {
    "brutalist-screenshots".to_string()
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            backend: ArtifactBackendKind::default(),
            tag: default_tag(),
            local_dir: None,
            public_base_url: None,
            imagekit: ImageKitConfig::default(),
        }
    }
}

/// Persistent article store.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Collection file (defaults under the data dir)
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub strategy: ReplaceStrategy,
}

/// Last-known-good snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub harvester: HarvesterConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub artifacts: ArtifactsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            harvester: HarvesterConfig::default(),
            enrichment: EnrichmentConfig::default(),
            artifacts: ArtifactsConfig::default(),
            store: StoreConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.harvester.navigation_timeout_seconds == 0
            || self.harvester.container_timeout_seconds == 0
            || self.enrichment.navigation_timeout_seconds == 0
        {
            return Err(ConfigError::ValidationError(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        if self.enrichment.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "Enrichment batch size must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.enrichment.jpeg_quality) {
            return Err(ConfigError::ValidationError(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.enrichment.jpeg_quality
            )));
        }

        if self.enrichment.viewport_width == 0 || self.enrichment.viewport_height == 0 {
            return Err(ConfigError::ValidationError(
                "Viewport dimensions must be greater than 0".to_string(),
            ));
        }

        if self.artifacts.tag.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Artifact tag must not be empty".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "Server port must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig::new(self.data_dir.clone())
    }

    /// Collection file for the article store.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| self.storage().articles_path())
    }

    /// Location of the last-known-good snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.cache
            .snapshot_path
            .clone()
            .unwrap_or_else(|| self.storage().snapshot_path())
    }

    /// Directory for locally stored screenshots.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.artifacts
            .local_dir
            .clone()
            .unwrap_or_else(|| self.storage().artifacts_dir())
    }
}
