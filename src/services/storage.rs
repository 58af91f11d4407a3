use async_trait::async_trait;
use image::ImageFormat;
use reqwest::Client;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A generated image copied into durable storage.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    /// Stable, long-lived reference to the stored object.
    pub url: String,
    /// The downloaded bytes, reused as the next iteration's input.
    pub bytes: Vec<u8>,
}

/// Capability: copy a short-lived remote image into durable storage.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn persist(&self, source_url: &str) -> Option<StoredArtifact>;
}

/// Write side of an object store.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;
}

/// Client for S3-compatible object storage (GCS interoperability, R2, MinIO).
pub struct S3ObjectStore {
    bucket: Box<Bucket>,
}

impl S3ObjectStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectUploader for S3ObjectStore {
    async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        let response = self
            .bucket
            .put_object_with_content_type(key, data, content_type)
            .await?;
        let status = response.status_code();
        if !(200..300).contains(&status) {
            return Err(StorageError::UploadRejected(status));
        }
        Ok(())
    }
}

/// Fetch-then-upload artifact store.
///
/// Every artifact gets a fresh random key, so a failed fetch or upload never
/// touches objects written by earlier iterations.
pub struct DurableArtifactStore {
    http: Client,
    uploader: Arc<dyn ObjectUploader>,
    public_base_url: String,
    prefix: String,
}

impl DurableArtifactStore {
    pub fn new(
        uploader: Arc<dyn ObjectUploader>,
        public_base_url: impl Into<String>,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            uploader,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            prefix: prefix.into().trim_matches('/').to_string(),
        })
    }

    /// Download the bytes behind a generation-service URL.
    pub async fn fetch(&self, source_url: &str) -> Result<Vec<u8>, StorageError> {
        tracing::info!(url = %source_url, "Downloading generated image");
        let response = self.http.get(source_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::DownloadRejected(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn try_persist(&self, source_url: &str) -> Result<StoredArtifact, StorageError> {
        let bytes = self.fetch(source_url).await?;
        let format = image::guess_format(&bytes).map_err(|_| StorageError::NotAnImage)?;
        let key = self.object_key(format);

        self.uploader
            .upload(&key, &bytes, format.to_mime_type())
            .await?;

        let url = format!("{}/{}", self.public_base_url, key);
        tracing::info!(url = %url, size = bytes.len(), "Image uploaded to durable storage");
        Ok(StoredArtifact { url, bytes })
    }

    fn object_key(&self, format: ImageFormat) -> String {
        let ext = format.extensions_str().first().copied().unwrap_or("jpg");
        if self.prefix.is_empty() {
            format!("{}.{}", Uuid::new_v4().simple(), ext)
        } else {
            format!("{}/{}.{}", self.prefix, Uuid::new_v4().simple(), ext)
        }
    }
}

#[async_trait]
impl ArtifactStore for DurableArtifactStore {
    async fn persist(&self, source_url: &str) -> Option<StoredArtifact> {
        match self.try_persist(source_url).await {
            Ok(artifact) => Some(artifact),
            Err(e) => {
                tracing::error!(url = %source_url, error = %e, "Failed to persist generated image");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image download returned HTTP {0}")]
    DownloadRejected(u16),

    #[error("Object upload returned HTTP {0}")]
    UploadRejected(u16),

    #[error("Downloaded content is not a recognizable image")]
    NotAnImage,

    #[error("Storage configuration error: {0}")]
    Config(String),
}
