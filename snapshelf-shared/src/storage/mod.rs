/// Object storage for scraped images
///
/// Wraps an `object_store` backend. Production uses the S3 API of Cloudflare
/// R2 (`https://{account}.r2.cloudflarestorage.com`, region `auto`); tests
/// use the in-memory store. Public URLs are derived from a configured base
/// URL (the bucket's public domain), not from the S3 endpoint.

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::{path::Path as StoragePath, Attribute, Attributes, ObjectStore, PutOptions};
use std::env;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Upload failed for {key}: {source}")]
    UploadFailed {
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Object store error: {0}")]
    ObjectStoreError(#[from] object_store::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// R2 connection settings
#[derive(Clone)]
pub struct StorageConfig {
    pub account_id: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// e.g. `https://pub-xxxx.r2.dev` or a custom domain
    pub public_url_base: String,
    /// Overrides the R2 endpoint (MinIO or another S3-compatible server)
    pub endpoint: Option<String>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("account_id", &self.account_id)
            .field("bucket", &self.bucket)
            .field("public_url_base", &self.public_url_base)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl StorageConfig {
    /// Loads `R2_*` variables, failing if any is missing
    ///
    /// `R2_ENDPOINT` is optional.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let required = |name: &str| {
            env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("{} environment variable is required", name))
        };

        Ok(Self {
            account_id: required("R2_ACCOUNT_ID")?,
            access_key_id: required("R2_ACCESS_KEY_ID")?,
            secret_access_key: required("R2_SECRET_ACCESS_KEY")?,
            bucket: required("R2_BUCKET_NAME")?,
            public_url_base: required("R2_PUBLIC_URL_BASE")?,
            endpoint: env::var("R2_ENDPOINT").ok().filter(|v| !v.trim().is_empty()),
        })
    }

    /// Like [`StorageConfig::from_env`], but `None` when `R2_BUCKET_NAME` is unset
    pub fn from_env_optional() -> anyhow::Result<Option<Self>> {
        dotenvy::dotenv().ok();

        match env::var("R2_BUCKET_NAME") {
            Ok(bucket) if !bucket.trim().is_empty() => Self::from_env().map(Some),
            _ => Ok(None),
        }
    }

    pub fn endpoint_url(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.r2.cloudflarestorage.com", self.account_id))
    }
}

/// What `put_image` stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub public_url: String,
    pub content_type: String,
    pub size: usize,
}

/// Image store with public URL derivation
#[derive(Clone)]
pub struct MediaStorage {
    store: Arc<dyn ObjectStore>,
    public_url_base: String,
}

impl MediaStorage {
    /// Wraps any `object_store` backend
    pub fn new(store: Arc<dyn ObjectStore>, public_url_base: impl Into<String>) -> Self {
        Self {
            store,
            public_url_base: public_url_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Builds the S3 backend for R2
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(config.endpoint_url())
            .with_region("auto")
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        tracing::info!(bucket = %config.bucket, "Object storage configured");

        Ok(Self::new(Arc::new(store), config.public_url_base.clone()))
    }

    /// In-memory storage for tests and local development
    pub fn in_memory(public_url_base: impl Into<String>) -> Self {
        Self::new(Arc::new(InMemory::new()), public_url_base)
    }

    /// `{public_url_base}/{key}`
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url_base, key.trim_start_matches('/'))
    }

    /// Uploads an image with its content type
    pub async fn put_image(&self, key: &str, data: Bytes, content_type: &str) -> Result<StoredObject> {
        let path = StoragePath::from(key);
        let size = data.len();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, data.into(), options)
            .await
            .map_err(|source| StorageError::UploadFailed {
                key: key.to_string(),
                source,
            })?;

        tracing::info!(key, size, content_type, "Uploaded to storage");

        Ok(StoredObject {
            key: key.to_string(),
            public_url: self.public_url(key),
            content_type: content_type.to_string(),
            size,
        })
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = StoragePath::from(key);

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a key; a missing key is not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = StoragePath::from(key);

        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                tracing::debug!(key, "Deleted from storage");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads an object back with its stored content type
    pub async fn get(&self, key: &str) -> Result<(Bytes, Option<String>)> {
        let path = StoragePath::from(key);
        let result = self.store.get(&path).await?;
        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(|v| v.as_ref().to_string());
        let bytes = result.bytes().await?;
        Ok((bytes, content_type))
    }
}
