use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

/// Capability set handlers need from shared storage. Paths are opaque keys.
#[async_trait]
pub trait RasterStorage: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    /// Names of the entries directly under `dir`.
    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError>;

    /// Short label for health output.
    fn describe(&self) -> String;
}

/// Storage rooted at a local (or mounted) directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Join `path` onto the root; absolute paths and `..` are refused.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RasterStorage for LocalStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match tokio::fs::metadata(self.resolve(path)?).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.resolve(path)?).await.map_err(|e| match e.kind() {
            IoErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => StorageError::Io(e),
        })
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, data).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.resolve(dir)?).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn describe(&self) -> String {
        format!("local:{}", self.root.display())
    }
}

/// Client for S3-compatible object storage (Cloudflare R2, MinIO).
pub struct ObjectStorage {
    bucket: Box<Bucket>,
}

impl ObjectStorage {
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
impl RasterStorage for ObjectStorage {
    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        match self.bucket.head_object(path).await {
            Ok((_, code)) => Ok((200..300).contains(&code)),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match self.bucket.get_object(path).await {
            Ok(response) => Ok(response.to_vec()),
            Err(S3Error::HttpFailWithBody(404, _)) => Err(StorageError::NotFound(path.to_string())),
            Err(e) => Err(StorageError::S3(e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(path, data, content_type_for(path))
            .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(path).await?;
        Ok(())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        let prefix = if dir.is_empty() || dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };

        let pages = self.bucket.list(prefix.clone(), Some("/".to_string())).await?;
        let mut names: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .filter_map(|object| object.key.strip_prefix(&prefix).map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect();
        names.sort();
        Ok(names)
    }

    fn describe(&self) -> String {
        format!("s3:{}", self.bucket.name())
    }
}

fn content_type_for(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".tif") || lower.ends_with(".tiff") {
        "image/tiff"
    } else if lower.ends_with(".geojson") || lower.ends_with(".json") {
        "application/geo+json"
    } else {
        "application/octet-stream"
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Path escapes storage root: {0}")]
    InvalidPath(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
