//! Blob storage for sources and outputs.
//!
//! A [`Location`] is either a local path or an `s3://bucket/key` URI. The
//! [`BlobStore`] trait covers the four operations the pipeline needs (ensure a
//! directory, write, read, copy). [`Storage`] routes each call to the local
//! filesystem or to S3 based on the location kind, so a copy from S3 to local
//! disk (or back) is a read followed by a write.
//!
//! S3 access runs the async AWS SDK on an owned tokio runtime; the rest of the
//! pipeline stays synchronous.

use crate::config::StorageConfig;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid location {0:?}: {1}")]
    InvalidLocation(String, String),
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("S3 error: {0}")]
    S3(String),
    #[error("no S3 client configured for {0}")]
    NoS3Client(String),
}

/// Where a blob lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Local(PathBuf),
    S3 { bucket: String, key: String },
}

impl Location {
    /// Append a `/`-separated relative path.
    pub fn join(&self, relative: &str) -> Location {
        match self {
            Location::Local(path) => Location::Local(path.join(relative)),
            Location::S3 { bucket, key } => {
                let key = key.trim_end_matches('/');
                Location::S3 {
                    bucket: bucket.clone(),
                    key: if key.is_empty() {
                        relative.to_string()
                    } else {
                        format!("{key}/{relative}")
                    },
                }
            }
        }
    }

    /// Last path segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Location::Local(path) => path.file_name().and_then(|n| n.to_str()),
            Location::S3 { key, .. } => key.rsplit('/').next().filter(|n| !n.is_empty()),
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Location::Local(path) => Some(path),
            Location::S3 { .. } => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }
}

impl FromStr for Location {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(StorageError::InvalidLocation(
                s.to_string(),
                "empty location".into(),
            ));
        }
        if !s.contains("://") {
            return Ok(Location::Local(PathBuf::from(s)));
        }

        let url = Url::parse(s)
            .map_err(|e| StorageError::InvalidLocation(s.to_string(), e.to_string()))?;
        match url.scheme() {
            "file" => url.to_file_path().map(Location::Local).map_err(|()| {
                StorageError::InvalidLocation(s.to_string(), "not a file path".into())
            }),
            "s3" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| {
                        StorageError::InvalidLocation(s.to_string(), "missing bucket".into())
                    })?
                    .to_string();
                let key = url.path().trim_start_matches('/').to_string();
                Ok(Location::S3 { bucket, key })
            }
            other => Err(StorageError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::S3 { bucket, key } if key.is_empty() => write!(f, "s3://{bucket}"),
            Location::S3 { bucket, key } => write!(f, "s3://{bucket}/{key}"),
        }
    }
}

/// Byte-level storage operations.
pub trait BlobStore: Sync {
    /// Make sure `location` can hold children. A no-op for key-value stores.
    fn ensure_dir(&self, location: &Location) -> Result<(), StorageError>;

    fn write(&self, location: &Location, bytes: &[u8]) -> Result<(), StorageError>;

    fn read(&self, location: &Location) -> Result<Vec<u8>, StorageError>;

    fn copy(&self, from: &Location, to: &Location) -> Result<(), StorageError>;
}

/// Plain filesystem store. Rejects non-local locations.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStore;

fn local(location: &Location) -> Result<&Path, StorageError> {
    location
        .as_local()
        .ok_or_else(|| StorageError::UnsupportedScheme(location.to_string()))
}

impl BlobStore for LocalStore {
    fn ensure_dir(&self, location: &Location) -> Result<(), StorageError> {
        fs::create_dir_all(local(location)?)?;
        Ok(())
    }

    fn write(&self, location: &Location, bytes: &[u8]) -> Result<(), StorageError> {
        let path = local(location)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn read(&self, location: &Location) -> Result<Vec<u8>, StorageError> {
        let path = local(location)?;
        fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(location.to_string()),
            _ => StorageError::Io(e),
        })
    }

    fn copy(&self, from: &Location, to: &Location) -> Result<(), StorageError> {
        let (src, dst) = (local(from)?, local(to)?);
        if !src.exists() {
            return Err(StorageError::NotFound(from.to_string()));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        Ok(())
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Custom endpoints (MinIO, localstack) get path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}

/// S3 store driven from synchronous code.
pub struct S3Store {
    client: Client,
    runtime: tokio::runtime::Runtime,
}

fn s3_parts(location: &Location) -> Result<(&str, &str), StorageError> {
    match location {
        Location::S3 { bucket, key } => Ok((bucket.as_str(), key.as_str())),
        Location::Local(_) => Err(StorageError::UnsupportedScheme(location.to_string())),
    }
}

impl S3Store {
    pub fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        let client = runtime.block_on(create_s3_client(
            config.s3_endpoint.as_deref(),
            &config.s3_region,
        ));
        Ok(Self { client, runtime })
    }
}

impl BlobStore for S3Store {
    fn ensure_dir(&self, _location: &Location) -> Result<(), StorageError> {
        Ok(())
    }

    fn write(&self, location: &Location, bytes: &[u8]) -> Result<(), StorageError> {
        let (bucket, key) = s3_parts(location)?;
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(bytes.to_vec()))
                    .send(),
            )
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }

    fn read(&self, location: &Location) -> Result<Vec<u8>, StorageError> {
        let (bucket, key) = s3_parts(location)?;
        self.runtime.block_on(async {
            let resp = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| {
                    let not_found = e
                        .as_service_error()
                        .is_some_and(|se| se.is_no_such_key());
                    if not_found {
                        StorageError::NotFound(location.to_string())
                    } else {
                        StorageError::S3(e.to_string())
                    }
                })?;
            let data = resp
                .body
                .collect()
                .await
                .map_err(|e| StorageError::S3(e.to_string()))?
                .into_bytes();
            Ok(data.to_vec())
        })
    }

    fn copy(&self, from: &Location, to: &Location) -> Result<(), StorageError> {
        let (src_bucket, src_key) = s3_parts(from)?;
        let (bucket, key) = s3_parts(to)?;
        self.runtime
            .block_on(
                self.client
                    .copy_object()
                    .copy_source(format!("{src_bucket}/{src_key}"))
                    .bucket(bucket)
                    .key(key)
                    .send(),
            )
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(())
    }
}

/// Routes each call to the local filesystem or S3.
pub struct Storage {
    local: LocalStore,
    s3: Option<S3Store>,
}

impl Storage {
    /// Local filesystem only; any S3 location fails with [`StorageError::NoS3Client`].
    pub fn local() -> Self {
        Self {
            local: LocalStore,
            s3: None,
        }
    }

    /// Build a store able to reach every location in `locations`.
    pub fn connect<'a>(
        config: &StorageConfig,
        locations: impl IntoIterator<Item = &'a Location>,
    ) -> Result<Self, StorageError> {
        let needs_s3 = locations.into_iter().any(|l| !l.is_local());
        let s3 = if needs_s3 {
            tracing::debug!(region = %config.s3_region, "connecting to S3");
            Some(S3Store::connect(config)?)
        } else {
            None
        };
        Ok(Self {
            local: LocalStore,
            s3,
        })
    }

    fn store_for(&self, location: &Location) -> Result<&dyn BlobStore, StorageError> {
        match location {
            Location::Local(_) => Ok(&self.local),
            Location::S3 { .. } => self
                .s3
                .as_ref()
                .map(|s| s as &dyn BlobStore)
                .ok_or_else(|| StorageError::NoS3Client(location.to_string())),
        }
    }
}

impl BlobStore for Storage {
    fn ensure_dir(&self, location: &Location) -> Result<(), StorageError> {
        self.store_for(location)?.ensure_dir(location)
    }

    fn write(&self, location: &Location, bytes: &[u8]) -> Result<(), StorageError> {
        self.store_for(location)?.write(location, bytes)
    }

    fn read(&self, location: &Location) -> Result<Vec<u8>, StorageError> {
        self.store_for(location)?.read(location)
    }

    fn copy(&self, from: &Location, to: &Location) -> Result<(), StorageError> {
        tracing::debug!(%from, %to, "copy");
        if from.is_local() == to.is_local() {
            return self.store_for(from)?.copy(from, to);
        }
        let bytes = self.read(from)?;
        self.write(to, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parse_bare_path() {
        let loc: Location = "/data/images/a.tif".parse().unwrap();
        assert_eq!(loc, Location::Local(PathBuf::from("/data/images/a.tif")));
        assert_eq!(loc.file_name(), Some("a.tif"));
    }

    #[test]
    fn parse_file_url() {
        let loc: Location = "file:///data/out".parse().unwrap();
        assert_eq!(loc, Location::Local(PathBuf::from("/data/out")));
    }

    #[test]
    fn parse_s3_uri() {
        let loc: Location = "s3://bucket/iiif/img1".parse().unwrap();
        assert_eq!(
            loc,
            Location::S3 {
                bucket: "bucket".into(),
                key: "iiif/img1".into()
            }
        );
        assert_eq!(loc.to_string(), "s3://bucket/iiif/img1");
        assert_eq!(loc.file_name(), Some("img1"));
    }

    #[test]
    fn parse_rejects_unknown_scheme_and_empty() {
        assert!(matches!(
            "ftp://host/file".parse::<Location>(),
            Err(StorageError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            "".parse::<Location>(),
            Err(StorageError::InvalidLocation(..))
        ));
    }

    #[test]
    fn join_s3_keys() {
        let root: Location = "s3://bucket".parse().unwrap();
        assert_eq!(root.join("info.json").to_string(), "s3://bucket/info.json");
        let dir: Location = "s3://bucket/out/".parse().unwrap();
        assert_eq!(
            dir.join("full/max/0/default.jpg").to_string(),
            "s3://bucket/out/full/max/0/default.jpg"
        );
    }

    #[test]
    fn local_write_read_copy() {
        let tmp = TempDir::new().unwrap();
        let store = Storage::local();
        let root = Location::Local(tmp.path().to_path_buf());

        let a = root.join("nested/dir/a.txt");
        store.write(&a, b"hello").unwrap();
        assert_eq!(store.read(&a).unwrap(), b"hello");

        let b = root.join("other/b.txt");
        store.copy(&a, &b).unwrap();
        assert_eq!(fs::read(tmp.path().join("other/b.txt")).unwrap(), b"hello");
    }

    #[test]
    fn local_read_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let missing = Location::Local(tmp.path().join("nope"));
        assert!(matches!(
            Storage::local().read(&missing),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn s3_without_client_fails() {
        let loc: Location = "s3://bucket/key".parse().unwrap();
        assert!(matches!(
            Storage::local().read(&loc),
            Err(StorageError::NoS3Client(_))
        ));
    }
}
